//! Reducer counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Why a batch was flushed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushReason {
    /// The buffer reached `max_batch_size`.
    Size,
    /// The flush interval elapsed.
    Timer,
    /// `flush_now` was called.
    Manual,
    /// `destroy` drained the final batch.
    Shutdown,
}

impl FlushReason {
    /// Stable name for logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Size => "size",
            Self::Timer => "timer",
            Self::Manual => "manual",
            Self::Shutdown => "shutdown",
        }
    }
}

/// Live counters, updated without locks.
#[derive(Debug, Default)]
pub struct ReducerStats {
    submitted: AtomicU64,
    short_circuited: AtomicU64,
    batches: AtomicU64,
    items_flushed: AtomicU64,
    failed_batches: AtomicU64,
    largest_batch: AtomicU64,
    size_flushes: AtomicU64,
    timer_flushes: AtomicU64,
    manual_flushes: AtomicU64,
    shutdown_flushes: AtomicU64,
}

impl ReducerStats {
    pub(crate) fn record_submit(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_short_circuit(&self) {
        self.short_circuited.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_flush(&self, reason: FlushReason, batch_size: u64, failed: bool) {
        self.batches.fetch_add(1, Ordering::Relaxed);
        self.items_flushed.fetch_add(batch_size, Ordering::Relaxed);
        self.largest_batch.fetch_max(batch_size, Ordering::Relaxed);
        if failed {
            self.failed_batches.fetch_add(1, Ordering::Relaxed);
        }
        let counter = match reason {
            FlushReason::Size => &self.size_flushes,
            FlushReason::Timer => &self.timer_flushes,
            FlushReason::Manual => &self.manual_flushes,
            FlushReason::Shutdown => &self.shutdown_flushes,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Copies the current counter values.
    #[must_use]
    pub fn snapshot(&self) -> ReducerStatsSnapshot {
        ReducerStatsSnapshot {
            submitted: self.submitted.load(Ordering::Relaxed),
            short_circuited: self.short_circuited.load(Ordering::Relaxed),
            batches: self.batches.load(Ordering::Relaxed),
            items_flushed: self.items_flushed.load(Ordering::Relaxed),
            failed_batches: self.failed_batches.load(Ordering::Relaxed),
            largest_batch: self.largest_batch.load(Ordering::Relaxed),
            size_flushes: self.size_flushes.load(Ordering::Relaxed),
            timer_flushes: self.timer_flushes.load(Ordering::Relaxed),
            manual_flushes: self.manual_flushes.load(Ordering::Relaxed),
            shutdown_flushes: self.shutdown_flushes.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`ReducerStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReducerStatsSnapshot {
    /// Items appended to a batch (short-circuited items excluded).
    pub submitted: u64,
    /// Items answered by the short-circuit predicate without batching.
    pub short_circuited: u64,
    /// Handler invocations.
    pub batches: u64,
    /// Items passed to the handler across all batches.
    pub items_flushed: u64,
    /// Batches whose outcome was an error.
    pub failed_batches: u64,
    /// Largest batch seen.
    pub largest_batch: u64,
    /// Flushes triggered by reaching `max_batch_size`.
    pub size_flushes: u64,
    /// Flushes triggered by the interval timer.
    pub timer_flushes: u64,
    /// Flushes triggered by `flush_now`.
    pub manual_flushes: u64,
    /// Flushes performed by `destroy`.
    pub shutdown_flushes: u64,
}

impl ReducerStatsSnapshot {
    /// Mean items per handler invocation, or 0 before the first flush.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn average_batch_size(&self) -> f64 {
        if self.batches == 0 {
            return 0.0;
        }
        self.items_flushed as f64 / self.batches as f64
    }

    /// Items appended but not yet handed to the handler.
    #[must_use]
    pub const fn in_flight(&self) -> u64 {
        self.submitted.saturating_sub(self.items_flushed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_flush_by_reason() {
        let stats = ReducerStats::default();
        stats.record_flush(FlushReason::Size, 100, false);
        stats.record_flush(FlushReason::Timer, 10, true);
        stats.record_flush(FlushReason::Shutdown, 5, false);

        let snap = stats.snapshot();
        assert_eq!(snap.batches, 3);
        assert_eq!(snap.items_flushed, 115);
        assert_eq!(snap.failed_batches, 1);
        assert_eq!(snap.largest_batch, 100);
        assert_eq!(snap.size_flushes, 1);
        assert_eq!(snap.timer_flushes, 1);
        assert_eq!(snap.manual_flushes, 0);
        assert_eq!(snap.shutdown_flushes, 1);
    }

    #[test]
    fn test_average_and_in_flight() {
        let stats = ReducerStats::default();
        assert!(stats.snapshot().average_batch_size().abs() < f64::EPSILON);

        for _ in 0..30 {
            stats.record_submit();
        }
        stats.record_flush(FlushReason::Size, 10, false);
        stats.record_flush(FlushReason::Size, 10, false);

        let snap = stats.snapshot();
        assert!((snap.average_batch_size() - 10.0).abs() < f64::EPSILON);
        assert_eq!(snap.in_flight(), 10);
    }

    #[test]
    fn test_reason_names() {
        assert_eq!(FlushReason::Size.as_str(), "size");
        assert_eq!(FlushReason::Timer.as_str(), "timer");
        assert_eq!(FlushReason::Manual.as_str(), "manual");
        assert_eq!(FlushReason::Shutdown.as_str(), "shutdown");
    }
}
