//! Flush deadline tracking.
//!
//! The timer is rearmed by every flush, whatever triggered it, so the next
//! timer-driven flush is measured from the last flush rather than from a
//! fixed grid. It carries no task of its own: the daemon sleeps until
//! [`FlushTimer::deadline`] and re-checks [`FlushTimer::is_due`] under the
//! buffer guard before flushing.

use std::time::Duration;

use tokio::time::Instant;

/// Deadline for the next timer-driven flush.
#[derive(Debug, Clone, Copy)]
pub(crate) struct FlushTimer {
    interval: Duration,
    armed_at: Instant,
    stopped: bool,
}

impl FlushTimer {
    /// Creates a timer armed from now.
    pub(crate) fn new(interval: Duration) -> Self {
        Self {
            interval,
            armed_at: Instant::now(),
            stopped: false,
        }
    }

    /// Restarts the countdown from now. No effect once stopped.
    pub(crate) fn rearm(&mut self) {
        self.armed_at = Instant::now();
    }

    /// Stops the timer permanently.
    pub(crate) fn stop(&mut self) {
        self.stopped = true;
    }

    /// Returns the next deadline, or `None` once stopped.
    pub(crate) fn deadline(&self) -> Option<Instant> {
        (!self.stopped).then(|| self.armed_at + self.interval)
    }

    /// Returns true if the deadline has passed.
    pub(crate) fn is_due(&self, now: Instant) -> bool {
        self.deadline().is_some_and(|deadline| now >= deadline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_due_after_interval() {
        let timer = FlushTimer::new(Duration::from_millis(100));
        assert!(!timer.is_due(Instant::now()));

        tokio::time::advance(Duration::from_millis(100)).await;
        assert!(timer.is_due(Instant::now()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_pushes_deadline() {
        let mut timer = FlushTimer::new(Duration::from_millis(100));
        tokio::time::advance(Duration::from_millis(80)).await;
        timer.rearm();

        tokio::time::advance(Duration::from_millis(50)).await;
        assert!(!timer.is_due(Instant::now()));

        tokio::time::advance(Duration::from_millis(50)).await;
        assert!(timer.is_due(Instant::now()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stopped_timer_never_due() {
        let mut timer = FlushTimer::new(Duration::from_millis(10));
        timer.stop();
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(timer.deadline().is_none());
        assert!(!timer.is_due(Instant::now()));
    }
}
