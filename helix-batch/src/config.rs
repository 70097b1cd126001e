//! Reducer configuration.

use std::time::Duration;

use tracing::warn;

use crate::error::{ReduceError, ReduceResult};

/// Configuration bounds.
///
/// Every buffer gets an explicit maximum. A batch bound in the millions is
/// almost certainly a configuration mistake and is rejected up front.
pub mod limits {
    use std::time::Duration;

    /// Default maximum number of items per batch.
    pub const MAX_BATCH_SIZE_DEFAULT: usize = 100;

    /// Largest accepted `max_batch_size`.
    pub const MAX_BATCH_SIZE_MAX: usize = 1_000_000;

    /// Default flush interval.
    pub const FLUSH_INTERVAL_DEFAULT: Duration = Duration::from_millis(1000);

    /// Shortest accepted flush interval.
    pub const FLUSH_INTERVAL_MIN: Duration = Duration::from_millis(1);

    /// Longest accepted flush interval (one day).
    pub const FLUSH_INTERVAL_MAX: Duration = Duration::from_secs(24 * 60 * 60);
}

/// Environment variable overriding the flush interval, in milliseconds.
pub const ENV_FLUSH_INTERVAL_MS: &str = "HELIX_REDUCER_FLUSH_INTERVAL_MS";

/// Environment variable overriding the maximum batch size.
pub const ENV_MAX_BATCH_SIZE: &str = "HELIX_REDUCER_MAX_BATCH_SIZE";

/// Configuration for a [`Reducer`](crate::Reducer).
///
/// Immutable once the reducer is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReducerConfig {
    /// Flush whatever is buffered once this much time has passed since the
    /// previous flush. Default: 1s.
    pub flush_interval: Duration,
    /// Flush as soon as this many items are buffered. Default: 100.
    pub max_batch_size: usize,
}

impl ReducerConfig {
    /// Creates a configuration with the default interval and batch size.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            flush_interval: limits::FLUSH_INTERVAL_DEFAULT,
            max_batch_size: limits::MAX_BATCH_SIZE_DEFAULT,
        }
    }

    /// Sets the flush interval.
    #[must_use]
    pub const fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    /// Sets the flush interval in milliseconds.
    #[must_use]
    pub const fn with_flush_interval_ms(mut self, interval_ms: u64) -> Self {
        self.flush_interval = Duration::from_millis(interval_ms);
        self
    }

    /// Sets the maximum batch size.
    #[must_use]
    pub const fn with_max_batch_size(mut self, max: usize) -> Self {
        self.max_batch_size = max;
        self
    }

    /// Creates a configuration for testing: small batches, short interval.
    #[must_use]
    pub const fn for_testing() -> Self {
        Self {
            flush_interval: Duration::from_millis(50),
            max_batch_size: 16,
        }
    }

    /// Creates the default configuration with environment overrides applied.
    ///
    /// Reads [`ENV_FLUSH_INTERVAL_MS`] and [`ENV_MAX_BATCH_SIZE`]. Values that
    /// fail to parse are logged and ignored.
    #[must_use]
    pub fn from_env() -> Self {
        Self::new().with_overrides(|name| std::env::var(name).ok())
    }

    /// Applies overrides from an arbitrary key lookup.
    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(raw) = lookup(ENV_FLUSH_INTERVAL_MS) {
            match raw.trim().parse::<u64>() {
                Ok(ms) => self.flush_interval = Duration::from_millis(ms),
                Err(e) => warn!(var = ENV_FLUSH_INTERVAL_MS, value = %raw, error = %e, "Ignoring override"),
            }
        }
        if let Some(raw) = lookup(ENV_MAX_BATCH_SIZE) {
            match raw.trim().parse::<usize>() {
                Ok(max) => self.max_batch_size = max,
                Err(e) => warn!(var = ENV_MAX_BATCH_SIZE, value = %raw, error = %e, "Ignoring override"),
            }
        }
        self
    }

    /// Validates the configuration.
    ///
    /// # Errors
    /// Returns `ReduceError::InvalidConfig` if any value is outside [`limits`].
    pub fn validate(&self) -> ReduceResult<()> {
        if self.max_batch_size == 0 {
            return Err(ReduceError::InvalidConfig {
                field: "max_batch_size",
                reason: "must be positive",
            });
        }
        if self.max_batch_size > limits::MAX_BATCH_SIZE_MAX {
            return Err(ReduceError::InvalidConfig {
                field: "max_batch_size",
                reason: "exceeds MAX_BATCH_SIZE_MAX",
            });
        }
        if self.flush_interval < limits::FLUSH_INTERVAL_MIN {
            return Err(ReduceError::InvalidConfig {
                field: "flush_interval",
                reason: "must be at least 1ms",
            });
        }
        if self.flush_interval > limits::FLUSH_INTERVAL_MAX {
            return Err(ReduceError::InvalidConfig {
                field: "flush_interval",
                reason: "exceeds FLUSH_INTERVAL_MAX",
            });
        }
        Ok(())
    }
}

impl Default for ReducerConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn test_defaults() {
        let config = ReducerConfig::default();
        assert_eq!(config.flush_interval, Duration::from_millis(1000));
        assert_eq!(config.max_batch_size, 100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builders() {
        let config = ReducerConfig::new()
            .with_flush_interval_ms(300)
            .with_max_batch_size(7);
        assert_eq!(config.flush_interval, Duration::from_millis(300));
        assert_eq!(config.max_batch_size, 7);
        assert!(ReducerConfig::for_testing().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_batch() {
        let err = ReducerConfig::new()
            .with_max_batch_size(0)
            .validate()
            .unwrap_err();
        assert!(matches!(
            err,
            ReduceError::InvalidConfig {
                field: "max_batch_size",
                ..
            }
        ));
    }

    #[test]
    fn test_validate_rejects_oversized_batch() {
        let config = ReducerConfig::new().with_max_batch_size(limits::MAX_BATCH_SIZE_MAX + 1);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_interval_bounds() {
        let zero = ReducerConfig::new().with_flush_interval(Duration::ZERO);
        assert!(matches!(
            zero.validate(),
            Err(ReduceError::InvalidConfig {
                field: "flush_interval",
                ..
            })
        ));

        let huge = ReducerConfig::new().with_flush_interval(Duration::from_secs(2 * 24 * 60 * 60));
        assert!(huge.validate().is_err());
    }

    #[test]
    fn test_overrides_apply() {
        let vars: HashMap<&str, &str> = [(ENV_FLUSH_INTERVAL_MS, "250"), (ENV_MAX_BATCH_SIZE, " 42 ")]
            .into_iter()
            .collect();
        let config = ReducerConfig::new().with_overrides(|k| vars.get(k).map(|v| (*v).to_string()));
        assert_eq!(config.flush_interval, Duration::from_millis(250));
        assert_eq!(config.max_batch_size, 42);
    }

    #[test]
    fn test_overrides_ignore_garbage() {
        let config = ReducerConfig::new().with_overrides(|k| {
            (k == ENV_MAX_BATCH_SIZE).then(|| "lots".to_string())
        });
        assert_eq!(config, ReducerConfig::new());
    }
}
