//! Queue configuration.

use std::time::Duration;

use crate::backoff::Backoff;

/// Default maximum number of queued messages.
pub const DEFAULT_CAPACITY: usize = 1000;

/// Default dedup window.
pub const DEFAULT_DEDUP_WINDOW: Duration = Duration::from_secs(5 * 60);

/// Default retry budget per message.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default retry base delay.
pub const DEFAULT_RETRY_BASE: Duration = Duration::from_secs(1);

/// Default retry delay cap.
pub const DEFAULT_RETRY_MAX: Duration = Duration::from_secs(30);

/// Default interval of the expiry sweep.
pub const DEFAULT_EXPIRY_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Configuration for [`MessageQueue`](super::MessageQueue).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    /// Maximum number of queued messages.
    pub capacity: usize,
    /// Span during which identical enqueues collapse.
    pub dedup_window: Duration,
    /// Retry budget for messages that do not set one.
    pub default_max_retries: u32,
    /// Base of the retry delay.
    pub retry_base: Duration,
    /// Cap of the retry delay.
    pub retry_max: Duration,
    /// Interval of the expiry sweep run by the client.
    pub expiry_sweep_interval: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            dedup_window: DEFAULT_DEDUP_WINDOW,
            default_max_retries: DEFAULT_MAX_RETRIES,
            retry_base: DEFAULT_RETRY_BASE,
            retry_max: DEFAULT_RETRY_MAX,
            expiry_sweep_interval: DEFAULT_EXPIRY_SWEEP_INTERVAL,
        }
    }
}

impl QueueConfig {
    /// Sets the capacity.
    #[must_use]
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Sets the dedup window.
    #[must_use]
    pub fn with_dedup_window(mut self, window: Duration) -> Self {
        self.dedup_window = window;
        self
    }

    /// Sets the default retry budget.
    #[must_use]
    pub fn with_default_max_retries(mut self, retries: u32) -> Self {
        self.default_max_retries = retries;
        self
    }

    /// Sets the retry delay base and cap.
    #[must_use]
    pub fn with_retry_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.retry_base = base;
        self.retry_max = max;
        self
    }

    /// Sets the expiry sweep interval.
    #[must_use]
    pub fn with_expiry_sweep_interval(mut self, interval: Duration) -> Self {
        self.expiry_sweep_interval = interval;
        self
    }

    /// Returns the retry delay policy.
    #[must_use]
    pub const fn retry_backoff(&self) -> Backoff {
        Backoff::new(self.retry_base, self.retry_max)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }

        if self.retry_base.is_zero() {
            return Err(ConfigError::ZeroRetryBase);
        }

        if self.retry_max < self.retry_base {
            return Err(ConfigError::RetryCapBelowBase);
        }

        if self.expiry_sweep_interval.is_zero() {
            return Err(ConfigError::ZeroSweepInterval);
        }

        Ok(())
    }
}

/// Queue configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Capacity is zero.
    #[error("capacity must be > 0")]
    ZeroCapacity,

    /// Retry base is zero.
    #[error("retry_base must be > 0")]
    ZeroRetryBase,

    /// Retry cap is below the base.
    #[error("retry_max must be >= retry_base")]
    RetryCapBelowBase,

    /// Sweep interval is zero.
    #[error("expiry_sweep_interval must be > 0")]
    ZeroSweepInterval,
}
