//! Capped exponential backoff.

use std::time::Duration;

/// Delay policy `base * 2^exponent`, never exceeding `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    base: Duration,
    max: Duration,
}

impl Backoff {
    /// Creates a policy.
    #[must_use]
    pub const fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    /// Returns the base delay.
    #[must_use]
    pub const fn base(&self) -> Duration {
        self.base
    }

    /// Returns the cap.
    #[must_use]
    pub const fn max(&self) -> Duration {
        self.max
    }

    /// Calculates the delay for the given exponent.
    #[must_use]
    pub fn delay(&self, exponent: u32) -> Duration {
        2u32.checked_pow(exponent)
            .and_then(|factor| self.base.checked_mul(factor))
            .map_or(self.max, |delay| delay.min(self.max))
    }
}
