//! Reconnect delay schedule.

use std::time::Duration;

use rand::Rng;

/// Largest exponent applied to the base delay.
const MAX_EXPONENT: u32 = 16;

/// Exponential backoff with ±20% jitter, capped at `max`.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    attempt: u32,
}

impl Backoff {
    #[must_use]
    pub const fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            attempt: 0,
        }
    }

    /// Failed attempts since the last reset.
    #[must_use]
    pub const fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Start over after a successful connection.
    pub const fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Delay before the next attempt, without jitter.
    #[must_use]
    pub fn nominal_delay(&self) -> Duration {
        let factor = 2_u32.saturating_pow(self.attempt.min(MAX_EXPONENT));
        self.base.saturating_mul(factor).min(self.max)
    }

    /// Delay before the next attempt; advances the attempt counter.
    pub fn next_delay(&mut self) -> Duration {
        let jitter = rand::rng().random_range(0.8..1.2);
        let delay = self.nominal_delay().mul_f64(jitter).min(self.max);
        self.attempt = self.attempt.saturating_add(1);
        delay
    }
}
