//! Retry policy.
//!
//! The delay after the `n`th failed attempt (1-based) is
//! `base_delay × n` plus a random whole number of seconds in
//! `[0, jitter)`. With the default three-second jitter that is 0, 1 or 2
//! extra seconds.
//!
//! ```rust
//! use std::time::Duration;
//! use procvisor::retry::RetryPolicy;
//!
//! let policy = RetryPolicy::new(3, Duration::from_secs(2)).with_jitter(Duration::ZERO);
//! assert_eq!(policy.delay_for(1), Duration::from_secs(2));
//! assert_eq!(policy.delay_for(3), Duration::from_secs(6));
//! ```

use std::time::Duration;

use rand::Rng;

/// Default jitter ceiling added to every backoff delay.
pub const DEFAULT_JITTER: Duration = Duration::from_secs(3);

/// How many times to try an operation and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Delay unit, multiplied by the attempt number.
    pub base_delay: Duration,
    /// Upper bound (exclusive) of the random extra delay. Only whole
    /// seconds count; a jitter under one second adds nothing.
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    /// Three attempts, one-second base delay, default jitter.
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            jitter: DEFAULT_JITTER,
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            jitter: DEFAULT_JITTER,
        }
    }

    /// Policy from whole-second values.
    #[must_use]
    pub fn from_secs(max_attempts: u32, base_delay_secs: u64, jitter_secs: u64) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::from_secs(base_delay_secs),
            jitter: Duration::from_secs(jitter_secs),
        }
    }

    #[must_use]
    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    /// The deterministic part of the delay after failed attempt `attempt`.
    #[must_use]
    pub fn base_delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }

    /// Full delay after failed attempt `attempt`, jitter included.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.base_delay_for(attempt);
        let jitter_secs = self.jitter.as_secs();
        if jitter_secs == 0 {
            return base;
        }
        let extra = Duration::from_secs(rand::rng().random_range(0..jitter_secs));
        base.saturating_add(extra)
    }
}
