//! Reconnect backoff
//!
//! Exponential delays (`base * 2^attempt`, capped) with a bounded attempt
//! budget. Running out of attempts is reported as [`BackoffStep::Exhausted`]
//! so the connection can move to `Failed` instead of retrying forever.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default first delay
pub const DEFAULT_BASE_DELAY_MS: u64 = 1_000;

/// Default delay ceiling
pub const DEFAULT_CAP_DELAY_MS: u64 = 30_000;

/// Default number of reconnect attempts before giving up
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Backoff configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    /// Delay before the first retry in milliseconds
    pub base_delay_ms: u64,

    /// Upper bound for any delay in milliseconds
    pub cap_delay_ms: u64,

    /// Retries allowed before the scheduler reports exhaustion
    pub max_attempts: u32,

    /// Add up to 25% random jitter (never past the cap)
    pub jitter: bool,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            cap_delay_ms: DEFAULT_CAP_DELAY_MS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            jitter: false,
        }
    }
}

impl BackoffConfig {
    /// Set the first delay
    pub fn with_base_delay_ms(mut self, ms: u64) -> Self {
        self.base_delay_ms = ms;
        self
    }

    /// Set the delay ceiling
    pub fn with_cap_delay_ms(mut self, ms: u64) -> Self {
        self.cap_delay_ms = ms;
        self
    }

    /// Set the attempt budget
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Enable or disable jitter
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Un-jittered delay for a zero-based attempt, ignoring the budget.
    pub fn raw_delay_ms(&self, attempt: u32) -> u64 {
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        self.base_delay_ms
            .saturating_mul(factor)
            .min(self.cap_delay_ms)
    }
}

/// Outcome of asking for the next delay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffStep {
    /// Wait this long, then try again
    Wait(Duration),

    /// Attempt budget used up
    Exhausted,
}

/// Per-connection backoff state.
#[derive(Debug, Clone)]
pub struct BackoffScheduler {
    config: BackoffConfig,
    attempt: u32,
}

impl BackoffScheduler {
    /// Create a scheduler with no attempts used
    pub fn new(config: BackoffConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// Scheduler configuration
    pub fn config(&self) -> &BackoffConfig {
        &self.config
    }

    /// Delay for `attempt`, or `None` once the budget is used up.
    ///
    /// Deterministic: jitter is only applied by [`BackoffScheduler::next_delay`].
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.config.max_attempts {
            return None;
        }
        Some(Duration::from_millis(self.config.raw_delay_ms(attempt)))
    }

    /// Consume one attempt and return how long to wait before it.
    pub fn next_delay(&mut self) -> BackoffStep {
        let Some(delay) = self.delay_for(self.attempt) else {
            return BackoffStep::Exhausted;
        };
        self.attempt += 1;

        if !self.config.jitter {
            return BackoffStep::Wait(delay);
        }

        let delay_ms = delay.as_millis() as u64;
        let jitter_ms = (delay_ms as f64 * 0.25 * rand::random::<f64>()) as u64;
        let jittered = delay_ms
            .saturating_add(jitter_ms)
            .min(self.config.cap_delay_ms);
        BackoffStep::Wait(Duration::from_millis(jittered))
    }

    /// Forget all consumed attempts
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Attempts consumed since the last reset
    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    /// Whether the next call to `next_delay` will report exhaustion
    pub fn is_exhausted(&self) -> bool {
        self.attempt >= self.config.max_attempts
    }
}

impl Default for BackoffScheduler {
    fn default() -> Self {
        Self::new(BackoffConfig::default())
    }
}
