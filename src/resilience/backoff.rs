//! Exponential backoff with jitter.

use std::time::Duration;

use rand::Rng;

use crate::config::NotifierConfig;

/// Calculate exponential backoff delay with jitter.
pub fn calculate_backoff(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    if attempt == 0 {
        return Duration::from_millis(0);
    }

    let exponential_base = 2u64.saturating_pow(attempt - 1);
    let delay_ms = base_ms.saturating_mul(exponential_base);
    let capped_delay = delay_ms.min(max_ms);

    // Apply jitter (0 to 10% of the delay)
    let jitter_range = capped_delay / 10;
    let jitter = if jitter_range > 0 {
        rand::thread_rng().gen_range(0..jitter_range)
    } else {
        0
    };

    Duration::from_millis(capped_delay + jitter)
}

/// Bounded retry schedule shared by publishers and subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub max_attempts: u32,
    pub base_ms: u64,
    pub max_ms: u64,
}

impl BackoffPolicy {
    pub fn new(max_attempts: u32, base_ms: u64, max_ms: u64) -> Self {
        Self {
            max_attempts,
            base_ms,
            max_ms,
        }
    }

    /// Delay to wait after the given failed attempt (1-based), or `None`
    /// once the attempts are exhausted.
    pub fn delay_after(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_attempts {
            None
        } else {
            Some(calculate_backoff(attempt, self.base_ms, self.max_ms))
        }
    }
}

impl From<&NotifierConfig> for BackoffPolicy {
    fn from(config: &NotifierConfig) -> Self {
        Self::new(config.max_attempts, config.base_delay_ms, config.max_delay_ms)
    }
}
