use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Bounded exponential backoff with additive jitter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    /// Delay before the first retry
    pub base_delay_ms: u64,
    /// Cap on the exponential part
    pub max_delay_ms: u64,
    /// Retries before giving up
    pub max_attempts: u32,
    /// Jitter is drawn uniformly from `[0, jitter_ms)`
    pub jitter_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: 1000,
            max_delay_ms: 10_000,
            max_attempts: 3,
            jitter_ms: 1000,
        }
    }
}

impl ReconnectPolicy {
    /// `min(base * 2^attempt, max)` in milliseconds
    pub fn base_delay_ms(&self, attempt: u32) -> u64 {
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        self.base_delay_ms
            .saturating_mul(factor)
            .min(self.max_delay_ms)
    }

    /// Delay for `attempt` with a caller-chosen jitter, clamped into range
    pub fn delay_with_jitter(&self, attempt: u32, jitter_ms: u64) -> Duration {
        let jitter = jitter_ms.min(self.jitter_ms.saturating_sub(1));
        Duration::from_millis(self.base_delay_ms(attempt) + jitter)
    }

    /// Delay for `attempt` with random jitter
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let jitter = if self.jitter_ms == 0 {
            0
        } else {
            rand::random::<u64>() % self.jitter_ms
        };
        self.delay_with_jitter(attempt, jitter)
    }

    pub fn can_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}
