//! Retry policy: attempt bound, per-attempt timeout and backoff between drains.

use std::time::Duration;

use crate::config::SyncConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncPolicy {
    /// Attempts before a message becomes `failed`. `0` never gives up.
    pub max_retries: u32,
    /// Upper bound on one delivery call; hitting it counts as a retryable failure.
    pub delivery_timeout: Duration,
    /// Wait before the background worker retries after the first failure.
    pub retry_base_delay: Duration,
    /// Cap for the doubled backoff.
    pub retry_max_delay: Duration,
    /// Idle interval between worker drains. Zero disables polling.
    pub poll_interval: Duration,
}

impl Default for SyncPolicy {
    fn default() -> Self {
        Self::from_config(&SyncConfig::default())
    }
}

impl SyncPolicy {
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            delivery_timeout: config.delivery_timeout(),
            retry_base_delay: Duration::from_secs(config.retry_base_delay_secs),
            retry_max_delay: Duration::from_secs(config.retry_max_delay_secs),
            poll_interval: Duration::from_secs(config.poll_interval_secs),
        }
    }

    /// Whether a message that has now been attempted `attempts` times should stop retrying.
    pub fn exhausted(&self, attempts: u32) -> bool {
        self.max_retries > 0 && attempts >= self.max_retries
    }

    /// Delay before the next automatic drain after `attempts` failed attempts:
    /// `base * 2^(attempts - 1)`, capped at `retry_max_delay`.
    pub fn backoff(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(20);
        self.retry_base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.retry_max_delay)
    }
}
