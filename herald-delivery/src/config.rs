use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{rate_limiter::RateLimitConfig, retry::RetryPolicy};

/// Tuning for one sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// Recipients fetched per database page; also the page size used when
    /// listing due schedules.
    ///
    /// Default: 100
    #[serde(default = "defaults::batch_size")]
    pub batch_size: usize,

    /// Concurrent senders per page.
    ///
    /// Default: 5
    #[serde(default = "defaults::worker_count")]
    pub worker_count: usize,

    /// Retries after the first attempt, so `max_retries + 1` attempts in
    /// total.
    ///
    /// Default: 3
    #[serde(default = "defaults::max_retries")]
    pub max_retries: u32,

    /// Delay before the first retry; each further retry doubles it.
    ///
    /// Default: 1 second
    #[serde(default = "defaults::base_retry_delay_secs")]
    pub base_retry_delay_secs: u64,

    /// Ceiling on the sending phase of a single schedule.
    ///
    /// Default: 1800 seconds (30 minutes)
    #[serde(default = "defaults::processing_timeout_secs")]
    pub processing_timeout_secs: u64,

    /// Ceiling on a single send attempt.
    ///
    /// Default: 10 seconds
    #[serde(default = "defaults::email_timeout_secs")]
    pub email_timeout_secs: u64,

    /// Ceiling on each individual database operation.
    ///
    /// Default: 300 seconds (5 minutes)
    #[serde(default = "defaults::db_timeout_secs")]
    pub db_timeout_secs: u64,

    /// Emails per second across all workers of this process.
    ///
    /// Default: 10.0
    #[serde(default = "defaults::rate_limit")]
    pub rate_limit: f64,

    /// Emails that may go out back to back before the rate applies.
    ///
    /// Default: 10
    #[serde(default = "defaults::burst")]
    pub burst: u32,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            batch_size: defaults::batch_size(),
            worker_count: defaults::worker_count(),
            max_retries: defaults::max_retries(),
            base_retry_delay_secs: defaults::base_retry_delay_secs(),
            processing_timeout_secs: defaults::processing_timeout_secs(),
            email_timeout_secs: defaults::email_timeout_secs(),
            db_timeout_secs: defaults::db_timeout_secs(),
            rate_limit: defaults::rate_limit(),
            burst: defaults::burst(),
        }
    }
}

impl DeliveryConfig {
    /// Replace values that would stall the engine with their smallest
    /// usable counterpart.
    #[must_use]
    pub fn normalize(mut self) -> Self {
        self.batch_size = self.batch_size.max(1);
        self.worker_count = self.worker_count.max(1);
        self.burst = self.burst.max(1);
        if !(self.rate_limit.is_finite() && self.rate_limit > 0.0) {
            self.rate_limit = defaults::rate_limit();
        }
        self
    }

    #[must_use]
    pub const fn processing_timeout(&self) -> Duration {
        Duration::from_secs(self.processing_timeout_secs)
    }

    #[must_use]
    pub const fn email_timeout(&self) -> Duration {
        Duration::from_secs(self.email_timeout_secs)
    }

    #[must_use]
    pub const fn db_timeout(&self) -> Duration {
        Duration::from_secs(self.db_timeout_secs)
    }

    #[must_use]
    pub const fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: Duration::from_secs(self.base_retry_delay_secs),
            attempt_timeout: self.email_timeout(),
        }
    }

    #[must_use]
    pub const fn rate_limit_config(&self) -> RateLimitConfig {
        RateLimitConfig {
            messages_per_second: self.rate_limit,
            burst_size: self.burst,
        }
    }
}

mod defaults {
    pub const fn batch_size() -> usize {
        100
    }

    pub const fn worker_count() -> usize {
        5
    }

    pub const fn max_retries() -> u32 {
        3
    }

    pub const fn base_retry_delay_secs() -> u64 {
        1
    }

    pub const fn processing_timeout_secs() -> u64 {
        1800 // 30 minutes
    }

    pub const fn email_timeout_secs() -> u64 {
        10
    }

    pub const fn db_timeout_secs() -> u64 {
        300 // 5 minutes
    }

    pub const fn rate_limit() -> f64 {
        10.0
    }

    pub const fn burst() -> u32 {
        10
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = DeliveryConfig::default();

        assert_eq!(config.batch_size, 100);
        assert_eq!(config.worker_count, 5);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.processing_timeout(), Duration::from_secs(1800));
        assert_eq!(config.email_timeout(), Duration::from_secs(10));
        assert_eq!(config.db_timeout(), Duration::from_secs(300));
        assert!((config.rate_limit - 10.0).abs() < f64::EPSILON);
        assert_eq!(config.burst, 10);
    }

    #[test]
    fn test_normalize_fixes_zero_values() {
        let config = DeliveryConfig {
            batch_size: 0,
            worker_count: 0,
            burst: 0,
            rate_limit: 0.0,
            ..DeliveryConfig::default()
        }
        .normalize();

        assert_eq!(config.batch_size, 1);
        assert_eq!(config.worker_count, 1);
        assert_eq!(config.burst, 1);
        assert!((config.rate_limit - 10.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_retry_policy_follows_config() {
        let config = DeliveryConfig {
            max_retries: 5,
            base_retry_delay_secs: 2,
            email_timeout_secs: 3,
            ..DeliveryConfig::default()
        };

        let policy = config.retry_policy();
        assert_eq!(policy.max_attempts(), 6);
        assert_eq!(policy.base_delay, Duration::from_secs(2));
        assert_eq!(policy.attempt_timeout, Duration::from_secs(3));
    }
}
