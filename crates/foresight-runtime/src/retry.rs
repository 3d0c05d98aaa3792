//! Retry policy for backend calls.
//!
//! Exponential backoff via `backon`. A retry starts only when the failure is
//! transient, attempts remain, and the total budget measured from the first
//! attempt has not run out.

use backon::ExponentialBuilder;
use std::time::Duration;
use tokio::time::Instant;

use crate::config::RetryConfig;
use crate::providers::BackendError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub min_delay: Duration,
    pub max_delay: Duration,
    pub total_budget: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            min_delay: config.min_delay,
            max_delay: config.max_delay.max(config.min_delay),
            total_budget: config.total_budget,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Backoff schedule for the retries after the first attempt.
    pub fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.min_delay)
            .with_max_delay(self.max_delay)
            .with_max_times(self.max_attempts.saturating_sub(1) as usize)
    }

    /// Whether `error` may be retried given the time spent since `started`.
    pub fn allows_retry(&self, error: &BackendError, started: Instant) -> bool {
        error.is_transient() && started.elapsed() < self.total_budget
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config_clamps() {
        let config = RetryConfig {
            max_attempts: 0,
            min_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(1),
            total_budget: Duration::from_secs(60),
        };
        let policy = RetryPolicy::from(&config);
        assert_eq!(policy.max_attempts, 1);
        assert_eq!(policy.max_delay, Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_budget_stops_retries() {
        let policy = RetryPolicy::default();
        let started = Instant::now();
        let reset = BackendError::Connection("connection reset".into());

        assert!(policy.allows_retry(&reset, started));
        assert!(!policy.allows_retry(&BackendError::InvalidResponse("x".into()), started));

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(!policy.allows_retry(&reset, started));
    }
}
