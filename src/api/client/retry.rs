//! Retry policy for rate-limited model requests.

use crate::error::ApiError;
use std::time::Duration;

/// Bounded exponential backoff applied to HTTP 429 responses.
///
/// Applied by the agent loop; every attempt goes back through the request
/// pacer and re-issues the same iteration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Upper bound on total attempts, including the initial request.
    pub max_attempts: u32,
    /// Base delay used for exponential backoff.
    pub initial_backoff: Duration,
    /// Maximum allowed delay between retry attempts.
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Build a policy that allows `retries` retries after the first attempt.
    pub fn with_retries(retries: u32) -> Self {
        Self {
            max_attempts: retries.saturating_add(1),
            ..Self::default()
        }
    }

    /// Decide whether another retry attempt should be scheduled.
    ///
    /// `attempt` is zero-based: the first failed request is attempt 0.
    pub fn should_retry(&self, err: &ApiError, attempt: u32) -> bool {
        attempt.saturating_add(1) < self.max_attempts && err.is_rate_limited()
    }

    /// Compute retry delay, respecting `Retry-After` when present.
    pub fn retry_delay_for(&self, attempt: u32, err: &ApiError) -> Duration {
        if let Some(seconds) = err.retry_after_secs() {
            return Duration::from_secs(seconds.clamp(1, 300));
        }
        let pow = 2u32.saturating_pow(attempt);
        let millis = self
            .initial_backoff
            .as_millis()
            .saturating_mul(pow as u128)
            .min(self.max_backoff.as_millis());
        Duration::from_millis(millis as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rate_limited(retry_after_secs: Option<u64>) -> ApiError {
        ApiError::Status {
            code: 429,
            body: "slow down".into(),
            retry_after_secs,
        }
    }

    // Verifies only 429 responses are retried and the attempt budget is honored.
    #[test]
    fn retries_only_rate_limits_within_budget() {
        let policy = RetryPolicy::with_retries(2);
        assert!(policy.should_retry(&rate_limited(None), 0));
        assert!(policy.should_retry(&rate_limited(None), 1));
        assert!(!policy.should_retry(&rate_limited(None), 2));
        assert!(!policy.should_retry(&ApiError::status(500, "boom"), 0));
        assert!(!policy.should_retry(&ApiError::Cancelled, 0));
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(500),
        };
        let err = rate_limited(None);
        assert_eq!(policy.retry_delay_for(0, &err), Duration::from_millis(100));
        assert_eq!(policy.retry_delay_for(1, &err), Duration::from_millis(200));
        assert_eq!(policy.retry_delay_for(2, &err), Duration::from_millis(400));
        assert_eq!(policy.retry_delay_for(3, &err), Duration::from_millis(500));
    }

    #[test]
    fn retry_after_header_wins() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.retry_delay_for(0, &rate_limited(Some(7))),
            Duration::from_secs(7)
        );
        assert_eq!(
            policy.retry_delay_for(0, &rate_limited(Some(0))),
            Duration::from_secs(1)
        );
    }
}
