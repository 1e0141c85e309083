//! Retry policy with exponential backoff

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Retry policy for failed task executions
///
/// The delay before re-leasing a task that has been retried `n` times is
/// `base_delay * 2^n`, capped at `max_delay`. With the defaults that is
/// 2 s, 4 s, 8 s before the fourth (final) attempt.
///
/// # Example
///
/// ```
/// use conveyor_engine::RetryPolicy;
/// use std::time::Duration;
///
/// let policy = RetryPolicy::default()
///     .with_max_retries(5)
///     .with_base_delay(Duration::from_secs(1));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of retries; attempt `max_retries + 1` never runs
    pub max_retries: u32,

    /// Backoff base; the first retry waits `base_delay * 2`
    #[serde(with = "duration_millis")]
    pub base_delay: Duration,

    /// Upper bound on any single backoff delay
    #[serde(with = "duration_millis")]
    pub max_delay: Duration,

    /// Jitter factor in [0, 1]; a value of 0.1 spreads each delay by
    /// at most ±10%. Off by default, so backoff is exact.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            jitter: 0.0,
        }
    }
}

impl RetryPolicy {
    /// Create a policy that never retries
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Set the maximum number of retries
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the backoff base delay
    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    /// Set the backoff delay cap
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Set the jitter factor (clamped to [0, 1])
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Whether a task with this retry count has no attempts left
    pub fn attempts_exhausted(&self, retry_count: u32) -> bool {
        retry_count >= self.max_retries
    }

    /// Backoff delay before the attempt that follows retry `retry_count`
    pub fn delay_for_retry(&self, retry_count: u32) -> Duration {
        let exponential =
            self.base_delay.as_secs_f64() * 2f64.powi(retry_count.min(i32::MAX as u32) as i32);
        let capped = exponential.min(self.max_delay.as_secs_f64());

        let delayed = if self.jitter > 0.0 {
            let spread = capped * self.jitter;
            let offset = rand::thread_rng().gen_range(-spread..=spread);
            (capped + offset).max(0.0)
        } else {
            capped
        };

        Duration::from_secs_f64(delayed)
    }
}

/// Serde support for Duration as milliseconds
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_millis().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.base_delay, Duration::from_secs(1));
        assert_eq!(policy.jitter, 0.0);
    }

    #[test]
    fn test_exponential_delays() {
        let policy = RetryPolicy::default();

        // 2^n seconds for retry n
        assert_eq!(policy.delay_for_retry(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for_retry(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for_retry(3), Duration::from_secs(8));
    }

    #[test]
    fn test_delay_capped() {
        let policy = RetryPolicy::default().with_max_delay(Duration::from_secs(5));
        assert_eq!(policy.delay_for_retry(10), Duration::from_secs(5));
    }

    #[test]
    fn test_exhaustion() {
        let policy = RetryPolicy::default().with_max_retries(2);
        assert!(!policy.attempts_exhausted(0));
        assert!(!policy.attempts_exhausted(1));
        assert!(policy.attempts_exhausted(2));
        assert!(policy.attempts_exhausted(3));
    }

    #[test]
    fn test_no_retry() {
        let policy = RetryPolicy::no_retry();
        assert!(policy.attempts_exhausted(0));
    }

    #[test]
    fn test_jitter_bounded() {
        let policy = RetryPolicy::default().with_jitter(0.5);

        for _ in 0..100 {
            let delay = policy.delay_for_retry(1).as_secs_f64();
            assert!((1.0..=3.0).contains(&delay), "delay {delay} out of bounds");
        }
    }

    #[test]
    fn test_jitter_clamped() {
        let policy = RetryPolicy::default().with_jitter(7.0);
        assert_eq!(policy.jitter, 1.0);
    }

    #[test]
    fn test_serialization_round_trip() {
        let policy = RetryPolicy::default()
            .with_max_retries(5)
            .with_base_delay(Duration::from_millis(250));

        let json = serde_json::to_string(&policy).unwrap();
        let parsed: RetryPolicy = serde_json::from_str(&json).unwrap();
        assert_eq!(policy, parsed);
    }
}
