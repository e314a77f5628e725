//! Retry policy with exponential backoff and jitter
//!
//! Transient connector failures (rate limits, timeouts, provider 5xx) retry
//! with exponential backoff: base 500 ms, doubling per attempt, capped at
//! 30 s, with ±20 % jitter to avoid thundering herds. Non-retryable failures
//! never consult the policy.

use rand::Rng;
use std::time::Duration;

/// Backoff configuration for one node's attempt loop
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Delay before the second attempt
    pub base_delay: Duration,
    /// Multiplier per subsequent attempt
    pub factor: f64,
    /// Jitter fraction applied symmetrically (0.2 = ±20 %)
    pub jitter: f64,
    /// Upper bound on any single delay
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(500),
            factor: 2.0,
            jitter: 0.2,
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Backoff before the attempt after `failed_attempt` (1-based), without
    /// jitter
    pub fn base_delay_for(&self, failed_attempt: u32) -> Duration {
        let exp = failed_attempt.saturating_sub(1).min(30);
        let millis = self.base_delay.as_millis() as f64 * self.factor.powi(exp as i32);
        let capped = millis.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }

    /// Backoff with jitter applied; this is what the attempt loop sleeps
    pub fn delay_for(&self, failed_attempt: u32) -> Duration {
        let base = self.base_delay_for(failed_attempt);
        if self.jitter <= 0.0 {
            return base;
        }
        let spread = rand::thread_rng().gen_range(-self.jitter..=self.jitter);
        let millis = base.as_millis() as f64 * (1.0 + spread);
        Duration::from_millis(millis.max(0.0) as u64)
    }

    /// Jitter bounds for a given failed attempt, for observability and tests
    pub fn delay_bounds_for(&self, failed_attempt: u32) -> (Duration, Duration) {
        let base = self.base_delay_for(failed_attempt).as_millis() as f64;
        (
            Duration::from_millis((base * (1.0 - self.jitter)) as u64),
            Duration::from_millis((base * (1.0 + self.jitter)) as u64),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_delays_double_and_cap() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.base_delay_for(1), Duration::from_millis(500));
        assert_eq!(policy.base_delay_for(2), Duration::from_millis(1000));
        assert_eq!(policy.base_delay_for(3), Duration::from_millis(2000));
        // 500ms * 2^9 = 256s, capped at 30s.
        assert_eq!(policy.base_delay_for(10), Duration::from_secs(30));
    }

    #[test]
    fn test_jittered_delay_stays_in_bounds() {
        let policy = RetryPolicy::default();
        for attempt in 1..=5 {
            let (lo, hi) = policy.delay_bounds_for(attempt);
            for _ in 0..50 {
                let delay = policy.delay_for(attempt);
                assert!(delay >= lo && delay <= hi, "{:?} not in [{:?}, {:?}]", delay, lo, hi);
            }
        }
    }

    #[test]
    fn test_zero_jitter_is_deterministic() {
        let policy = RetryPolicy {
            jitter: 0.0,
            ..Default::default()
        };
        assert_eq!(policy.delay_for(2), Duration::from_millis(1000));
    }

    #[test]
    fn test_large_attempt_does_not_overflow() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.base_delay_for(u32::MAX), Duration::from_secs(30));
    }
}
