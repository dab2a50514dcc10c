//! Bounded retry policy for authentication failures.
//!
//! Only 401 responses are retried. Between attempts an optional exponential
//! backoff with jitter is applied.

use std::time::Duration;

use rand::Rng;

/// How many attempts a request gets and how long to wait between them.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay_ms: u64,
    max_delay_ms: u64,
    variance_pct: f64,
}

impl RetryPolicy {
    /// One retry after a 401, no delay.
    pub fn standard() -> Self {
        Self {
            max_attempts: 2,
            base_delay_ms: 0,
            max_delay_ms: 0,
            variance_pct: 0.0,
        }
    }

    /// Three attempts with a short exponential backoff.
    pub fn secure() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 200,
            max_delay_ms: 2_000,
            variance_pct: 0.25,
        }
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_backoff(mut self, base_delay_ms: u64, max_delay_ms: u64) -> Self {
        self.base_delay_ms = base_delay_ms;
        self.max_delay_ms = max_delay_ms.max(base_delay_ms);
        self
    }

    pub fn with_variance(mut self, variance_pct: f64) -> Self {
        self.variance_pct = variance_pct.clamp(0.0, 1.0);
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Whether another attempt is allowed after `attempt` (1-based) failed.
    pub fn allows_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Delay to wait before attempt `attempt + 1`.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        if self.base_delay_ms == 0 {
            return Duration::ZERO;
        }

        let exponent = attempt.saturating_sub(1).min(16);
        let mut delay = self.base_delay_ms as f64 * f64::from(1u32 << exponent);

        if self.variance_pct > 0.0 {
            let spread = self.variance_pct;
            delay *= rand::thread_rng().gen_range(1.0 - spread..=1.0 + spread);
        }

        delay = delay.clamp(0.0, self.max_delay_ms as f64);
        Duration::from_millis(delay as u64)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_policy_retries_once_without_delay() {
        let policy = RetryPolicy::standard();
        assert!(policy.allows_retry(1));
        assert!(!policy.allows_retry(2));
        assert_eq!(policy.delay_after(1), Duration::ZERO);
    }

    #[test]
    fn secure_backoff_grows_and_is_clamped() {
        let policy = RetryPolicy::secure().with_variance(0.0);
        assert_eq!(policy.max_attempts(), 3);
        assert_eq!(policy.delay_after(1), Duration::from_millis(200));
        assert_eq!(policy.delay_after(2), Duration::from_millis(400));
        assert_eq!(policy.delay_after(10), Duration::from_millis(2_000));
    }

    #[test]
    fn jitter_stays_within_variance() {
        let policy = RetryPolicy::secure();
        let mut below = false;
        let mut above = false;
        for _ in 0..2_000 {
            let delay = policy.delay_after(1).as_millis();
            assert!((150..=250).contains(&delay), "delay {delay} out of range");
            below |= delay < 175;
            above |= delay > 225;
        }
        assert!(below && above, "jitter never left the inner half of the band");
    }

    #[test]
    fn at_least_one_attempt() {
        assert_eq!(RetryPolicy::standard().with_max_attempts(0).max_attempts(), 1);
    }
}
