use crate::error::DeliveryError;
use std::time::Duration;

/// Backoff policy for transient delivery failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Whether another attempt is allowed after `attempts` failures.
    /// Permanent errors are never retried.
    pub fn should_retry(&self, attempts: u32, error: &DeliveryError) -> bool {
        if attempts >= self.max_attempts {
            return false;
        }
        error.is_transient()
    }

    /// Delay before the next attempt: base doubling per completed
    /// attempt, capped.
    pub fn delay_for(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(16);
        let multiplier = 2u32.saturating_pow(exponent);
        let delay = self.base_delay.saturating_mul(multiplier);
        delay.min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_doubles_per_attempt_and_caps() {
        let policy = RetryPolicy::new(10, Duration::from_secs(2), Duration::from_secs(60));

        let cases = [
            (1, Duration::from_secs(2)),
            (2, Duration::from_secs(4)),
            (3, Duration::from_secs(8)),
            (4, Duration::from_secs(16)),
            (5, Duration::from_secs(32)),
            (6, Duration::from_secs(60)), // 64s, capped
            (7, Duration::from_secs(60)),
        ];
        for (attempts, expected) in cases {
            assert_eq!(policy.delay_for(attempts), expected, "attempt {}", attempts);
        }

        // Large attempt counts saturate instead of overflowing
        assert_eq!(policy.delay_for(u32::MAX), Duration::from_secs(60));
    }

    #[test]
    fn permanent_errors_and_exhausted_budgets_stop_retries() {
        let policy = RetryPolicy::new(3, Duration::from_secs(2), Duration::from_secs(60));
        let transient = DeliveryError::Transient("503".to_string());
        let permanent = DeliveryError::Permanent("400".to_string());

        assert!(policy.should_retry(1, &transient));
        assert!(policy.should_retry(2, &transient));
        assert!(!policy.should_retry(3, &transient), "attempt budget spent");
        assert!(!policy.should_retry(1, &permanent));
    }
}
