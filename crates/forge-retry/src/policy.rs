use std::time::Duration;

/// `{maxRetries, initialDelayMs, backoffMultiplier, maxDelayMs}` (§4.4).
/// Delay for attempt `n` (0-indexed retry count) is
/// `min(initialDelayMs * multiplier^n, maxDelayMs)`.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub backoff_multiplier: u32,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    /// `maxRetries=3, initial=1000, multiplier=2, maxDelay=4000` — produces
    /// the sequence 1s, 2s, 4s.
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 1000,
            backoff_multiplier: 2,
            max_delay_ms: 4000,
        }
    }
}

impl RetryPolicy {
    pub fn delay_for_attempt(&self, n: u32) -> Duration {
        let factor = (self.backoff_multiplier as u64).saturating_pow(n);
        let delay_ms = self.initial_delay_ms.saturating_mul(factor).min(self.max_delay_ms);
        Duration::from_millis(delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_produces_one_two_four_second_sequence() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(1000));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(2000));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(4000));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(4000), "clamps at maxDelay");
    }

    #[test]
    fn delay_sequence_is_monotonically_non_decreasing() {
        let policy = RetryPolicy::default();
        let mut previous = Duration::from_millis(0);
        for n in 0..6 {
            let delay = policy.delay_for_attempt(n);
            assert!(delay >= previous);
            previous = delay;
        }
    }
}
