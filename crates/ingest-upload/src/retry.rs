// Bounded, linear retry for chunk transfers.

use std::time::Duration;

/// Retry budget for a single chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkRetryPolicy {
    /// Total attempts, counting the first one.
    pub max_attempts: u32,
    /// Delay unit; grows linearly with the attempt number.
    pub backoff_step: Duration,
}

impl Default for ChunkRetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_step: Duration::from_millis(2000),
        }
    }
}

impl ChunkRetryPolicy {
    /// Delay to wait before `attempt` (1-indexed). The first attempt goes out immediately.
    pub fn delay_before_attempt(&self, attempt: u32) -> Duration {
        self.backoff_step
            .checked_mul(attempt.saturating_sub(1))
            .unwrap_or(Duration::MAX)
    }

    /// Whether another attempt may follow `attempts_made` failed ones.
    pub fn should_retry(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_grows_linearly() {
        let policy = ChunkRetryPolicy::default();
        assert_eq!(policy.delay_before_attempt(1), Duration::ZERO);
        assert_eq!(policy.delay_before_attempt(2), Duration::from_secs(2));
        assert_eq!(policy.delay_before_attempt(3), Duration::from_secs(4));
        assert_eq!(policy.delay_before_attempt(5), Duration::from_secs(8));
    }

    #[test]
    fn budget_is_three_attempts() {
        let policy = ChunkRetryPolicy::default();
        assert!(policy.should_retry(1));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
    }
}
