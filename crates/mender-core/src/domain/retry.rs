//! Retry policy: attempt budget and backoff delays.

use std::time::Duration;

/// Reference attempt budget per step.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Retry policy shared by every step of the pipeline.
///
/// The budget is uniform; there is no per-step override.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Attempts allowed per step run (including the first).
    pub max_attempts: u32,

    /// Delay before the first retry.
    pub base_delay: Duration,

    /// Backoff multiplier for exponential backoff.
    pub multiplier: f64,

    /// Upper bound on any single delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: Duration::from_secs(5),
            multiplier: 2.0,
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// True when `attempt` (1-indexed) used up the budget.
    pub fn is_exhausted(&self, attempt: u32) -> bool {
        attempt >= self.max_attempts
    }

    /// Delay before retrying after attempt `attempts` failed.
    ///
    /// delay = base_delay * multiplier^(attempts - 1), capped at `max_delay`.
    ///
    /// Example with base_delay=5s, multiplier=2.0:
    /// - attempt 1 failed: 5s
    /// - attempt 2 failed: 10s
    /// - attempt 3 failed: 20s
    pub fn next_delay(&self, attempts: u32) -> Duration {
        let base_secs = self.base_delay.as_secs_f64();
        let exponent = attempts.saturating_sub(1).min(i32::MAX as u32) as i32;
        let delay_secs = base_secs * self.multiplier.powi(exponent);
        if !delay_secs.is_finite() || delay_secs >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(delay_secs.max(0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_matches_reference_budget() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert!(!policy.is_exhausted(2));
        assert!(policy.is_exhausted(3));
        assert!(policy.is_exhausted(4));
    }

    #[test]
    fn exponential_backoff_increases() {
        let policy = RetryPolicy::default();

        let d1 = policy.next_delay(1);
        let d2 = policy.next_delay(2);
        let d3 = policy.next_delay(3);

        assert!(d2 > d1);
        assert!(d3 > d2);
        assert_eq!(d1, Duration::from_secs(5));
        assert_eq!(d2, Duration::from_secs(10));
        assert_eq!(d3, Duration::from_secs(20));
    }

    #[test]
    fn backoff_is_capped() {
        let policy = RetryPolicy {
            max_delay: Duration::from_secs(12),
            ..RetryPolicy::default()
        };
        assert_eq!(policy.next_delay(3), Duration::from_secs(12));
        assert_eq!(policy.next_delay(u32::MAX), Duration::from_secs(12));
    }

    #[test]
    fn attempt_zero_uses_base_delay() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.next_delay(0), policy.base_delay);
    }
}
