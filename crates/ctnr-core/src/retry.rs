use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::RetryDefaults;

/// Backoff curve applied between retry attempts of a single step.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum BackoffStrategy {
    Fixed,
    Exponential { multiplier: f64 },
}

/// Per-step retry policy: how many attempts, how long to wait between them,
/// and whether a fixer should run before the next attempt.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub strategy: BackoffStrategy,
    /// Whether this step's errors classified `is_fixable` should route through
    /// the AI-assisted fixer before the next attempt rather than retrying as-is.
    pub allow_fixer: bool,
}

impl RetryPolicy {
    pub fn from_defaults(defaults: &RetryDefaults) -> Self {
        Self {
            max_attempts: defaults.max_attempts,
            initial_backoff: Duration::from_millis(defaults.initial_backoff_ms),
            max_backoff: Duration::from_millis(defaults.max_backoff_ms),
            strategy: BackoffStrategy::Exponential {
                multiplier: defaults.backoff_multiplier,
            },
            allow_fixer: true,
        }
    }

    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::from_millis(0),
            max_backoff: Duration::from_millis(0),
            strategy: BackoffStrategy::Fixed,
            allow_fixer: false,
        }
    }

    /// Backoff duration before attempt number `attempt` (1-based: the delay
    /// waited before making attempt `attempt`, so `attempt=1` has no delay).
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }

        let delay = match self.strategy {
            BackoffStrategy::Fixed => self.initial_backoff,
            BackoffStrategy::Exponential { multiplier } => {
                let exp = (attempt - 1) as i32 - 1;
                let factor = multiplier.powi(exp.max(0));
                let millis = (self.initial_backoff.as_millis() as f64 * factor).max(0.0);
                Duration::from_millis(millis as u64)
            }
        };

        delay.min(self.max_backoff)
    }

    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_defaults(&RetryDefaults::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_delay_before_first_attempt() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff_for_attempt(1), Duration::ZERO);
    }

    #[test]
    fn exponential_backoff_grows_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(1000),
            strategy: BackoffStrategy::Exponential { multiplier: 2.0 },
            allow_fixer: true,
        };

        let d2 = policy.backoff_for_attempt(2);
        let d3 = policy.backoff_for_attempt(3);
        assert_eq!(d2, Duration::from_millis(100));
        assert_eq!(d3, Duration::from_millis(200));

        let d_large = policy.backoff_for_attempt(20);
        assert_eq!(d_large, Duration::from_millis(1000));
    }

    #[test]
    fn should_retry_respects_max_attempts() {
        let policy = RetryPolicy {
            max_attempts: 3,
            ..RetryPolicy::default()
        };
        assert!(policy.should_retry(1));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
    }
}
