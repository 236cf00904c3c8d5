//! Exponential backoff with a bounded attempt budget.

use rand::Rng;
use std::time::Duration;

use crate::config::OrchestratorConfig;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of `submit` calls per transaction
    pub max_attempts: u32,
    pub base: Duration,
    pub max: Duration,
    /// Add up to 25% random jitter
    pub jitter: bool,
}

impl RetryPolicy {
    pub fn from_config(config: &OrchestratorConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base: Duration::from_millis(config.backoff_base_ms),
            max: Duration::from_millis(config.backoff_max_ms),
            jitter: config.backoff_jitter,
        }
    }

    /// Whether another attempt is allowed after `attempts` calls
    #[inline]
    pub fn has_budget(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }

    /// Delay before the attempt following `attempts` completed calls:
    /// `base * 2^(attempts - 1)`, capped at `max`
    pub fn backoff(&self, attempts: u32) -> Duration {
        let exp = attempts.saturating_sub(1).min(31);
        let delay = self
            .base
            .checked_mul(1u32 << exp)
            .unwrap_or(self.max)
            .min(self.max);

        if !self.jitter || delay.is_zero() {
            return delay;
        }
        let spread = (delay.as_millis() as u64) / 4;
        let extra = rand::thread_rng().gen_range(0..=spread);
        (delay + Duration::from_millis(extra)).min(self.max)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&OrchestratorConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(jitter: bool) -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base: Duration::from_millis(100),
            max: Duration::from_millis(1_000),
            jitter,
        }
    }

    #[test]
    fn test_exponential_growth_and_cap() {
        let p = policy(false);
        assert_eq!(p.backoff(1), Duration::from_millis(100));
        assert_eq!(p.backoff(2), Duration::from_millis(200));
        assert_eq!(p.backoff(3), Duration::from_millis(400));
        assert_eq!(p.backoff(5), Duration::from_millis(1_000));
        assert_eq!(p.backoff(200), Duration::from_millis(1_000));
    }

    #[test]
    fn test_jitter_bounds() {
        let p = policy(true);
        for _ in 0..100 {
            let d = p.backoff(2);
            assert!(d >= Duration::from_millis(200));
            assert!(d <= Duration::from_millis(250));
        }
    }

    #[test]
    fn test_budget() {
        let p = policy(false);
        assert!(p.has_budget(0));
        assert!(p.has_budget(2));
        assert!(!p.has_budget(3));
    }
}
