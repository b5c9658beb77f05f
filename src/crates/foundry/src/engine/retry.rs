//! Retry and fallback decisions for one stage pass
//!
//! The policy is a plain state machine: the orchestrator reports each
//! failure and receives the next action. No timers or tasks live here.

use crate::config::ExecutionConfig;
use crate::error::FoundryError;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts per stage pass
    pub retry_limit: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub multiplier: f64,
    /// Consecutive provider errors on one model before failing over
    pub failover_after: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&ExecutionConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &ExecutionConfig) -> Self {
        Self {
            retry_limit: config.retry_limit,
            initial_backoff_ms: config.initial_backoff_ms,
            max_backoff_ms: config.max_backoff_ms,
            multiplier: config.backoff_multiplier,
            failover_after: config.failover_after,
        }
    }

    /// Delay after the `failures`-th failure (1-based)
    pub fn calculate_delay(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1) as i32;
        let delay_ms = (self.initial_backoff_ms as f64) * self.multiplier.powi(exponent);
        Duration::from_millis(delay_ms.min(self.max_backoff_ms as f64) as u64)
    }
}

/// What to do after a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextAction {
    Retry { delay: Duration, model_index: usize },
    Fail,
}

/// Attempt bookkeeping for a single stage pass
#[derive(Debug, Clone)]
pub struct AttemptState {
    attempts: u32,
    model_index: usize,
    model_count: usize,
    provider_streak: u32,
}

impl AttemptState {
    pub fn new(model_count: usize) -> Self {
        Self {
            attempts: 0,
            model_index: 0,
            model_count: model_count.max(1),
            provider_streak: 0,
        }
    }

    /// Count a new attempt and return its 1-based number
    pub fn begin_attempt(&mut self) -> u32 {
        self.attempts += 1;
        self.attempts
    }

    /// Un-count the last attempt (a commit race that is replayed)
    pub fn forgive_last(&mut self) {
        self.attempts = self.attempts.saturating_sub(1);
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Position in the selection's try order (0 = primary)
    pub fn model_index(&self) -> usize {
        self.model_index
    }

    pub fn on_failure(&mut self, policy: &RetryPolicy, error: &FoundryError) -> NextAction {
        if !error.is_retryable() || self.attempts >= policy.retry_limit {
            return NextAction::Fail;
        }

        match error {
            _ if error.implicates_model() => {
                // The model is the problem; never ask it again
                if !self.advance_model() {
                    return NextAction::Fail;
                }
                NextAction::Retry {
                    delay: Duration::ZERO,
                    model_index: self.model_index,
                }
            }
            FoundryError::Provider { .. } => {
                self.provider_streak += 1;
                let delay = policy.calculate_delay(self.attempts);
                if self.provider_streak >= policy.failover_after {
                    self.advance_model();
                }
                NextAction::Retry {
                    delay,
                    model_index: self.model_index,
                }
            }
            _ => {
                self.provider_streak = 0;
                NextAction::Retry {
                    delay: policy.calculate_delay(self.attempts),
                    model_index: self.model_index,
                }
            }
        }
    }

    fn advance_model(&mut self) -> bool {
        if self.model_index + 1 >= self.model_count {
            return false;
        }
        self.model_index += 1;
        self.provider_streak = 0;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TokenUsage;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            retry_limit: 3,
            initial_backoff_ms: 100,
            max_backoff_ms: 250,
            multiplier: 2.0,
            failover_after: 2,
        }
    }

    fn provider_err() -> FoundryError {
        FoundryError::provider("a:b", "503")
    }

    fn malformed() -> FoundryError {
        FoundryError::malformed("a:b", "bad", TokenUsage::default())
    }

    #[test]
    fn test_calculate_delay_exponential_and_capped() {
        let p = policy();
        assert_eq!(p.calculate_delay(1), Duration::from_millis(100));
        assert_eq!(p.calculate_delay(2), Duration::from_millis(200));
        assert_eq!(p.calculate_delay(3), Duration::from_millis(250));
    }

    #[test]
    fn test_retry_limit_counts_total_attempts() {
        let p = policy();
        let mut state = AttemptState::new(1);
        for expected in 1..=3 {
            assert_eq!(state.begin_attempt(), expected);
            let action = state.on_failure(&p, &provider_err());
            if expected < 3 {
                assert!(matches!(action, NextAction::Retry { .. }));
            } else {
                assert_eq!(action, NextAction::Fail);
            }
        }
    }

    #[test]
    fn test_malformed_moves_to_next_model_without_delay() {
        let mut state = AttemptState::new(3);
        state.begin_attempt();
        assert_eq!(
            state.on_failure(&policy(), &malformed()),
            NextAction::Retry { delay: Duration::ZERO, model_index: 1 }
        );
    }

    #[test]
    fn test_malformed_with_no_model_left_fails() {
        let mut state = AttemptState::new(1);
        state.begin_attempt();
        assert_eq!(state.on_failure(&policy(), &malformed()), NextAction::Fail);
    }

    #[test]
    fn test_provider_errors_fail_over_after_streak() {
        let p = policy();
        let mut state = AttemptState::new(2);
        state.begin_attempt();
        assert_eq!(
            state.on_failure(&p, &provider_err()),
            NextAction::Retry { delay: Duration::from_millis(100), model_index: 0 }
        );
        state.begin_attempt();
        assert_eq!(
            state.on_failure(&p, &provider_err()),
            NextAction::Retry { delay: Duration::from_millis(200), model_index: 1 }
        );
    }

    #[test]
    fn test_timeout_keeps_model_and_resets_streak() {
        let p = policy();
        let mut state = AttemptState::new(2);
        state.begin_attempt();
        state.on_failure(&p, &provider_err());
        state.begin_attempt();
        let timeout = FoundryError::Timeout { model: "a:b".into(), duration_ms: 5 };
        assert_eq!(
            state.on_failure(&p, &timeout),
            NextAction::Retry { delay: Duration::from_millis(200), model_index: 0 }
        );
    }

    #[test]
    fn test_fatal_errors_do_not_retry() {
        let mut state = AttemptState::new(2);
        state.begin_attempt();
        assert_eq!(
            state.on_failure(&policy(), &FoundryError::Validation("x".into())),
            NextAction::Fail
        );
        assert_eq!(
            state.on_failure(&policy(), &FoundryError::Config("x".into())),
            NextAction::Fail
        );
    }

    #[test]
    fn test_forgiven_attempt_is_not_counted() {
        let mut state = AttemptState::new(1);
        state.begin_attempt();
        state.forgive_last();
        assert_eq!(state.attempts(), 0);
        assert_eq!(state.begin_attempt(), 1);
    }
}
