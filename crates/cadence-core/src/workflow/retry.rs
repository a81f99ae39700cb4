//! Retry policy for retryable step failures.
//!
//! Stateless: the attempt counter lives on the step log, so every decision is
//! a function of the step's effective `RetryConfig` and that counter.

use chrono::Duration;

use cadence_types::config::RetrySettings;
use cadence_types::workflow::{RetryConfig, StepDefinition};

/// What to do after a step attempt failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Schedule the next attempt after `delay`.
    RetryAfter { delay: Duration, next_attempt: u32 },
    /// Budget exhausted or the failure is permanent.
    GiveUp,
}

/// Stateless retry handler for step failures.
pub struct RetryHandler;

impl RetryHandler {
    /// Effective policy of `step`: its own block, else the per-type default,
    /// else the engine default.
    pub fn policy_for<'a>(step: &'a StepDefinition, settings: &'a RetrySettings) -> &'a RetryConfig {
        step.retry
            .as_ref()
            .unwrap_or_else(|| settings.for_step_type(step.step_type()))
    }

    /// Whether another attempt fits in the budget. `attempt` is 1-based.
    pub fn should_retry(config: &RetryConfig, attempt: u32) -> bool {
        attempt < config.max_attempts
    }

    /// Wait before the attempt following failed attempt `attempt` (1-based):
    /// `base * multiplier^(attempt-1)`, capped at `max_delay_secs`.
    pub fn backoff(config: &RetryConfig, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let raw = config.base_delay_secs as f64 * config.multiplier.max(1.0).powi(exponent);
        let capped = if raw.is_finite() {
            raw.min(config.max_delay_secs as f64)
        } else {
            config.max_delay_secs as f64
        };
        Duration::milliseconds((capped * 1000.0).round() as i64)
    }

    pub fn decide(config: &RetryConfig, attempt: u32, retryable: bool) -> RetryDecision {
        if retryable && Self::should_retry(config, attempt) {
            RetryDecision::RetryAfter {
                delay: Self::backoff(config, attempt),
                next_attempt: attempt + 1,
            }
        } else {
            RetryDecision::GiveUp
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use cadence_types::workflow::{MessageChannel, StepConfig, StepType};

    use super::*;

    fn config() -> RetryConfig {
        RetryConfig {
            max_attempts: 3,
            base_delay_secs: 10,
            multiplier: 2.0,
            max_delay_secs: 60,
        }
    }

    fn send_step(retry: Option<RetryConfig>) -> StepDefinition {
        StepDefinition {
            id: "send".to_string(),
            name: None,
            config: StepConfig::SendMessage {
                channel: MessageChannel::Email,
                subject: None,
                body: "hi".to_string(),
                to: None,
            },
            next: None,
            branches: BTreeMap::new(),
            default_next: None,
            retry,
            timeout_secs: None,
        }
    }

    #[test]
    fn test_should_retry_within_budget() {
        assert!(RetryHandler::should_retry(&config(), 1));
        assert!(RetryHandler::should_retry(&config(), 2));
        assert!(!RetryHandler::should_retry(&config(), 3));
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let cfg = config();
        assert_eq!(RetryHandler::backoff(&cfg, 1), Duration::seconds(10));
        assert_eq!(RetryHandler::backoff(&cfg, 2), Duration::seconds(20));
        assert_eq!(RetryHandler::backoff(&cfg, 3), Duration::seconds(40));
        assert_eq!(RetryHandler::backoff(&cfg, 4), Duration::seconds(60));
        assert_eq!(RetryHandler::backoff(&cfg, 500), Duration::seconds(60));
    }

    #[test]
    fn test_decide() {
        let cfg = config();
        assert_eq!(
            RetryHandler::decide(&cfg, 1, true),
            RetryDecision::RetryAfter {
                delay: Duration::seconds(10),
                next_attempt: 2
            }
        );
        assert_eq!(RetryHandler::decide(&cfg, 3, true), RetryDecision::GiveUp);
        assert_eq!(RetryHandler::decide(&cfg, 1, false), RetryDecision::GiveUp);
    }

    #[test]
    fn test_policy_precedence() {
        let mut settings = RetrySettings::default();
        let per_type = RetryConfig {
            max_attempts: 7,
            ..RetryConfig::default()
        };
        settings
            .per_step_type
            .insert(StepType::SendMessage, per_type.clone());

        assert_eq!(RetryHandler::policy_for(&send_step(None), &settings), &per_type);
        assert_eq!(
            RetryHandler::policy_for(&send_step(Some(config())), &settings),
            &config()
        );

        let settings = RetrySettings::default();
        assert_eq!(
            RetryHandler::policy_for(&send_step(None), &settings),
            &RetryConfig::default()
        );
    }
}
