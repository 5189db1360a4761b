//! Decision model: what to do with an envelope after its task body ran.
//!
//! The Decider is a pure function of (envelope, execution result, now). The
//! worker applies the Decision (status write, republish, ack) afterwards.

use chrono::{DateTime, Utc};

use super::envelope::TaskEnvelope;
use super::errors::{CourierError, ErrorKind, TaskError};

/// The next action to take for an executed envelope.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Body returned normally.
    Complete { result: serde_json::Value },

    /// Republish `envelope` (attempt incremented, `not_before` pushed out).
    Retry {
        envelope: TaskEnvelope,
        error: TaskError,
    },

    /// Give up: `FAILURE`.
    Fail { error: TaskError },
}

pub trait Decider: Send + Sync {
    fn decide(
        &self,
        envelope: &TaskEnvelope,
        result: &Result<serde_json::Value, CourierError>,
        now: DateTime<Utc>,
    ) -> Decision;
}

/// Attempt-based retry logic driven by the envelope's own `RetryPolicy`:
/// - retryable error (or transport error raised by the body) and
///   `attempt < max_attempts` -> Retry
/// - retryable error with the budget spent -> Fail (`RetryableTaskError`)
/// - anything else -> Fail immediately
#[derive(Debug, Clone, Default)]
pub struct DefaultDecider;

impl Decider for DefaultDecider {
    fn decide(
        &self,
        envelope: &TaskEnvelope,
        result: &Result<serde_json::Value, CourierError>,
        now: DateTime<Utc>,
    ) -> Decision {
        let err = match result {
            Ok(value) => {
                return Decision::Complete {
                    result: value.clone(),
                };
            }
            Err(err) => err,
        };

        let error = err.to_task_error();
        let retryable = matches!(
            error.kind,
            ErrorKind::RetryableTaskError | ErrorKind::TransportError
        );
        if !retryable {
            return Decision::Fail { error };
        }

        match envelope.next_retry(now) {
            Some(next) => Decision::Retry {
                envelope: next,
                error,
            },
            None => Decision::Fail {
                error: TaskError::new(
                    error.kind,
                    format!(
                        "{} (gave up after {}/{} retries)",
                        error.message,
                        envelope.attempt(),
                        envelope.retry_policy().max_attempts
                    ),
                ),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{QueueName, RetryPolicy, TaskId, TaskName};
    use crate::domain::retry::Backoff;
    use std::time::Duration;
    use ulid::Ulid;

    fn envelope(max_attempts: u32) -> TaskEnvelope {
        TaskEnvelope::new(
            TaskId::from_ulid(Ulid::new()),
            TaskName::new("t"),
            vec![],
            QueueName::default(),
            RetryPolicy::new(max_attempts, Backoff::fixed(Duration::from_secs(1))),
            Utc::now(),
        )
    }

    #[test]
    fn success_completes() {
        let d = DefaultDecider.decide(&envelope(3), &Ok(serde_json::json!(1)), Utc::now());
        assert_eq!(
            d,
            Decision::Complete {
                result: serde_json::json!(1)
            }
        );
    }

    #[test]
    fn retryable_error_schedules_retry_within_budget() {
        let now = Utc::now();
        let d = DefaultDecider.decide(&envelope(2), &Err(CourierError::retryable("flaky")), now);
        match d {
            Decision::Retry { envelope, error } => {
                assert_eq!(envelope.attempt(), 1);
                assert_eq!(envelope.not_before(), now + chrono::Duration::seconds(1));
                assert_eq!(error.kind, ErrorKind::RetryableTaskError);
            }
            other => panic!("expected retry, got {other:?}"),
        }
    }

    #[test]
    fn retryable_error_fails_when_budget_spent() {
        let env = envelope(0);
        let d = DefaultDecider.decide(&env, &Err(CourierError::retryable("flaky")), Utc::now());
        assert!(matches!(
            d,
            Decision::Fail { error } if error.kind == ErrorKind::RetryableTaskError
        ));
    }

    #[test]
    fn terminal_error_bypasses_retry_budget() {
        let d = DefaultDecider.decide(&envelope(5), &Err(CourierError::terminal("bad input")), Utc::now());
        assert!(matches!(
            d,
            Decision::Fail { error } if error.kind == ErrorKind::TerminalTaskError
        ));
    }

    #[test]
    fn undecodable_args_are_not_retried() {
        let d = DefaultDecider.decide(
            &envelope(5),
            &Err(CourierError::Serialization("expected string".into())),
            Utc::now(),
        );
        assert!(matches!(
            d,
            Decision::Fail { error } if error.kind == ErrorKind::SerializationError
        ));
    }
}
