//! Errors and their operational classification.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use super::ids::{LeaseId, TaskId};
use super::task_type::{QueueName, TaskName};

/// Classification recorded in a `FAILURE` (or `RETRY`) status record.
///
/// Serialized with the names callers poll for, e.g. `"UnknownTaskError"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Broker or store unreachable.
    TransportError,
    /// Malformed envelope or record.
    SerializationError,
    /// No task body registered under the envelope's name.
    UnknownTaskError,
    /// Task body signalled a transient failure.
    RetryableTaskError,
    /// Task body signalled a permanent failure.
    TerminalTaskError,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Structured error description stored in a status record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskError {
    pub kind: ErrorKind,
    pub message: String,
}

impl TaskError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Error type shared by every layer of the core.
#[derive(Debug, thiserror::Error)]
pub enum CourierError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("no task body registered for name={0}")]
    UnknownTask(TaskName),

    #[error("retryable task error: {0}")]
    RetryableTask(String),

    #[error("terminal task error: {0}")]
    TerminalTask(String),

    #[error("queue {queue} is full ({depth} messages)")]
    Backpressure { queue: QueueName, depth: usize },

    #[error("lease {0} expired or unknown")]
    LeaseExpired(LeaseId),

    #[error("task {0} not found")]
    TaskNotFound(TaskId),

    #[error("task {0} already reached a terminal state")]
    AlreadyTerminal(TaskId),

    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),

    #[error("schedule not found: {0}")]
    ScheduleNotFound(String),

    #[error("task body timed out after {0:?}")]
    Timeout(Duration),
}

impl CourierError {
    /// Convenience constructor for task bodies signalling a transient failure.
    pub fn retryable(message: impl Into<String>) -> Self {
        CourierError::RetryableTask(message.into())
    }

    /// Convenience constructor for task bodies signalling a permanent failure.
    pub fn terminal(message: impl Into<String>) -> Self {
        CourierError::TerminalTask(message.into())
    }

    /// Should the calling layer retry the operation locally with backoff?
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CourierError::Transport(_) | CourierError::Backpressure { .. }
        )
    }

    /// How this error is recorded when it ends a task attempt.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CourierError::Transport(_) | CourierError::Backpressure { .. } => {
                ErrorKind::TransportError
            }
            CourierError::Serialization(_) => ErrorKind::SerializationError,
            CourierError::UnknownTask(_) => ErrorKind::UnknownTaskError,
            CourierError::RetryableTask(_) | CourierError::Timeout(_) => {
                ErrorKind::RetryableTaskError
            }
            CourierError::TerminalTask(_)
            | CourierError::LeaseExpired(_)
            | CourierError::TaskNotFound(_)
            | CourierError::AlreadyTerminal(_)
            | CourierError::InvalidSchedule(_)
            | CourierError::ScheduleNotFound(_) => ErrorKind::TerminalTaskError,
        }
    }

    pub fn to_task_error(&self) -> TaskError {
        let message = match self {
            CourierError::RetryableTask(m)
            | CourierError::TerminalTask(m)
            | CourierError::Transport(m)
            | CourierError::Serialization(m) => m.clone(),
            other => other.to_string(),
        };
        TaskError::new(self.kind(), message)
    }
}

impl From<serde_json::Error> for CourierError {
    fn from(e: serde_json::Error) -> Self {
        CourierError::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn error_kind_serializes_as_polled_names() {
        let s = serde_json::to_string(&ErrorKind::UnknownTaskError).unwrap();
        assert_eq!(s, "\"UnknownTaskError\"");
    }

    #[rstest]
    #[case::transport(CourierError::Transport("down".into()), ErrorKind::TransportError, true)]
    #[case::serde(CourierError::Serialization("bad".into()), ErrorKind::SerializationError, false)]
    #[case::unknown(CourierError::UnknownTask(TaskName::new("x")), ErrorKind::UnknownTaskError, false)]
    #[case::retryable(CourierError::retryable("flaky"), ErrorKind::RetryableTaskError, false)]
    #[case::terminal(CourierError::terminal("nope"), ErrorKind::TerminalTaskError, false)]
    #[case::timeout(CourierError::Timeout(Duration::from_secs(1)), ErrorKind::RetryableTaskError, false)]
    fn classification(
        #[case] err: CourierError,
        #[case] kind: ErrorKind,
        #[case] transient: bool,
    ) {
        assert_eq!(err.kind(), kind);
        assert_eq!(err.is_transient(), transient);
    }

    #[test]
    fn task_error_keeps_body_message() {
        let err = CourierError::retryable("db locked").to_task_error();
        assert_eq!(err.kind, ErrorKind::RetryableTaskError);
        assert_eq!(err.message, "db locked");
    }
}
