//! Task lifecycle state.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a task, as seen through its status record.
///
/// State transitions:
/// - PENDING -> RUNNING -> SUCCESS
/// - PENDING -> RUNNING -> FAILURE (terminal error, unknown task, budget spent)
/// - PENDING -> RUNNING -> RETRY -> PENDING (loop until max_attempts)
/// - PENDING | RUNNING | RETRY -> FAILURE (out-of-band cancel, publish failure)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    Pending,
    Running,
    Success,
    Failure,
    Retry,
}

impl TaskState {
    /// No further transitions are accepted from a terminal state.
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Success | TaskState::Failure)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskState::Pending => "PENDING",
            TaskState::Running => "RUNNING",
            TaskState::Success => "SUCCESS",
            TaskState::Failure => "FAILURE",
            TaskState::Retry => "RETRY",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
