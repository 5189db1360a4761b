//! Status record: the polled view of one task's lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::envelope::TaskEnvelope;
use super::errors::TaskError;
use super::ids::TaskId;
use super::state::TaskState;
use super::task_type::{QueueName, TaskName};

/// Status record keyed by task id.
///
/// - `result` is only set in `SUCCESS`.
/// - `error` is set in `FAILURE`, and carries the last failure while `RETRY`.
/// - `updated_at` moves on every transition.
///
/// Expiry lives in the store (refreshed on every write), not in the record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusRecord {
    pub id: TaskId,
    pub name: TaskName,
    #[serde(default)]
    pub args: Vec<serde_json::Value>,
    pub queue: QueueName,
    pub state: TaskState,
    #[serde(default)]
    pub attempt: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<TaskError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dedup_key: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl StatusRecord {
    /// Fresh `PENDING` record for an envelope about to be published.
    pub fn pending(envelope: &TaskEnvelope, now: DateTime<Utc>) -> Self {
        Self {
            id: envelope.id(),
            name: envelope.name().clone(),
            args: envelope.args().to_vec(),
            queue: envelope.queue().clone(),
            state: TaskState::Pending,
            attempt: envelope.attempt(),
            result: None,
            error: None,
            dedup_key: envelope.dedup_key().map(str::to_string),
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Mark as running (delivered to a worker slot).
    pub fn mark_running(mut self, attempt: u32, now: DateTime<Utc>) -> Self {
        self.state = TaskState::Running;
        self.attempt = attempt;
        self.error = None;
        self.touch(now)
    }

    pub fn mark_succeeded(mut self, result: serde_json::Value, now: DateTime<Utc>) -> Self {
        self.state = TaskState::Success;
        self.result = Some(result);
        self.error = None;
        self.touch(now)
    }

    pub fn mark_failed(mut self, error: TaskError, now: DateTime<Utc>) -> Self {
        self.state = TaskState::Failure;
        self.result = None;
        self.error = Some(error);
        self.touch(now)
    }

    /// Retry scheduled: keep the failure that caused it for observability.
    pub fn mark_retry(mut self, error: TaskError, now: DateTime<Utc>) -> Self {
        self.state = TaskState::Retry;
        self.error = Some(error);
        self.touch(now)
    }

    /// Back to `PENDING` once the retry envelope is published.
    pub fn requeue(mut self, attempt: u32, now: DateTime<Utc>) -> Self {
        self.state = TaskState::Pending;
        self.attempt = attempt;
        self.touch(now)
    }

    /// `updated_at` never moves backwards, even if clocks disagree.
    fn touch(mut self, now: DateTime<Utc>) -> Self {
        self.updated_at = self.updated_at.max(now);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::errors::ErrorKind;
    use crate::domain::retry::RetryPolicy;
    use chrono::TimeZone;
    use ulid::Ulid;

    fn record() -> StatusRecord {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let env = TaskEnvelope::new(
            TaskId::from_ulid(Ulid::new()),
            TaskName::new("echo"),
            vec![serde_json::json!("hi")],
            QueueName::default(),
            RetryPolicy::default(),
            now,
        );
        StatusRecord::pending(&env, now)
    }

    #[test]
    fn success_carries_result_only() {
        let r = record();
        let now = r.updated_at + chrono::Duration::seconds(1);
        let r = r
            .mark_retry(TaskError::new(ErrorKind::RetryableTaskError, "x"), now)
            .requeue(1, now)
            .mark_running(1, now)
            .mark_succeeded(serde_json::json!("hi"), now);

        assert_eq!(r.state, TaskState::Success);
        assert_eq!(r.result, Some(serde_json::json!("hi")));
        assert!(r.error.is_none());
        assert_eq!(r.attempt, 1);
    }

    #[test]
    fn updated_at_is_monotonic() {
        let r = record();
        let earlier = r.updated_at - chrono::Duration::seconds(10);
        let r2 = r.clone().mark_running(0, earlier);
        assert_eq!(r2.updated_at, r.updated_at);
    }

    #[test]
    fn record_json_uses_stable_schema() {
        let r = record().mark_failed(
            TaskError::new(ErrorKind::UnknownTaskError, "no body"),
            Utc::now(),
        );
        let v = serde_json::to_value(&r).unwrap();
        assert_eq!(v["state"], "FAILURE");
        assert_eq!(v["error"]["kind"], "UnknownTaskError");
        assert!(v.get("result").is_none());
    }
}
