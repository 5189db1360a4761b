//! TaskEnvelope - the unit of work that travels through the broker.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::TaskId;
use super::retry::RetryPolicy;
use super::task_type::{QueueName, TaskName};

/// Everything a worker needs to run one task.
///
/// Pure data: the Dispatcher builds it, the broker carries it, the worker
/// reads it. The only mutation is `next_retry`, which produces a new envelope
/// for republishing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEnvelope {
    id: TaskId,
    name: TaskName,
    #[serde(default)]
    args: Vec<serde_json::Value>,
    queue: QueueName,
    retry_policy: RetryPolicy,
    #[serde(default)]
    attempt: u32,
    not_before: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    dedup_key: Option<String>,
}

impl TaskEnvelope {
    pub fn new(
        id: TaskId,
        name: TaskName,
        args: Vec<serde_json::Value>,
        queue: QueueName,
        retry_policy: RetryPolicy,
        not_before: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            name,
            args,
            queue,
            retry_policy,
            attempt: 0,
            not_before,
            dedup_key: None,
        }
    }

    pub fn with_dedup_key(mut self, key: Option<String>) -> Self {
        self.dedup_key = key;
        self
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn name(&self) -> &TaskName {
        &self.name
    }

    pub fn args(&self) -> &[serde_json::Value] {
        &self.args
    }

    pub fn queue(&self) -> &QueueName {
        &self.queue
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn not_before(&self) -> DateTime<Utc> {
        self.not_before
    }

    pub fn dedup_key(&self) -> Option<&str> {
        self.dedup_key.as_deref()
    }

    /// Is the envelope eligible for execution at `now`?
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.not_before <= now
    }

    /// Envelope for the next retry, or `None` when the budget is spent.
    ///
    /// `attempt` is incremented and `not_before` pushed out by the policy's
    /// backoff for that retry.
    pub fn next_retry(&self, now: DateTime<Utc>) -> Option<Self> {
        if !self.retry_policy.can_retry(self.attempt) {
            return None;
        }
        let attempt = self.attempt + 1;
        let delay = self.retry_policy.next_delay(attempt);
        let delay = chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::MAX);
        Some(Self {
            attempt,
            not_before: now.checked_add_signed(delay).unwrap_or(DateTime::<Utc>::MAX_UTC),
            ..self.clone()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::retry::Backoff;
    use chrono::TimeZone;
    use std::time::Duration;
    use ulid::Ulid;

    fn envelope(max_attempts: u32) -> TaskEnvelope {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        TaskEnvelope::new(
            TaskId::from_ulid(Ulid::new()),
            TaskName::new("echo"),
            vec![serde_json::json!("hi")],
            QueueName::default(),
            RetryPolicy::new(max_attempts, Backoff::fixed(Duration::from_secs(5))),
            now,
        )
    }

    #[test]
    fn next_retry_increments_attempt_and_delays() {
        let env = envelope(2);
        let now = env.not_before();

        let retry = env.next_retry(now).unwrap();
        assert_eq!(retry.attempt(), 1);
        assert_eq!(retry.id(), env.id());
        assert_eq!(retry.not_before(), now + chrono::Duration::seconds(5));
        assert!(!retry.is_due(now));
    }

    #[test]
    fn next_retry_stops_at_max_attempts() {
        let env = envelope(1);
        let now = env.not_before();

        let first = env.next_retry(now).unwrap();
        assert_eq!(first.attempt(), 1);
        assert!(first.next_retry(now).is_none());
    }

    #[test]
    fn envelope_json_shape_is_stable() {
        let env = envelope(3).with_dedup_key(Some("k1".into()));
        let v = serde_json::to_value(&env).unwrap();
        assert_eq!(v["name"], "echo");
        assert_eq!(v["queue"], "default");
        assert_eq!(v["attempt"], 0);
        assert_eq!(v["args"][0], "hi");
        assert_eq!(v["dedup_key"], "k1");
        assert_eq!(v["retry_policy"]["backoff"]["kind"], "fixed");
    }
}
