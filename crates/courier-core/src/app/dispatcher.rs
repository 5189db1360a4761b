//! Dispatcher - producer-side entry point.
//!
//! # Flow of `submit`
//! 1. allocate an id and build the envelope
//! 2. `StatusStore::create` writes `PENDING` (or finds a live record owning
//!    the dedup key, whose id is returned instead)
//! 3. `Broker::publish`
//! 4. if publishing still fails after local transport retries, the record is
//!    turned into `FAILURE` and the error is returned
//!
//! The status record is written before publishing, so a worker can never
//! observe an envelope without one.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;

use super::backoff::TransportRetry;
use crate::domain::{
    CourierError, ErrorKind, QueueName, RetryPolicy, StatusRecord, TaskEnvelope, TaskError, TaskId,
    TaskName,
};
use crate::ports::{Broker, Clock, CreateOutcome, IdGenerator, StatusStore, WriteOutcome};
use crate::typed::{PayloadCodec, Task};

/// What to run, where, and how to retry it.
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    pub name: TaskName,
    pub args: Vec<Value>,
    pub queue: QueueName,
    pub retry_policy: RetryPolicy,
    pub dedup_key: Option<String>,
    /// Earliest execution time; `None` means now.
    pub not_before: Option<DateTime<Utc>>,
}

impl SubmitRequest {
    pub fn new(name: impl Into<TaskName>, args: Vec<Value>) -> Self {
        Self {
            name: name.into(),
            args,
            queue: QueueName::default(),
            retry_policy: RetryPolicy::default(),
            dedup_key: None,
            not_before: None,
        }
    }

    /// Request for a typed task; args come from the codec.
    pub fn for_task<T: Task>(task: &T) -> Result<Self, CourierError> {
        Ok(Self::new(T::NAME, PayloadCodec::encode(task)?))
    }

    pub fn queue(mut self, queue: impl Into<QueueName>) -> Self {
        self.queue = queue.into();
        self
    }

    pub fn retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    pub fn dedup_key(mut self, key: impl Into<String>) -> Self {
        self.dedup_key = Some(key.into());
        self
    }

    pub fn not_before(mut self, at: DateTime<Utc>) -> Self {
        self.not_before = Some(at);
        self
    }
}

pub struct Dispatcher {
    broker: Arc<dyn Broker>,
    store: Arc<dyn StatusStore>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    status_ttl: Duration,
    transport: TransportRetry,
}

impl Dispatcher {
    pub fn new(
        broker: Arc<dyn Broker>,
        store: Arc<dyn StatusStore>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
        status_ttl: Duration,
        transport: TransportRetry,
    ) -> Self {
        Self {
            broker,
            store,
            clock,
            ids,
            status_ttl,
            transport,
        }
    }

    /// Submit a task; returns its id (or the id of the live duplicate).
    pub async fn submit(&self, request: SubmitRequest) -> Result<TaskId, CourierError> {
        let now = self.clock.now();
        let id = self.ids.generate_task_id();
        let envelope = TaskEnvelope::new(
            id,
            request.name,
            request.args,
            request.queue,
            request.retry_policy,
            request.not_before.unwrap_or(now),
        )
        .with_dedup_key(request.dedup_key);

        let record = StatusRecord::pending(&envelope, now);
        let created = self
            .transport
            .run("status create", || self.store.create(record.clone(), self.status_ttl))
            .await?;
        if let CreateOutcome::Existing(existing) = created {
            tracing::info!(
                task_id = %existing,
                dedup_key = envelope.dedup_key().unwrap_or_default(),
                "duplicate submission, returning existing task"
            );
            return Ok(existing);
        }

        let published = self
            .transport
            .run("publish", || self.broker.publish(envelope.queue(), &envelope))
            .await;
        if let Err(err) = published {
            tracing::error!(task_id = %id, queue = %envelope.queue(), error = %err, "publish failed");
            let failed = record.mark_failed(err.to_task_error(), self.clock.now());
            if let Err(write_err) = self
                .transport
                .run("status write", || self.store.transition(failed.clone(), self.status_ttl))
                .await
            {
                tracing::warn!(task_id = %id, error = %write_err, "could not record publish failure");
            }
            return Err(err);
        }

        tracing::info!(
            task_id = %id,
            name = %envelope.name(),
            queue = %envelope.queue(),
            "task submitted"
        );
        Ok(id)
    }

    /// Submit a typed task with default routing and retry policy.
    pub async fn submit_task<T: Task>(&self, task: &T) -> Result<TaskId, CourierError> {
        self.submit(SubmitRequest::for_task(task)?).await
    }

    /// Mark a non-terminal task `FAILURE`. Deliveries still in the broker
    /// are dropped by workers when they see the terminal record.
    pub async fn cancel(&self, id: TaskId, reason: &str) -> Result<StatusRecord, CourierError> {
        let current = self
            .transport
            .run("status get", || self.store.get(id))
            .await?
            .ok_or(CourierError::TaskNotFound(id))?;
        if current.is_terminal() {
            return Err(CourierError::AlreadyTerminal(id));
        }

        let cancelled = current.mark_failed(
            TaskError::new(ErrorKind::TerminalTaskError, format!("cancelled: {reason}")),
            self.clock.now(),
        );
        let outcome = self
            .transport
            .run("status write", || self.store.transition(cancelled.clone(), self.status_ttl))
            .await?;
        match outcome {
            WriteOutcome::Applied => {
                tracing::info!(task_id = %id, reason, "task cancelled");
                Ok(cancelled)
            }
            WriteOutcome::RejectedTerminal(_) => Err(CourierError::AlreadyTerminal(id)),
        }
    }
}
