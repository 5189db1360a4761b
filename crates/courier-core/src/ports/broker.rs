//! Broker port - durable, at-least-once transport of envelopes by queue.
//!
//! # Delivery contract
//! - `publish` returns once the broker holds the envelope.
//! - A received envelope is invisible to other consumers until it is acked,
//!   nacked, or its visibility timeout elapses. After the timeout it becomes
//!   redeliverable, so duplicates are possible and no delivery is lost.
//!   Holders of a live lease may `extend` it.
//! - FIFO within a queue is best-effort: requeued or reclaimed messages may
//!   come back after later ones.
//! - Envelopes whose `not_before` is in the future are held back until due.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::app::backoff::TransportRetry;
use crate::domain::{CourierError, LeaseId, QueueName, TaskEnvelope};

/// Proof of one delivery; required to ack or nack it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckHandle {
    pub queue: QueueName,
    pub lease_id: LeaseId,
    /// How many times this message has been handed out (1 on first delivery).
    pub delivery_count: u32,
}

/// One leased copy of an envelope.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub envelope: TaskEnvelope,
    pub handle: AckHandle,
}

/// Queue introspection for the monitoring feed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueDepth {
    pub ready: usize,
    pub delayed: usize,
    pub in_flight: usize,
    pub dead_lettered: usize,
}

#[async_trait]
pub trait Broker: Send + Sync {
    /// Store `envelope` on `queue`.
    ///
    /// Errors: `Transport` if unreachable, `Serialization` if the envelope
    /// cannot be encoded, `Backpressure` if the queue is at its depth limit.
    async fn publish(&self, queue: &QueueName, envelope: &TaskEnvelope) -> Result<(), CourierError>;

    /// Lease the next visible envelope, waiting up to `wait`.
    async fn receive(&self, queue: &QueueName, wait: Duration) -> Result<Option<Delivery>, CourierError>;

    /// Remove the delivered message for good.
    ///
    /// Returns `LeaseExpired` when the visibility timeout already handed the
    /// message to someone else.
    async fn ack(&self, handle: &AckHandle) -> Result<(), CourierError>;

    /// Push the visibility deadline of a delivery to `now + by`.
    ///
    /// Workers call this while a body is still running so the message is not
    /// handed to a second consumer. Returns `LeaseExpired` when the deadline
    /// already passed or the lease is unknown.
    async fn extend(&self, handle: &AckHandle, by: Duration) -> Result<(), CourierError>;

    /// Give the message back (`requeue = true`) or dead-letter it.
    async fn nack(&self, handle: &AckHandle, requeue: bool) -> Result<(), CourierError>;

    /// Return every delivery whose visibility timeout elapsed to its queue.
    async fn reclaim_expired(&self) -> Result<usize, CourierError>;

    async fn depth(&self, queue: &QueueName) -> Result<QueueDepth, CourierError>;
}

/// `consume(queue)`: a lazy, infinite, non-restartable sequence of deliveries.
///
/// Transient broker errors are retried here with exponential backoff, so the
/// caller only ever sees a delivery or a non-transient error.
pub struct Consumer {
    broker: Arc<dyn Broker>,
    queue: QueueName,
    wait: Duration,
    retry: TransportRetry,
    failures: u32,
}

impl Consumer {
    pub fn new(broker: Arc<dyn Broker>, queue: QueueName, wait: Duration, retry: TransportRetry) -> Self {
        Self {
            broker,
            queue,
            wait,
            retry,
            failures: 0,
        }
    }

    pub fn queue(&self) -> &QueueName {
        &self.queue
    }

    /// Wait for the next delivery. Never returns `Ok` without one.
    pub async fn next(&mut self) -> Result<Delivery, CourierError> {
        loop {
            match self.broker.receive(&self.queue, self.wait).await {
                Ok(Some(delivery)) => {
                    self.failures = 0;
                    return Ok(delivery);
                }
                Ok(None) => {
                    self.failures = 0;
                }
                Err(err) if err.is_transient() => {
                    self.failures = self.failures.saturating_add(1);
                    let delay = self.retry.delay_for(self.failures);
                    tracing::warn!(
                        queue = %self.queue,
                        failures = self.failures,
                        ?delay,
                        error = %err,
                        "broker receive failed, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Start consuming `queue`.
pub fn consume(broker: Arc<dyn Broker>, queue: QueueName, wait: Duration, retry: TransportRetry) -> Consumer {
    Consumer::new(broker, queue, wait, retry)
}
