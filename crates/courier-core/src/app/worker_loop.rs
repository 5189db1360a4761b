//! WorkerPool - bounded set of slots executing envelopes.
//!
//! # Per-delivery flow
//! 1. not yet due -> nack with requeue (the broker delays it)
//! 2. status record already terminal -> ack and drop without executing
//! 3. write `RUNNING`
//! 4. look up the body; unknown name -> `FAILURE` / `UnknownTaskError`
//! 5. run the body (optionally under a timeout) while renewing the delivery's
//!    lease, then ask the Decider
//! 6. write `SUCCESS` / `FAILURE`, or `RETRY` + republish + `PENDING`
//! 7. ack
//!
//! Ack happens only after the status write succeeded. If any write fails the
//! delivery is left alone and comes back after the visibility timeout.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::backoff::TransportRetry;
use crate::config::{BrokerConfig, WorkerConfig};
use crate::domain::{CourierError, Decider, Decision, StatusRecord};
use crate::ports::{AckHandle, Broker, Clock, Consumer, Delivery, StatusStore, WriteOutcome};
use crate::typed::{DynHandler, TypedRegistry};

/// Everything a slot needs; shared by all slots of a pool.
pub struct WorkerContext {
    pub broker: Arc<dyn Broker>,
    pub store: Arc<dyn StatusStore>,
    pub registry: Arc<TypedRegistry>,
    pub decider: Arc<dyn Decider>,
    pub clock: Arc<dyn Clock>,
    pub status_ttl: Duration,
    pub task_timeout: Option<Duration>,
    /// Renewal period and extension length for the lease of a running delivery.
    pub lease_renewal: LeaseRenewal,
    pub transport: TransportRetry,
}

/// Keeps a delivery leased while its body runs: every `every`, the deadline
/// is pushed to `now + extend_by`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaseRenewal {
    pub every: Duration,
    pub extend_by: Duration,
}

impl LeaseRenewal {
    pub fn from_config(config: &BrokerConfig) -> Self {
        Self {
            every: config.lease_renew_interval(),
            extend_by: config.visibility_timeout(),
        }
    }
}

/// How a delivery ended, from the slot's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Processed {
    Succeeded,
    Failed,
    Retried,
    /// Not due yet; handed back to the broker.
    Deferred,
    /// Record already terminal; dropped without executing.
    Skipped,
}

impl WorkerContext {
    /// Drive one delivery to completion.
    pub async fn process(&self, delivery: Delivery) -> Result<Processed, CourierError> {
        let Delivery { envelope, handle } = delivery;
        let now = self.clock.now();

        if !envelope.is_due(now) {
            self.transport
                .run("nack", || self.broker.nack(&handle, true))
                .await?;
            return Ok(Processed::Deferred);
        }

        let id = envelope.id();
        let current = self
            .transport
            .run("status get", || self.store.get(id))
            .await?;
        if current.as_ref().is_some_and(StatusRecord::is_terminal) {
            tracing::debug!(task_id = %id, "record already terminal, dropping delivery");
            self.ack(&handle).await?;
            return Ok(Processed::Skipped);
        }

        let running = current
            .unwrap_or_else(|| StatusRecord::pending(&envelope, now))
            .mark_running(envelope.attempt(), now);
        if !self.write(running.clone()).await? {
            self.ack(&handle).await?;
            return Ok(Processed::Skipped);
        }

        let Some(handler) = self.registry.lookup(envelope.name()) else {
            tracing::warn!(task_id = %id, name = %envelope.name(), "no task body registered");
            let err = CourierError::UnknownTask(envelope.name().clone());
            self.write(running.mark_failed(err.to_task_error(), self.clock.now()))
                .await?;
            self.ack(&handle).await?;
            return Ok(Processed::Failed);
        };

        tracing::debug!(task_id = %id, name = %envelope.name(), attempt = envelope.attempt(), "executing");
        let result = tokio::select! {
            result = self.execute(handler, envelope.args().to_vec()) => result,
            never = self.keep_leased(&handle) => match never {},
        };

        let now = self.clock.now();
        let processed = match self.decider.decide(&envelope, &result, now) {
            Decision::Complete { result } => {
                self.write(running.mark_succeeded(result, now)).await?;
                tracing::info!(task_id = %id, name = %envelope.name(), "task succeeded");
                Processed::Succeeded
            }
            Decision::Fail { error } => {
                tracing::warn!(task_id = %id, name = %envelope.name(), error = %error, "task failed");
                self.write(running.mark_failed(error, now)).await?;
                Processed::Failed
            }
            Decision::Retry { envelope: next, error } => {
                let retrying = running.mark_retry(error, now);
                if self.write(retrying.clone()).await? {
                    self.transport
                        .run("publish retry", || self.broker.publish(next.queue(), &next))
                        .await?;
                    self.write(retrying.requeue(next.attempt(), now)).await?;
                    tracing::info!(
                        task_id = %id,
                        attempt = next.attempt(),
                        not_before = %next.not_before(),
                        "retry scheduled"
                    );
                }
                Processed::Retried
            }
        };

        self.ack(&handle).await?;
        Ok(processed)
    }

    /// Run the body on its own task so a panic or overrun cannot take the
    /// slot down with it.
    async fn execute(&self, handler: Arc<dyn DynHandler>, args: Vec<Value>) -> Result<Value, CourierError> {
        let mut join = tokio::spawn(async move { handler.handle_dyn(args).await });

        let joined = match self.task_timeout {
            Some(limit) => match tokio::time::timeout(limit, &mut join).await {
                Ok(joined) => joined,
                Err(_) => {
                    join.abort();
                    return Err(CourierError::Timeout(limit));
                }
            },
            None => join.await,
        };

        joined.unwrap_or_else(|e| Err(CourierError::terminal(format!("task body panicked: {e}"))))
    }

    /// Extend the lease of `handle` until dropped. Never completes.
    async fn keep_leased(&self, handle: &AckHandle) -> Infallible {
        let mut ticker = tokio::time::interval(self.lease_renewal.every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match self.broker.extend(handle, self.lease_renewal.extend_by).await {
                Ok(()) => {
                    tracing::trace!(lease = %handle.lease_id, "lease renewed");
                }
                Err(CourierError::LeaseExpired(lease)) => {
                    tracing::warn!(lease = %lease, "lease lost while the body was running");
                    std::future::pending::<()>().await;
                }
                Err(err) => {
                    tracing::warn!(lease = %handle.lease_id, error = %err, "lease renewal failed, will retry");
                }
            }
        }
    }

    /// Conditional status write; `false` when the record turned terminal
    /// underneath us (e.g. cancelled).
    async fn write(&self, record: StatusRecord) -> Result<bool, CourierError> {
        let outcome = self
            .transport
            .run("status write", || self.store.transition(record.clone(), self.status_ttl))
            .await?;
        match outcome {
            WriteOutcome::Applied => Ok(true),
            WriteOutcome::RejectedTerminal(stored) => {
                tracing::info!(
                    task_id = %stored.id,
                    state = %stored.state,
                    "record is terminal, transition dropped"
                );
                Ok(false)
            }
        }
    }

    async fn ack(&self, handle: &AckHandle) -> Result<(), CourierError> {
        match self.transport.run("ack", || self.broker.ack(handle)).await {
            Ok(()) => Ok(()),
            // Someone else holds the message now; their run will see the record.
            Err(CourierError::LeaseExpired(lease)) => {
                tracing::warn!(lease = %lease, "ack after visibility timeout");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }
}

/// Worker pool handle.
/// - `request_shutdown` stops leasing; bodies already running finish
/// - `shutdown_and_join` waits for every slot to exit
pub struct WorkerPool {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `config.concurrency` slots spread round-robin over `config.queues`.
    pub fn spawn(ctx: Arc<WorkerContext>, config: &WorkerConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let slots = config.concurrency.max(1);

        let mut joins = Vec::with_capacity(slots);
        for slot in 0..slots {
            let Some(queue) = config.queues.get(slot % config.queues.len().max(1)).cloned() else {
                break;
            };
            let consumer = Consumer::new(
                Arc::clone(&ctx.broker),
                queue,
                config.receive_wait(),
                ctx.transport.clone(),
            );
            let ctx = Arc::clone(&ctx);
            let mut rx = shutdown_rx.clone();
            joins.push(tokio::spawn(async move {
                slot_loop(slot, ctx, consumer, &mut rx).await;
            }));
        }

        tracing::info!(slots = joins.len(), queues = ?config.queues, "worker pool started");
        Self { shutdown_tx, joins }
    }

    pub fn slots(&self) -> usize {
        self.joins.len()
    }

    pub fn request_shutdown(&self) {
        // receivers may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        for join in self.joins {
            let _ = join.await;
        }
        tracing::info!("worker pool stopped");
    }
}

async fn slot_loop(
    slot: usize,
    ctx: Arc<WorkerContext>,
    mut consumer: Consumer,
    shutdown_rx: &mut watch::Receiver<bool>,
) {
    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        let next = tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
            next = consumer.next() => next,
        };

        match next {
            Ok(delivery) => {
                let task_id = delivery.envelope.id();
                match ctx.process(delivery).await {
                    Ok(processed) => {
                        tracing::debug!(worker = slot, task_id = %task_id, ?processed, "delivery done");
                    }
                    Err(err) => {
                        tracing::error!(
                            worker = slot,
                            task_id = %task_id,
                            error = %err,
                            "delivery left for redelivery"
                        );
                    }
                }
            }
            Err(err) => {
                tracing::error!(worker = slot, queue = %consumer.queue(), error = %err, "consume failed");
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    }
    tracing::debug!(worker = slot, "slot stopped");
}
