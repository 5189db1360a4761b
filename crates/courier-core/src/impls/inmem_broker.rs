//! InMemoryBroker - single-process broker for development and tests.
//!
//! Messages are held as encoded bytes so the serialization boundary is the
//! same one a networked broker would have. Each queue has a ready list, a
//! delay heap ordered by `not_before`, and a dead-letter list. Leased
//! messages sit in a shared in-flight table until acked, nacked, or their
//! visibility timeout elapses.

use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, Notify};

use crate::config::BrokerConfig;
use crate::domain::{CourierError, LeaseId, QueueName, TaskEnvelope};
use crate::ports::{AckHandle, Broker, Clock, Delivery, IdGenerator, QueueDepth, UlidGenerator};

/// One stored message.
#[derive(Debug, Clone)]
struct Message {
    bytes: Vec<u8>,
    /// `None` for raw payloads whose envelope was never decoded.
    not_before: Option<DateTime<Utc>>,
    delivery_count: u32,
}

/// Delay heap entry. Reverse ordering so BinaryHeap pops the earliest first;
/// `seq` keeps publish order among equal due times.
#[derive(Debug)]
struct Delayed {
    due: DateTime<Utc>,
    seq: u64,
    message: Message,
}

impl PartialEq for Delayed {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for Delayed {}

impl PartialOrd for Delayed {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Delayed {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Debug, Default)]
struct QueueState {
    ready: VecDeque<Message>,
    delayed: BinaryHeap<Delayed>,
    dead: VecDeque<Vec<u8>>,
}

impl QueueState {
    /// Dead-letter `bytes`, dropping the oldest beyond `limit`.
    fn bury(&mut self, bytes: Vec<u8>, limit: usize) {
        self.dead.push_back(bytes);
        while self.dead.len() > limit {
            self.dead.pop_front();
        }
    }

    fn backlog(&self) -> usize {
        self.ready.len() + self.delayed.len()
    }

    /// Move every delayed message that is due into the ready list.
    fn promote_due(&mut self, now: DateTime<Utc>) {
        while let Some(entry) = self.delayed.peek() {
            if entry.due > now {
                break;
            }
            if let Some(entry) = self.delayed.pop() {
                self.ready.push_back(entry.message);
            }
        }
    }

    fn next_due(&self) -> Option<DateTime<Utc>> {
        self.delayed.peek().map(|entry| entry.due)
    }
}

#[derive(Debug)]
struct InFlight {
    queue: QueueName,
    message: Message,
    deadline: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct BrokerState {
    queues: HashMap<QueueName, QueueState>,
    in_flight: HashMap<LeaseId, InFlight>,
    seq: u64,
}

impl BrokerState {
    fn queue_mut(&mut self, queue: &QueueName) -> &mut QueueState {
        self.queues.entry(queue.clone()).or_default()
    }

    /// Append to the ready list, or to the delay heap if not yet due.
    fn enqueue(&mut self, queue: &QueueName, message: Message, now: DateTime<Utc>) {
        match message.not_before {
            Some(due) if due > now => {
                self.seq += 1;
                let seq = self.seq;
                self.queue_mut(queue).delayed.push(Delayed { due, seq, message });
            }
            _ => self.queue_mut(queue).ready.push_back(message),
        }
    }

    /// Remove the in-flight entry `handle` refers to, if it still owns it.
    fn take_lease(&mut self, handle: &AckHandle) -> Option<InFlight> {
        let owned = self
            .in_flight
            .get(&handle.lease_id)
            .is_some_and(|f| f.queue == handle.queue);
        if owned {
            self.in_flight.remove(&handle.lease_id)
        } else {
            None
        }
    }

    /// Return expired leases to the front of their queue.
    fn reclaim(&mut self, now: DateTime<Utc>) -> usize {
        let expired: Vec<LeaseId> = self
            .in_flight
            .iter()
            .filter(|(_, f)| f.deadline <= now)
            .map(|(id, _)| *id)
            .collect();

        for lease_id in &expired {
            if let Some(flight) = self.in_flight.remove(lease_id) {
                tracing::debug!(
                    queue = %flight.queue,
                    lease = %lease_id,
                    "visibility timeout elapsed, message is redeliverable"
                );
                self.queue_mut(&flight.queue).ready.push_front(flight.message);
            }
        }
        expired.len()
    }
}

pub struct InMemoryBroker {
    state: Arc<Mutex<BrokerState>>,
    notify: Arc<Notify>,
    clock: Arc<dyn Clock>,
    ids: UlidGenerator,
    config: BrokerConfig,
    available: AtomicBool,
}

impl InMemoryBroker {
    pub fn new(config: BrokerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Arc::new(Mutex::new(BrokerState::default())),
            notify: Arc::new(Notify::new()),
            ids: UlidGenerator::new(Arc::clone(&clock)),
            clock,
            config,
            available: AtomicBool::new(true),
        }
    }

    /// Simulate the broker becoming unreachable (`false`) or coming back.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
        if available {
            self.notify.notify_waiters();
        }
    }

    /// Raw payloads dead-lettered on `queue`.
    pub async fn dead_letters(&self, queue: &QueueName) -> Vec<Vec<u8>> {
        let state = self.state.lock().await;
        state
            .queues
            .get(queue)
            .map(|q| q.dead.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Remove and return the dead letters of `queue`, oldest first.
    pub async fn drain_dead_letters(&self, queue: &QueueName) -> Vec<Vec<u8>> {
        let mut state = self.state.lock().await;
        match state.queues.get_mut(queue) {
            Some(q) => q.dead.drain(..).collect(),
            None => Vec::new(),
        }
    }

    /// Drop every ready and delayed message on `queue`; returns how many.
    pub async fn purge(&self, queue: &QueueName) -> usize {
        let mut state = self.state.lock().await;
        let q = state.queue_mut(queue);
        let dropped = q.backlog();
        q.ready.clear();
        q.delayed.clear();
        dropped
    }

    /// Store already-encoded bytes as if a producer had published them.
    pub async fn publish_raw(&self, queue: &QueueName, bytes: Vec<u8>) -> Result<(), CourierError> {
        self.ensure_available()?;
        {
            let mut state = self.state.lock().await;
            state.queue_mut(queue).ready.push_back(Message {
                bytes,
                not_before: None,
                delivery_count: 0,
            });
        }
        self.notify.notify_waiters();
        Ok(())
    }

    fn ensure_available(&self) -> Result<(), CourierError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(CourierError::Transport("broker unavailable".to_string()))
        }
    }

    fn visibility_deadline(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let timeout = chrono::Duration::from_std(self.config.visibility_timeout())
            .unwrap_or_else(|_| chrono::Duration::seconds(30));
        now + timeout
    }

    /// Lease the first decodable ready message, dead-lettering poison ones.
    fn try_lease(&self, state: &mut BrokerState, queue: &QueueName, now: DateTime<Utc>) -> Option<Delivery> {
        loop {
            let q = state.queue_mut(queue);
            q.promote_due(now);
            let mut message = q.ready.pop_front()?;

            match serde_json::from_slice::<TaskEnvelope>(&message.bytes) {
                Ok(envelope) => {
                    message.delivery_count += 1;
                    let lease_id = self.ids.generate_lease_id();
                    let handle = AckHandle {
                        queue: queue.clone(),
                        lease_id,
                        delivery_count: message.delivery_count,
                    };
                    state.in_flight.insert(
                        lease_id,
                        InFlight {
                            queue: queue.clone(),
                            message,
                            deadline: self.visibility_deadline(now),
                        },
                    );
                    return Some(Delivery { envelope, handle });
                }
                Err(err) => {
                    tracing::error!(
                        queue = %queue,
                        error = %err,
                        "undecodable message moved to dead letters"
                    );
                    q.bury(message.bytes, self.config.dead_letter_limit);
                }
            }
        }
    }

    /// How long a waiting receive may sleep before it has to look again.
    fn nap(&self, state: &BrokerState, queue: &QueueName, now: DateTime<Utc>, remaining: Duration) -> Duration {
        let mut nap = remaining.min(self.config.poll_interval());
        if let Some(due) = state.queues.get(queue).and_then(QueueState::next_due) {
            let until_due = (due - now).to_std().unwrap_or(Duration::ZERO);
            nap = nap.min(until_due);
        }
        nap
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn publish(&self, queue: &QueueName, envelope: &TaskEnvelope) -> Result<(), CourierError> {
        self.ensure_available()?;
        let bytes = serde_json::to_vec(envelope)?;
        let now = self.clock.now();

        {
            let mut state = self.state.lock().await;
            let limit = self.config.max_queue_depth;
            let q = state.queue_mut(queue);
            if let Some(limit) = limit
                && q.backlog() >= limit
            {
                return Err(CourierError::Backpressure {
                    queue: queue.clone(),
                    depth: q.backlog(),
                });
            }

            let message = Message {
                bytes,
                not_before: Some(envelope.not_before()),
                delivery_count: 0,
            };
            state.enqueue(queue, message, now);
        }

        tracing::debug!(queue = %queue, task_id = %envelope.id(), "published");
        self.notify.notify_waiters();
        Ok(())
    }

    async fn receive(&self, queue: &QueueName, wait: Duration) -> Result<Option<Delivery>, CourierError> {
        let started = tokio::time::Instant::now();
        loop {
            // Register interest before looking so a publish in between is not missed.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            self.ensure_available()?;
            let nap = {
                let mut state = self.state.lock().await;
                let now = self.clock.now();
                state.reclaim(now);
                if let Some(delivery) = self.try_lease(&mut state, queue, now) {
                    return Ok(Some(delivery));
                }

                let remaining = wait.saturating_sub(started.elapsed());
                if remaining.is_zero() {
                    return Ok(None);
                }
                self.nap(&state, queue, now, remaining)
            };

            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep(nap.max(Duration::from_millis(1))) => {}
            }
        }
    }

    async fn ack(&self, handle: &AckHandle) -> Result<(), CourierError> {
        self.ensure_available()?;
        let mut state = self.state.lock().await;
        state
            .take_lease(handle)
            .map(|_| ())
            .ok_or(CourierError::LeaseExpired(handle.lease_id))
    }

    async fn extend(&self, handle: &AckHandle, by: Duration) -> Result<(), CourierError> {
        self.ensure_available()?;
        let now = self.clock.now();
        let extension = chrono::Duration::from_std(by)
            .map_err(|_| CourierError::Transport(format!("lease extension out of range: {by:?}")))?;

        let mut state = self.state.lock().await;
        match state.in_flight.get_mut(&handle.lease_id) {
            Some(flight) if flight.queue == handle.queue && flight.deadline > now => {
                flight.deadline = now + extension;
                Ok(())
            }
            _ => Err(CourierError::LeaseExpired(handle.lease_id)),
        }
    }

    async fn nack(&self, handle: &AckHandle, requeue: bool) -> Result<(), CourierError> {
        self.ensure_available()?;
        {
            let mut state = self.state.lock().await;
            let Some(flight) = state.take_lease(handle) else {
                return Err(CourierError::LeaseExpired(handle.lease_id));
            };

            if requeue {
                state.enqueue(&flight.queue, flight.message, self.clock.now());
            } else {
                let limit = self.config.dead_letter_limit;
                state.queue_mut(&flight.queue).bury(flight.message.bytes, limit);
            }
        }

        if requeue {
            self.notify.notify_waiters();
        }
        Ok(())
    }

    async fn reclaim_expired(&self) -> Result<usize, CourierError> {
        self.ensure_available()?;
        let reclaimed = {
            let mut state = self.state.lock().await;
            state.reclaim(self.clock.now())
        };
        if reclaimed > 0 {
            self.notify.notify_waiters();
        }
        Ok(reclaimed)
    }

    async fn depth(&self, queue: &QueueName) -> Result<QueueDepth, CourierError> {
        self.ensure_available()?;
        let state = self.state.lock().await;
        let in_flight = state
            .in_flight
            .values()
            .filter(|f| &f.queue == queue)
            .count();
        Ok(match state.queues.get(queue) {
            Some(q) => QueueDepth {
                ready: q.ready.len(),
                delayed: q.delayed.len(),
                in_flight,
                dead_lettered: q.dead.len(),
            },
            None => QueueDepth {
                in_flight,
                ..QueueDepth::default()
            },
        })
    }
}
