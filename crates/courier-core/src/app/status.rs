//! Monitor - read-only views over status records and queue depth.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::domain::{CourierError, QueueName, StatusRecord, TaskId, TaskState};
use crate::ports::{Broker, QueueDepth, StatusStore};

/// Number of live records per state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    pub pending: usize,
    pub running: usize,
    pub success: usize,
    pub failure: usize,
    pub retry: usize,
}

impl QueueCounts {
    fn add(&mut self, state: TaskState) {
        match state {
            TaskState::Pending => self.pending += 1,
            TaskState::Running => self.running += 1,
            TaskState::Success => self.success += 1,
            TaskState::Failure => self.failure += 1,
            TaskState::Retry => self.retry += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.pending + self.running + self.success + self.failure + self.retry
    }
}

/// Everything a dashboard polls for in one call.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub counts: QueueCounts,
    pub queues: Vec<(QueueName, QueueDepth)>,
}

pub struct Monitor {
    store: Arc<dyn StatusStore>,
    broker: Arc<dyn Broker>,
}

impl Monitor {
    pub fn new(store: Arc<dyn StatusStore>, broker: Arc<dyn Broker>) -> Self {
        Self { store, broker }
    }

    /// Status of one task; `None` once unknown or expired.
    pub async fn task_status(&self, id: TaskId) -> Result<Option<StatusRecord>, CourierError> {
        self.store.get(id).await
    }

    pub async fn counts_by_state(&self) -> Result<QueueCounts, CourierError> {
        let mut counts = QueueCounts::default();
        for record in self.store.list().await? {
            counts.add(record.state);
        }
        Ok(counts)
    }

    pub async fn queue_depth(&self, queue: &QueueName) -> Result<QueueDepth, CourierError> {
        self.broker.depth(queue).await
    }

    pub async fn snapshot(&self, queues: &[QueueName]) -> Result<Snapshot, CourierError> {
        let counts = self.counts_by_state().await?;
        let mut depths = Vec::with_capacity(queues.len());
        for queue in queues {
            depths.push((queue.clone(), self.broker.depth(queue).await?));
        }
        Ok(Snapshot {
            counts,
            queues: depths,
        })
    }

    /// Drop every status record; returns how many were removed.
    pub async fn purge(&self) -> Result<usize, CourierError> {
        let removed = self.store.purge().await?;
        tracing::warn!(removed, "status records purged");
        Ok(removed)
    }
}
