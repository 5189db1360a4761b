//! StatusStore port - key-value store of per-task status records with expiry.
//!
//! # Design
//! - One record per task id, keyed by the id.
//! - Every write refreshes the record's TTL.
//! - Writes are single-key; per-key atomicity is the store's job. The only
//!   conditional writes are `create` (dedup check + insert) and `transition`
//!   (refuse to replace a terminal record).

use std::time::Duration;

use async_trait::async_trait;

use crate::domain::{CourierError, StatusRecord, TaskId};

/// Result of `StatusStore::create`.
#[derive(Debug, Clone, PartialEq)]
pub enum CreateOutcome {
    /// Record written (and its dedup key, if any, now points at it).
    Created,
    /// A live, non-terminal record already owns the dedup key.
    Existing(TaskId),
}

/// Result of `StatusStore::transition`.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOutcome {
    Applied,
    /// The stored record is terminal; the write was dropped.
    RejectedTerminal(StatusRecord),
}

#[async_trait]
pub trait StatusStore: Send + Sync {
    async fn get(&self, id: TaskId) -> Result<Option<StatusRecord>, CourierError>;

    /// Unconditional overwrite keyed by `record.id`.
    async fn put(&self, record: StatusRecord, ttl: Duration) -> Result<(), CourierError>;

    async fn delete(&self, id: TaskId) -> Result<(), CourierError>;

    /// Insert a new record, honouring its dedup key.
    async fn create(&self, record: StatusRecord, ttl: Duration) -> Result<CreateOutcome, CourierError>;

    /// Overwrite unless the stored record is already terminal.
    async fn transition(&self, record: StatusRecord, ttl: Duration) -> Result<WriteOutcome, CourierError>;

    /// Every live record (monitoring feed).
    async fn list(&self) -> Result<Vec<StatusRecord>, CourierError>;

    /// Drop expired records; returns how many were removed.
    async fn evict_expired(&self) -> Result<usize, CourierError>;

    /// Drop everything; returns how many records were removed.
    async fn purge(&self) -> Result<usize, CourierError>;
}
