//! ScheduleStore port - durable table of schedule entries keyed by name.

use async_trait::async_trait;

use crate::domain::{CourierError, ScheduleEntry};

#[async_trait]
pub trait ScheduleStore: Send + Sync {
    async fn list(&self) -> Result<Vec<ScheduleEntry>, CourierError>;

    async fn get(&self, name: &str) -> Result<Option<ScheduleEntry>, CourierError>;

    /// Insert or replace by `entry.name`. Must be durable when it returns.
    async fn upsert(&self, entry: ScheduleEntry) -> Result<(), CourierError>;

    /// Returns whether an entry was removed.
    async fn remove(&self, name: &str) -> Result<bool, CourierError>;
}
