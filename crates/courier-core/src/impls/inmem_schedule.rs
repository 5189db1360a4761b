//! InMemoryScheduleStore - schedule table for tests and single-run setups.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::domain::{CourierError, ScheduleEntry};
use crate::ports::ScheduleStore;

#[derive(Debug, Default)]
pub struct InMemoryScheduleStore {
    entries: RwLock<BTreeMap<String, ScheduleEntry>>,
}

impl InMemoryScheduleStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ScheduleStore for InMemoryScheduleStore {
    async fn list(&self) -> Result<Vec<ScheduleEntry>, CourierError> {
        Ok(self.entries.read().await.values().cloned().collect())
    }

    async fn get(&self, name: &str) -> Result<Option<ScheduleEntry>, CourierError> {
        Ok(self.entries.read().await.get(name).cloned())
    }

    async fn upsert(&self, entry: ScheduleEntry) -> Result<(), CourierError> {
        self.entries.write().await.insert(entry.name.clone(), entry);
        Ok(())
    }

    async fn remove(&self, name: &str) -> Result<bool, CourierError> {
        Ok(self.entries.write().await.remove(name).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Interval, TaskName};
    use chrono::{TimeZone, Utc};
    use std::time::Duration;

    #[tokio::test]
    async fn upsert_replaces_by_name() {
        let store = InMemoryScheduleStore::new();
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let entry = ScheduleEntry::new(
            "heartbeat",
            TaskName::new("echo"),
            Interval::every(Duration::from_secs(60)),
            now,
        )
        .unwrap();

        store.upsert(entry.clone()).await.unwrap();
        store.upsert(entry.clone().advanced(entry.next_fire_at)).await.unwrap();

        let listed = store.list().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].last_fired_at, Some(entry.next_fire_at));

        assert!(store.remove("heartbeat").await.unwrap());
        assert!(!store.remove("heartbeat").await.unwrap());
    }
}
