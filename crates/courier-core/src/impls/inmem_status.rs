//! InMemoryStatusStore - key-value status store with per-key expiry.
//!
//! Records are stored encoded, next to an absolute expiry taken from the
//! injected Clock. Expired entries are invisible to reads and removed by
//! `evict_expired` (driven by the gc loop).

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::domain::{CourierError, StatusRecord, TaskId};
use crate::ports::{Clock, CreateOutcome, StatusStore, WriteOutcome};

#[derive(Debug)]
struct Entry {
    bytes: Vec<u8>,
    expires_at: DateTime<Utc>,
}

impl Entry {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }

    fn decode(&self) -> Result<StatusRecord, CourierError> {
        Ok(serde_json::from_slice(&self.bytes)?)
    }
}

#[derive(Debug, Default)]
struct StoreState {
    entries: HashMap<TaskId, Entry>,
    /// dedup key -> id of the record that claimed it
    dedup: HashMap<String, TaskId>,
}

impl StoreState {
    fn live(&self, id: &TaskId, now: DateTime<Utc>) -> Option<&Entry> {
        self.entries.get(id).filter(|e| e.is_live(now))
    }

    fn write(&mut self, record: &StatusRecord, expires_at: DateTime<Utc>) -> Result<(), CourierError> {
        let bytes = serde_json::to_vec(record)?;
        self.entries.insert(record.id, Entry { bytes, expires_at });
        Ok(())
    }

    fn forget_dedup_for(&mut self, id: &TaskId) {
        self.dedup.retain(|_, owner| owner != id);
    }
}

pub struct InMemoryStatusStore {
    state: Mutex<StoreState>,
    clock: Arc<dyn Clock>,
    available: AtomicBool,
}

impl InMemoryStatusStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(StoreState::default()),
            clock,
            available: AtomicBool::new(true),
        }
    }

    /// Simulate the store becoming unreachable (`false`) or coming back.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn ensure_available(&self) -> Result<(), CourierError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(CourierError::Transport("status store unavailable".to_string()))
        }
    }

    fn expiry(&self, now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
        now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

#[async_trait]
impl StatusStore for InMemoryStatusStore {
    async fn get(&self, id: TaskId) -> Result<Option<StatusRecord>, CourierError> {
        self.ensure_available()?;
        let now = self.clock.now();
        let state = self.state.lock().await;
        state.live(&id, now).map(Entry::decode).transpose()
    }

    async fn put(&self, record: StatusRecord, ttl: Duration) -> Result<(), CourierError> {
        self.ensure_available()?;
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        state.write(&record, self.expiry(now, ttl))
    }

    async fn delete(&self, id: TaskId) -> Result<(), CourierError> {
        self.ensure_available()?;
        let mut state = self.state.lock().await;
        state.entries.remove(&id);
        state.forget_dedup_for(&id);
        Ok(())
    }

    async fn create(&self, record: StatusRecord, ttl: Duration) -> Result<CreateOutcome, CourierError> {
        self.ensure_available()?;
        let now = self.clock.now();
        let mut state = self.state.lock().await;

        if let Some(key) = record.dedup_key.as_deref()
            && let Some(owner) = state.dedup.get(key).copied()
            && let Some(entry) = state.live(&owner, now)
            && !entry.decode()?.is_terminal()
        {
            return Ok(CreateOutcome::Existing(owner));
        }

        state.write(&record, self.expiry(now, ttl))?;
        if let Some(key) = &record.dedup_key {
            state.dedup.insert(key.clone(), record.id);
        }
        Ok(CreateOutcome::Created)
    }

    async fn transition(&self, record: StatusRecord, ttl: Duration) -> Result<WriteOutcome, CourierError> {
        self.ensure_available()?;
        let now = self.clock.now();
        let mut state = self.state.lock().await;

        if let Some(entry) = state.live(&record.id, now) {
            let stored = entry.decode()?;
            if stored.is_terminal() {
                return Ok(WriteOutcome::RejectedTerminal(stored));
            }
        }

        state.write(&record, self.expiry(now, ttl))?;
        Ok(WriteOutcome::Applied)
    }

    async fn list(&self) -> Result<Vec<StatusRecord>, CourierError> {
        self.ensure_available()?;
        let now = self.clock.now();
        let state = self.state.lock().await;
        state
            .entries
            .values()
            .filter(|e| e.is_live(now))
            .map(Entry::decode)
            .collect()
    }

    async fn evict_expired(&self) -> Result<usize, CourierError> {
        self.ensure_available()?;
        let now = self.clock.now();
        let mut state = self.state.lock().await;

        let before = state.entries.len();
        state.entries.retain(|_, e| e.is_live(now));
        let StoreState { entries, dedup } = &mut *state;
        dedup.retain(|_, owner| entries.contains_key(owner));
        Ok(before - state.entries.len())
    }

    async fn purge(&self) -> Result<usize, CourierError> {
        self.ensure_available()?;
        let mut state = self.state.lock().await;
        let removed = state.entries.len();
        state.entries.clear();
        state.dedup.clear();
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{
        ErrorKind, QueueName, RetryPolicy, TaskEnvelope, TaskError, TaskName, TaskState,
    };
    use crate::ports::FixedClock;
    use chrono::TimeZone;
    use ulid::Ulid;

    const TTL: Duration = Duration::from_secs(60);

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn pending(dedup_key: Option<&str>) -> StatusRecord {
        let envelope = TaskEnvelope::new(
            TaskId::from_ulid(Ulid::new()),
            TaskName::new("echo"),
            vec![],
            QueueName::default(),
            RetryPolicy::default(),
            t0(),
        )
        .with_dedup_key(dedup_key.map(str::to_string));
        StatusRecord::pending(&envelope, t0())
    }

    fn store() -> (InMemoryStatusStore, Arc<FixedClock>) {
        let clock = Arc::new(FixedClock::new(t0()));
        (InMemoryStatusStore::new(clock.clone()), clock)
    }

    #[tokio::test]
    async fn put_get_delete() {
        let (store, _) = store();
        let record = pending(None);
        store.put(record.clone(), TTL).await.unwrap();
        assert_eq!(store.get(record.id).await.unwrap(), Some(record.clone()));

        store.delete(record.id).await.unwrap();
        assert_eq!(store.get(record.id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn records_expire_and_writes_refresh_ttl() {
        let (store, clock) = store();
        let record = pending(None);
        store.put(record.clone(), TTL).await.unwrap();

        clock.advance(chrono::Duration::seconds(50));
        let running = record.clone().mark_running(0, clock.now());
        store.transition(running, TTL).await.unwrap();

        // 100s after the first write, 50s after the refresh
        clock.advance(chrono::Duration::seconds(50));
        assert!(store.get(record.id).await.unwrap().is_some());

        clock.advance(chrono::Duration::seconds(11));
        assert!(store.get(record.id).await.unwrap().is_none());
        assert_eq!(store.evict_expired().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn dedup_key_returns_existing_live_record() {
        let (store, _) = store();
        let first = pending(Some("report-42"));
        let second = pending(Some("report-42"));

        assert_eq!(store.create(first.clone(), TTL).await.unwrap(), CreateOutcome::Created);
        assert_eq!(
            store.create(second.clone(), TTL).await.unwrap(),
            CreateOutcome::Existing(first.id)
        );
        assert!(store.get(second.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn dedup_key_is_released_once_terminal() {
        let (store, clock) = store();
        let first = pending(Some("k"));
        store.create(first.clone(), TTL).await.unwrap();
        store
            .transition(first.mark_succeeded(serde_json::json!(1), clock.now()), TTL)
            .await
            .unwrap();

        let again = pending(Some("k"));
        assert_eq!(store.create(again, TTL).await.unwrap(), CreateOutcome::Created);
    }

    #[tokio::test]
    async fn terminal_record_is_not_overwritten() {
        let (store, clock) = store();
        let record = pending(None);
        store.create(record.clone(), TTL).await.unwrap();

        let failed = record.clone().mark_failed(
            TaskError::new(ErrorKind::TerminalTaskError, "cancelled"),
            clock.now(),
        );
        assert_eq!(store.transition(failed, TTL).await.unwrap(), WriteOutcome::Applied);

        let outcome = store
            .transition(record.clone().mark_running(0, clock.now()), TTL)
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            WriteOutcome::RejectedTerminal(ref stored) if stored.state == TaskState::Failure
        ));
        assert_eq!(store.get(record.id).await.unwrap().unwrap().state, TaskState::Failure);
    }

    #[tokio::test]
    async fn list_and_purge() {
        let (store, _) = store();
        store.create(pending(None), TTL).await.unwrap();
        store.create(pending(Some("x")), TTL).await.unwrap();

        assert_eq!(store.list().await.unwrap().len(), 2);
        assert_eq!(store.purge().await.unwrap(), 2);
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unavailable_store_reports_transport_error() {
        let (store, _) = store();
        store.set_available(false);
        let err = store.get(TaskId::from_ulid(Ulid::new())).await.unwrap_err();
        assert!(matches!(err, CourierError::Transport(_)));
    }
}
