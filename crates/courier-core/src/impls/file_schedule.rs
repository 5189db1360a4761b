//! FileScheduleStore - schedule table persisted as one JSON file.
//!
//! The file is the only copy of the table. Several processes may open the
//! same path (a running scheduler and the `schedule` CLI), so every read goes
//! to disk and every change is a read-modify-write of the whole file: encode,
//! write and fsync a sibling temp file, then rename it over the target. A
//! crash leaves either the old or the new table on disk, never a torn one.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::domain::{CourierError, ScheduleEntry};
use crate::ports::ScheduleStore;

type Table = BTreeMap<String, ScheduleEntry>;

pub struct FileScheduleStore {
    path: PathBuf,
    /// Serializes read-modify-write cycles within this process.
    write_lock: Mutex<()>,
}

impl FileScheduleStore {
    /// Open the table at `path`; a missing file is an empty table. A corrupt
    /// file is reported here rather than on first use.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, CourierError> {
        let store = Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        };
        let entries = store.load().await?;
        tracing::debug!(path = %store.path.display(), entries = entries.len(), "schedule table opened");
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<Table, CourierError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) if bytes.is_empty() => Ok(Table::new()),
            Ok(bytes) => {
                let list: Vec<ScheduleEntry> = serde_json::from_slice(&bytes)?;
                Ok(list.into_iter().map(|e| (e.name.clone(), e)).collect())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Table::new()),
            Err(e) => Err(io_error(&self.path, e)),
        }
    }

    async fn persist(&self, entries: &Table) -> Result<(), CourierError> {
        let list: Vec<&ScheduleEntry> = entries.values().collect();
        let bytes = serde_json::to_vec_pretty(&list)?;

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        let dir = self.path.parent().filter(|d| !d.as_os_str().is_empty());
        if let Some(dir) = dir {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| io_error(dir, e))?;
        }

        let mut file = tokio::fs::File::create(&tmp)
            .await
            .map_err(|e| io_error(&tmp, e))?;
        file.write_all(&bytes).await.map_err(|e| io_error(&tmp, e))?;
        file.sync_all().await.map_err(|e| io_error(&tmp, e))?;
        drop(file);

        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| io_error(&self.path, e))?;

        if let Some(dir) = dir {
            sync_dir(dir).await?;
        }
        Ok(())
    }
}

/// fsync the directory so the rename itself survives a crash.
#[cfg(unix)]
async fn sync_dir(dir: &Path) -> Result<(), CourierError> {
    let handle = tokio::fs::File::open(dir).await.map_err(|e| io_error(dir, e))?;
    handle.sync_all().await.map_err(|e| io_error(dir, e))
}

#[cfg(not(unix))]
async fn sync_dir(_dir: &Path) -> Result<(), CourierError> {
    Ok(())
}

fn io_error(path: &Path, e: std::io::Error) -> CourierError {
    CourierError::Transport(format!("schedule file {}: {e}", path.display()))
}

#[async_trait]
impl ScheduleStore for FileScheduleStore {
    async fn list(&self) -> Result<Vec<ScheduleEntry>, CourierError> {
        Ok(self.load().await?.into_values().collect())
    }

    async fn get(&self, name: &str) -> Result<Option<ScheduleEntry>, CourierError> {
        Ok(self.load().await?.remove(name))
    }

    async fn upsert(&self, entry: ScheduleEntry) -> Result<(), CourierError> {
        let _guard = self.write_lock.lock().await;
        let mut entries = self.load().await?;
        entries.insert(entry.name.clone(), entry);
        self.persist(&entries).await
    }

    async fn remove(&self, name: &str) -> Result<bool, CourierError> {
        let _guard = self.write_lock.lock().await;
        let mut entries = self.load().await?;
        if entries.remove(name).is_none() {
            return Ok(false);
        }
        self.persist(&entries).await?;
        Ok(true)
    }
}
