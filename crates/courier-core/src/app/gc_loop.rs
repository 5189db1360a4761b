//! GcLoop - sweeps expired status records out of the store.

use std::sync::Arc;
use std::time::Duration;

use super::handle::LoopHandle;
use crate::domain::CourierError;
use crate::ports::StatusStore;

pub struct GcLoop {
    store: Arc<dyn StatusStore>,
}

impl GcLoop {
    pub fn new(store: Arc<dyn StatusStore>) -> Self {
        Self { store }
    }

    pub async fn run_once(&self) -> Result<usize, CourierError> {
        let evicted = self.store.evict_expired().await?;
        if evicted > 0 {
            tracing::debug!(evicted, "expired status records evicted");
        }
        Ok(evicted)
    }

    pub fn spawn(self, interval: Duration) -> LoopHandle {
        let gc = Arc::new(self);
        LoopHandle::every("gc", interval, move || {
            let gc = Arc::clone(&gc);
            async move {
                if let Err(err) = gc.run_once().await {
                    tracing::warn!(error = %err, "status gc failed");
                }
            }
        })
    }
}
