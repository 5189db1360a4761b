//! ReaperLoop - returns deliveries whose visibility timeout elapsed.
//!
//! Brokers reclaim lazily on receive as well; the loop keeps reclaim going on
//! queues nobody is currently receiving from.

use std::sync::Arc;
use std::time::Duration;

use super::handle::LoopHandle;
use crate::domain::CourierError;
use crate::ports::Broker;

pub struct ReaperLoop {
    broker: Arc<dyn Broker>,
}

impl ReaperLoop {
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        Self { broker }
    }

    pub async fn run_once(&self) -> Result<usize, CourierError> {
        let reclaimed = self.broker.reclaim_expired().await?;
        if reclaimed > 0 {
            tracing::info!(reclaimed, "expired deliveries returned to their queues");
        }
        Ok(reclaimed)
    }

    pub fn spawn(self, interval: Duration) -> LoopHandle {
        let reaper = Arc::new(self);
        LoopHandle::every("reaper", interval, move || {
            let reaper = Arc::clone(&reaper);
            async move {
                if let Err(err) = reaper.run_once().await {
                    tracing::warn!(error = %err, "reclaim failed");
                }
            }
        })
    }
}
