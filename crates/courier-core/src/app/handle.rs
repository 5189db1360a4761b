//! LoopHandle - stop switch for a spawned background loop.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

pub struct LoopHandle {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl LoopHandle {
    /// Call `step` every `interval` until shutdown is requested.
    ///
    /// A step in progress is allowed to finish; ticks missed meanwhile are
    /// not made up.
    pub fn every<F, Fut>(name: &'static str, interval: Duration, mut step: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => step().await,
                }
            }
            tracing::debug!(task = name, "background loop stopped");
        });
        Self { shutdown_tx, join }
    }

    pub fn request_shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        let _ = self.join.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn steps_until_shut_down() {
        let count = Arc::new(AtomicUsize::new(0));
        let handle = LoopHandle::every("test", Duration::from_secs(1), {
            let count = Arc::clone(&count);
            move || {
                let count = Arc::clone(&count);
                async move {
                    count.fetch_add(1, Ordering::SeqCst);
                }
            }
        });

        tokio::time::sleep(Duration::from_millis(3_500)).await;
        handle.shutdown_and_join().await;

        // first tick fires immediately, then at 1s, 2s, 3s
        assert_eq!(count.load(Ordering::SeqCst), 4);
    }
}
