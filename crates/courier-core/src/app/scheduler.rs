//! Scheduler - turns due schedule entries into submissions.
//!
//! # Tick
//! 1. hold the SchedulerLease, otherwise do nothing
//! 2. for each enabled entry with `next_fire_at <= now`: re-read it, and if
//!    it is unchanged persist the advanced entry first, then `submit`
//!
//! Persisting before submitting means a crash between the two loses at most
//! one firing instead of firing twice. Missed intervals are not replayed;
//! `next_fire_at` jumps to the first boundary after `now`.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::dispatcher::{Dispatcher, SubmitRequest};
use super::handle::LoopHandle;
use crate::domain::{CourierError, ScheduleEntry, TaskId};
use crate::ports::{Clock, ScheduleStore, SchedulerLease};

/// One entry fired during a tick.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Fired {
    pub schedule: String,
    pub task_id: TaskId,
    pub next_fire_at: DateTime<Utc>,
}

/// Result of a single tick. Errors are per entry and do not abort the tick.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TickReport {
    /// `false` when another instance holds the lease.
    pub lease_held: bool,
    pub fired: Vec<Fired>,
    pub errors: Vec<(String, String)>,
}

pub struct Scheduler {
    store: Arc<dyn ScheduleStore>,
    dispatcher: Arc<Dispatcher>,
    lease: Arc<dyn SchedulerLease>,
    clock: Arc<dyn Clock>,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn ScheduleStore>,
        dispatcher: Arc<Dispatcher>,
        lease: Arc<dyn SchedulerLease>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            dispatcher,
            lease,
            clock,
        }
    }

    /// Add or replace an entry.
    pub async fn add(&self, entry: ScheduleEntry) -> Result<(), CourierError> {
        entry.interval.validate()?;
        tracing::info!(
            schedule = %entry.name,
            task = %entry.task_name,
            next_fire_at = %entry.next_fire_at,
            "schedule entry saved"
        );
        self.store.upsert(entry).await
    }

    pub async fn remove(&self, name: &str) -> Result<(), CourierError> {
        if self.store.remove(name).await? {
            Ok(())
        } else {
            Err(CourierError::ScheduleNotFound(name.to_string()))
        }
    }

    /// Resume firing. The next fire time is moved past `now` so a long pause
    /// does not fire immediately for the time spent disabled.
    pub async fn enable(&self, name: &str) -> Result<ScheduleEntry, CourierError> {
        let mut entry = self.get(name).await?;
        if !entry.enabled {
            let now = self.clock.now();
            entry.enabled = true;
            if entry.next_fire_at <= now
                && let Some(next) = entry.interval.next_after(now)
            {
                entry.next_fire_at = next;
            }
            self.store.upsert(entry.clone()).await?;
        }
        Ok(entry)
    }

    /// Suspend firing; history (`last_fired_at`) is kept.
    pub async fn disable(&self, name: &str) -> Result<ScheduleEntry, CourierError> {
        let mut entry = self.get(name).await?;
        if entry.enabled {
            entry.enabled = false;
            self.store.upsert(entry.clone()).await?;
        }
        Ok(entry)
    }

    pub async fn list(&self) -> Result<Vec<ScheduleEntry>, CourierError> {
        self.store.list().await
    }

    async fn get(&self, name: &str) -> Result<ScheduleEntry, CourierError> {
        self.store
            .get(name)
            .await?
            .ok_or_else(|| CourierError::ScheduleNotFound(name.to_string()))
    }

    pub async fn tick(&self) -> Result<TickReport, CourierError> {
        if !self.lease.try_hold().await {
            tracing::debug!("scheduler lease not held, skipping tick");
            return Ok(TickReport::default());
        }

        let now = self.clock.now();
        let mut report = TickReport {
            lease_held: true,
            ..TickReport::default()
        };

        for entry in self.store.list().await? {
            if !entry.is_due(now) {
                continue;
            }
            match self.fire(&entry, now).await {
                Ok(Some(fired)) => report.fired.push(fired),
                Ok(None) => {
                    tracing::debug!(schedule = %entry.name, "entry changed since listing, not fired");
                }
                Err(err) => {
                    tracing::warn!(schedule = %entry.name, error = %err, "schedule entry failed to fire");
                    report.errors.push((entry.name.clone(), err.to_string()));
                }
            }
        }
        Ok(report)
    }

    /// `None` when the stored entry was disabled, removed or already advanced
    /// by someone else since it was listed.
    async fn fire(&self, listed: &ScheduleEntry, now: DateTime<Utc>) -> Result<Option<Fired>, CourierError> {
        let Some(entry) = self.store.get(&listed.name).await? else {
            return Ok(None);
        };
        if !entry.is_due(now) || entry.next_fire_at != listed.next_fire_at {
            return Ok(None);
        }

        let advanced = entry.advanced(now);
        self.store.upsert(advanced.clone()).await?;

        let request = SubmitRequest::new(entry.task_name.clone(), entry.args.clone())
            .queue(entry.queue.clone())
            .retry_policy(entry.retry_policy.clone());
        let task_id = self.dispatcher.submit(request).await?;

        tracing::info!(
            schedule = %entry.name,
            task_id = %task_id,
            next_fire_at = %advanced.next_fire_at,
            "schedule fired"
        );
        Ok(Some(Fired {
            schedule: entry.name.clone(),
            task_id,
            next_fire_at: advanced.next_fire_at,
        }))
    }

    /// Tick every `interval` until shutdown is requested.
    pub fn spawn(self: Arc<Self>, interval: Duration) -> LoopHandle {
        LoopHandle::every("scheduler", interval, move || {
            let scheduler = Arc::clone(&self);
            async move {
                if let Err(err) = scheduler.tick().await {
                    tracing::error!(error = %err, "scheduler tick failed");
                }
            }
        })
    }
}
