//! SchedulerLease port - external mutual exclusion for the Scheduler.
//!
//! Only one Scheduler may fire entries at a time. Leader election is not part
//! of this crate; deployments plug in whatever lease they already have (a
//! database advisory lock, a key with TTL, ...). Single-process setups use
//! `SingleNodeLease`.

use async_trait::async_trait;

#[async_trait]
pub trait SchedulerLease: Send + Sync {
    /// Acquire or renew the lease. `false` means another instance holds it
    /// and this tick must not fire anything.
    async fn try_hold(&self) -> bool;
}

/// Always held. Correct only when a single Scheduler runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct SingleNodeLease;

#[async_trait]
impl SchedulerLease for SingleNodeLease {
    async fn try_hold(&self) -> bool {
        true
    }
}
