//! IdGenerator port - id allocation for tasks and broker leases.

use std::sync::Arc;

use ulid::Ulid;

use crate::domain::ids::{LeaseId, TaskId};
use crate::ports::Clock;

/// Generates ids usable across processes without coordination.
pub trait IdGenerator: Send + Sync {
    fn generate_task_id(&self) -> TaskId;

    fn generate_lease_id(&self) -> LeaseId;
}

/// ULID-based generator; the timestamp part comes from the injected Clock so
/// tests with a `FixedClock` get predictable ordering prefixes.
pub struct UlidGenerator {
    clock: Arc<dyn Clock>,
}

impl UlidGenerator {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    fn next_ulid(&self) -> Ulid {
        let timestamp_ms = u64::try_from(self.clock.now().timestamp_millis()).unwrap_or(0);
        Ulid::from_parts(timestamp_ms, rand::random())
    }
}

impl IdGenerator for UlidGenerator {
    fn generate_task_id(&self) -> TaskId {
        TaskId::from(self.next_ulid())
    }

    fn generate_lease_id(&self) -> LeaseId {
        LeaseId::from(self.next_ulid())
    }
}
