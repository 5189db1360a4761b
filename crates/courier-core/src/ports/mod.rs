//! Ports - the seams between the core and its infrastructure.
//!
//! Each trait stands for an external system (message broker, key-value store,
//! durable schedule table, leader lease). In-memory and file-backed versions
//! live in `impls`; production adapters implement the same traits.

pub mod broker;
pub mod clock;
pub mod id_generator;
pub mod lease;
pub mod schedule_store;
pub mod status_store;

pub use self::broker::{AckHandle, Broker, Consumer, Delivery, QueueDepth, consume};
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::lease::{SchedulerLease, SingleNodeLease};
pub use self::schedule_store::ScheduleStore;
pub use self::status_store::{CreateOutcome, StatusStore, WriteOutcome};
