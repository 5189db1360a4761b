//! Impls - in-process implementations of the ports.
//!
//! - **InMemoryBroker**: queues with delay heap, visibility timeout, dead letters
//! - **InMemoryStatusStore**: status records with per-key expiry
//! - **InMemoryScheduleStore** / **FileScheduleStore**: schedule tables
//!
//! Networked adapters (Redis, SQL, ...) implement the same traits in their
//! own crates.

pub mod file_schedule;
pub mod inmem_broker;
pub mod inmem_schedule;
pub mod inmem_status;

pub use self::file_schedule::FileScheduleStore;
pub use self::inmem_broker::InMemoryBroker;
pub use self::inmem_schedule::InMemoryScheduleStore;
pub use self::inmem_status::InMemoryStatusStore;
