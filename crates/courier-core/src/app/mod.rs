//! App - application layer composed from the ports.
//!
//! # Components
//! - **AppBuilder**: wiring and start-up validation
//! - **Dispatcher**: `submit` / `cancel`
//! - **WorkerPool**: slots executing deliveries (lease -> run -> decide -> write -> ack)
//! - **Scheduler**: fires due schedule entries
//! - **ReaperLoop**: returns expired deliveries
//! - **GcLoop**: evicts expired status records
//! - **Monitor**: read-only status and queue views

pub mod backoff;
pub mod builder;
pub mod dispatcher;
pub mod gc_loop;
pub mod handle;
pub mod reaper_loop;
pub mod scheduler;
pub mod status;
pub mod worker_loop;

pub use self::backoff::TransportRetry;
pub use self::builder::{App, AppBuilder, BuildError, Running};
pub use self::dispatcher::{Dispatcher, SubmitRequest};
pub use self::gc_loop::GcLoop;
pub use self::handle::LoopHandle;
pub use self::reaper_loop::ReaperLoop;
pub use self::scheduler::{Fired, Scheduler, TickReport};
pub use self::status::{Monitor, QueueCounts, Snapshot};
pub use self::worker_loop::{LeaseRenewal, Processed, WorkerContext, WorkerPool};
