//! Domain model: ids, envelopes, status records, schedule entries, errors.
//!
//! Everything here is plain data plus pure functions; I/O lives behind the
//! traits in `ports`.

pub mod decision;
pub mod envelope;
pub mod errors;
pub mod ids;
pub mod retry;
pub mod schedule;
pub mod state;
pub mod status;
pub mod task_type;

pub use self::decision::{Decider, Decision, DefaultDecider};
pub use self::envelope::TaskEnvelope;
pub use self::errors::{CourierError, ErrorKind, TaskError};
pub use self::ids::{LeaseId, ParseIdError, TaskId};
pub use self::retry::{Backoff, RetryPolicy};
pub use self::schedule::{Interval, ScheduleEntry};
pub use self::state::TaskState;
pub use self::status::StatusRecord;
pub use self::task_type::{QueueName, TaskName};
