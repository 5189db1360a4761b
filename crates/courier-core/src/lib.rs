//! courier-core
//!
//! Distributed task queue core: producers submit named tasks, workers
//! execute them with at-least-once delivery, a scheduler fires recurring
//! entries, and per-task status records can be polled.
//!
//! # Modules
//! - **domain**: ids, envelope, retry policy, status record, schedule entry, errors, decider
//! - **ports**: Broker, StatusStore, ScheduleStore, SchedulerLease, Clock, IdGenerator
//! - **impls**: in-memory broker and stores, file-backed schedule store
//! - **typed**: Task / Handler traits and the TypedRegistry
//! - **app**: builder, dispatcher, worker pool, scheduler, maintenance loops, monitor
//! - **config** / **observability**: runtime settings and tracing setup

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod observability;
pub mod ports;
pub mod typed;

pub use crate::app::{App, AppBuilder, Dispatcher, SubmitRequest};
pub use crate::config::CourierConfig;
pub use crate::domain::{CourierError, TaskId, TaskState};
