//! Typed - task registry and the typed task API.
//!
//! - **Surface (typed)**: `Task`, `Handler<T>`
//! - **Inside (dyn)**: `DynHandler`, object-safe, keyed by name in the registry

pub mod codec;
pub mod handler;
pub mod registry;
pub mod task;

pub use self::codec::{CodecError, PayloadCodec};
pub use self::handler::{DynHandler, FnHandler, Handler, TypedHandler};
pub use self::registry::{RegistryError, TypedRegistry};
pub use self::task::Task;
