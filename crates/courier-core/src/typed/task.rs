//! Task trait - binds a task name to its argument type.
//!
//! # Trait Bounds
//! - `Serialize`: producers encode the task into envelope args
//! - `DeserializeOwned`: workers decode envelope args back into the task
//! - `Send + Sync + 'static`: handlers live behind `Arc` in the registry

use serde::Serialize;
use serde::de::DeserializeOwned;

/// A task body's typed input.
///
/// # Example
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct Resize(String, u32, u32);
///
/// impl Task for Resize {
///     const NAME: &'static str = "images.resize";
///     type Output = String;
/// }
/// ```
///
/// Args travel as a JSON array, so tuple structs map one field per
/// positional argument. A task with a single field may also be a newtype.
pub trait Task: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Registry name; matched against `TaskEnvelope::name`.
    const NAME: &'static str;

    /// What the body returns; stored as the record's `result`.
    type Output: Serialize + Send + 'static;
}
