//! Handler trait - the body executed for a task.
//!
//! Two layers:
//! - `Handler<T>`: typed, checked at compile time against `T: Task`
//! - `DynHandler`: object-safe, works on raw envelope args
//!
//! `TypedHandler<T, H>` erases the first into the second; `FnHandler` wraps a
//! plain async closure over raw args.

use std::future::Future;
use std::marker::PhantomData;

use async_trait::async_trait;
use serde_json::Value;

use super::codec::PayloadCodec;
use super::task::Task;
use crate::domain::{CourierError, TaskName};

/// Executes one `T`.
///
/// Return `CourierError::retryable(..)` for failures worth another attempt
/// and `CourierError::terminal(..)` for ones that are not.
///
/// # Example
/// ```ignore
/// struct ResizeHandler;
///
/// #[async_trait]
/// impl Handler<Resize> for ResizeHandler {
///     async fn handle(&self, task: Resize) -> Result<String, CourierError> {
///         Ok(format!("{}@{}x{}", task.0, task.1, task.2))
///     }
/// }
/// ```
#[async_trait]
pub trait Handler<T: Task>: Send + Sync {
    async fn handle(&self, task: T) -> Result<T::Output, CourierError>;
}

/// Object-safe task body stored in the registry.
#[async_trait]
pub trait DynHandler: Send + Sync {
    async fn handle_dyn(&self, args: Vec<Value>) -> Result<Value, CourierError>;

    fn name(&self) -> &str;
}

pub struct TypedHandler<T: Task, H: Handler<T>> {
    handler: H,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Task, H: Handler<T>> TypedHandler<T, H> {
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<T: Task, H: Handler<T>> DynHandler for TypedHandler<T, H> {
    async fn handle_dyn(&self, args: Vec<Value>) -> Result<Value, CourierError> {
        let task: T = PayloadCodec::decode(args)?;
        let output = self.handler.handle(task).await?;
        Ok(serde_json::to_value(output)?)
    }

    fn name(&self) -> &str {
        T::NAME
    }
}

/// Untyped body built from an async closure over the raw args.
pub struct FnHandler<F> {
    name: TaskName,
    f: F,
}

impl<F, Fut> FnHandler<F>
where
    F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, CourierError>> + Send + 'static,
{
    pub fn new(name: impl Into<TaskName>, f: F) -> Self {
        Self { name: name.into(), f }
    }
}

#[async_trait]
impl<F, Fut> DynHandler for FnHandler<F>
where
    F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, CourierError>> + Send + 'static,
{
    async fn handle_dyn(&self, args: Vec<Value>) -> Result<Value, CourierError> {
        (self.f)(args).await
    }

    fn name(&self) -> &str {
        self.name.as_str()
    }
}
