//! TypedRegistry - task bodies by name, built once at start-up.
//!
//! Read-only after construction: workers share it behind an `Arc`.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use serde_json::Value;

use super::handler::{DynHandler, FnHandler, Handler, TypedHandler};
use super::task::Task;
use crate::domain::{CourierError, TaskName};

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("a task body named '{0}' is already registered")]
    AlreadyRegistered(TaskName),
}

#[derive(Default)]
pub struct TypedRegistry {
    handlers: HashMap<TaskName, Arc<dyn DynHandler>>,
}

impl TypedRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<T: Task, H: Handler<T> + 'static>(&mut self, handler: H) -> Result<(), RegistryError> {
        self.register_dyn(Arc::new(TypedHandler::<T, H>::new(handler)))
    }

    pub fn register_fn<F, Fut>(&mut self, name: impl Into<TaskName>, f: F) -> Result<(), RegistryError>
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, CourierError>> + Send + 'static,
    {
        self.register_dyn(Arc::new(FnHandler::new(name, f)))
    }

    /// Register under `handler.name()`. Duplicate names are rejected.
    pub fn register_dyn(&mut self, handler: Arc<dyn DynHandler>) -> Result<(), RegistryError> {
        let name = TaskName::new(handler.name());
        if self.handlers.contains_key(&name) {
            return Err(RegistryError::AlreadyRegistered(name));
        }
        self.handlers.insert(name, handler);
        Ok(())
    }

    pub fn lookup(&self, name: &TaskName) -> Option<Arc<dyn DynHandler>> {
        self.handlers.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(&TaskName::new(name))
    }

    /// Registered names, sorted.
    pub fn registered_names(&self) -> Vec<TaskName> {
        let mut names: Vec<TaskName> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde::{Deserialize, Serialize};
    use serde_json::json;

    #[derive(Debug, Serialize, Deserialize)]
    struct Echo(Value);

    impl Task for Echo {
        const NAME: &'static str = "echo";
        type Output = Value;
    }

    struct EchoHandler;

    #[async_trait]
    impl Handler<Echo> for EchoHandler {
        async fn handle(&self, task: Echo) -> Result<Value, CourierError> {
            Ok(task.0)
        }
    }

    #[tokio::test]
    async fn register_then_lookup() {
        let mut registry = TypedRegistry::new();
        registry.register::<Echo, _>(EchoHandler).unwrap();

        let handler = registry.lookup(&TaskName::new("echo")).unwrap();
        assert_eq!(handler.handle_dyn(vec![json!("hi")]).await.unwrap(), json!("hi"));
        assert!(registry.lookup(&TaskName::new("nope")).is_none());
    }

    #[test]
    fn duplicate_name_is_rejected() {
        let mut registry = TypedRegistry::new();
        registry.register::<Echo, _>(EchoHandler).unwrap();

        let typed_again = registry.register::<Echo, _>(EchoHandler);
        assert!(matches!(typed_again, Err(RegistryError::AlreadyRegistered(n)) if n.as_str() == "echo"));

        let fn_again = registry.register_fn("echo", |_args| async { Ok(Value::Null) });
        assert!(fn_again.is_err());
    }

    #[test]
    fn registered_names_are_sorted() {
        let mut registry = TypedRegistry::new();
        registry.register_fn("zeta", |_args| async { Ok(Value::Null) }).unwrap();
        registry.register::<Echo, _>(EchoHandler).unwrap();

        assert_eq!(
            registry.registered_names(),
            vec![TaskName::new("echo"), TaskName::new("zeta")]
        );
        assert_eq!(registry.len(), 2);
        assert!(registry.contains("zeta"));
    }
}
