//! AppBuilder - wiring of ports, registry and loops.
//!
//! # Fail-fast
//! - `expect_tasks()` lists task names the deployment relies on
//! - `build()` checks expected ⊆ registered and returns `BuildError` otherwise
//! - the configuration is validated before anything starts

use std::future::Future;
use std::sync::Arc;

use serde_json::Value;

use super::dispatcher::Dispatcher;
use super::gc_loop::GcLoop;
use super::handle::LoopHandle;
use super::reaper_loop::ReaperLoop;
use super::scheduler::Scheduler;
use super::status::Monitor;
use super::worker_loop::{LeaseRenewal, WorkerContext, WorkerPool};
use crate::config::{ConfigError, CourierConfig};
use crate::domain::{CourierError, Decider, DefaultDecider};
use crate::impls::{FileScheduleStore, InMemoryBroker, InMemoryScheduleStore, InMemoryStatusStore};
use crate::ports::{
    Broker, Clock, IdGenerator, ScheduleStore, SchedulerLease, SingleNodeLease, StatusStore,
    SystemClock, UlidGenerator,
};
use crate::typed::{Handler, RegistryError, Task, TypedRegistry};

/// Builds an [`App`].
///
/// # Example
/// ```ignore
/// let app = AppBuilder::new()
///     .with_config(config)
///     .register::<Resize, _>(ResizeHandler)?
///     .expect_tasks(&["images.resize"])
///     .build()
///     .await?;
/// ```
///
/// Any port left unset gets its in-process implementation.
pub struct AppBuilder {
    registry: TypedRegistry,
    expected_tasks: Option<Vec<String>>,
    config: CourierConfig,
    clock: Option<Arc<dyn Clock>>,
    broker: Option<Arc<dyn Broker>>,
    store: Option<Arc<dyn StatusStore>>,
    schedules: Option<Arc<dyn ScheduleStore>>,
    lease: Option<Arc<dyn SchedulerLease>>,
    decider: Option<Arc<dyn Decider>>,
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("missing task bodies: {0:?}. These tasks were expected but not registered.")]
    MissingTaskTypes(Vec<String>),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to open schedule store: {0}")]
    ScheduleStore(#[source] CourierError),
}

impl AppBuilder {
    pub fn new() -> Self {
        Self {
            registry: TypedRegistry::new(),
            expected_tasks: None,
            config: CourierConfig::default(),
            clock: None,
            broker: None,
            store: None,
            schedules: None,
            lease: None,
            decider: None,
        }
    }

    pub fn with_config(mut self, config: CourierConfig) -> Self {
        self.config = config;
        self
    }

    pub fn register<T: Task, H: Handler<T> + 'static>(mut self, handler: H) -> Result<Self, RegistryError> {
        self.registry.register::<T, H>(handler)?;
        Ok(self)
    }

    pub fn register_fn<F, Fut>(mut self, name: &str, f: F) -> Result<Self, RegistryError>
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, CourierError>> + Send + 'static,
    {
        self.registry.register_fn(name, f)?;
        Ok(self)
    }

    /// Task names that must be registered by the time `build()` runs.
    pub fn expect_tasks(mut self, names: &[&str]) -> Self {
        self.expected_tasks = Some(names.iter().map(|n| n.to_string()).collect());
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn broker(mut self, broker: Arc<dyn Broker>) -> Self {
        self.broker = Some(broker);
        self
    }

    pub fn status_store(mut self, store: Arc<dyn StatusStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn schedule_store(mut self, store: Arc<dyn ScheduleStore>) -> Self {
        self.schedules = Some(store);
        self
    }

    pub fn scheduler_lease(mut self, lease: Arc<dyn SchedulerLease>) -> Self {
        self.lease = Some(lease);
        self
    }

    pub fn decider(mut self, decider: Arc<dyn Decider>) -> Self {
        self.decider = Some(decider);
        self
    }

    pub async fn build(self) -> Result<App, BuildError> {
        self.config.validate()?;

        if let Some(expected) = &self.expected_tasks {
            let missing: Vec<String> = expected
                .iter()
                .filter(|name| !self.registry.contains(name))
                .cloned()
                .collect();
            if !missing.is_empty() {
                return Err(BuildError::MissingTaskTypes(missing));
            }
        }

        let config = self.config;
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let broker = self.broker.unwrap_or_else(|| {
            Arc::new(InMemoryBroker::new(config.broker.clone(), Arc::clone(&clock)))
        });
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryStatusStore::new(Arc::clone(&clock))));
        let schedules: Arc<dyn ScheduleStore> = match (self.schedules, &config.scheduler.schedule_file) {
            (Some(schedules), _) => schedules,
            (None, Some(path)) => Arc::new(
                FileScheduleStore::open(path.clone())
                    .await
                    .map_err(BuildError::ScheduleStore)?,
            ),
            (None, None) => Arc::new(InMemoryScheduleStore::new()),
        };
        let lease = self.lease.unwrap_or_else(|| Arc::new(SingleNodeLease));
        let decider = self.decider.unwrap_or_else(|| Arc::new(DefaultDecider));
        let ids: Arc<dyn IdGenerator> = Arc::new(UlidGenerator::new(Arc::clone(&clock)));

        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&broker),
            Arc::clone(&store),
            Arc::clone(&clock),
            ids,
            config.store.status_ttl(),
            config.transport_retry.clone(),
        ));
        let scheduler = Arc::new(Scheduler::new(
            schedules,
            Arc::clone(&dispatcher),
            lease,
            Arc::clone(&clock),
        ));
        let monitor = Monitor::new(Arc::clone(&store), Arc::clone(&broker));
        let worker_context = Arc::new(WorkerContext {
            broker: Arc::clone(&broker),
            store: Arc::clone(&store),
            registry: Arc::new(self.registry),
            decider,
            clock,
            status_ttl: config.store.status_ttl(),
            task_timeout: config.worker.task_timeout(),
            lease_renewal: LeaseRenewal::from_config(&config.broker),
            transport: config.transport_retry.clone(),
        });

        tracing::info!(
            tasks = ?worker_context.registry.registered_names(),
            "application built"
        );
        Ok(App {
            config,
            broker,
            store,
            dispatcher,
            scheduler,
            monitor,
            worker_context,
        })
    }
}

impl Default for AppBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A wired application: producer API, monitor, and what workers need.
pub struct App {
    pub config: CourierConfig,
    pub broker: Arc<dyn Broker>,
    pub store: Arc<dyn StatusStore>,
    pub dispatcher: Arc<Dispatcher>,
    pub scheduler: Arc<Scheduler>,
    pub monitor: Monitor,
    pub worker_context: Arc<WorkerContext>,
}

impl App {
    /// Start the worker pool, scheduler, reaper and gc loops.
    pub fn start(&self) -> Running {
        let workers = WorkerPool::spawn(Arc::clone(&self.worker_context), &self.config.worker);
        let scheduler = Arc::clone(&self.scheduler).spawn(self.config.scheduler.tick_interval());
        let reaper = ReaperLoop::new(Arc::clone(&self.broker)).spawn(self.config.broker.reclaim_interval());
        let gc = GcLoop::new(Arc::clone(&self.store)).spawn(self.config.store.gc_interval());
        Running {
            workers,
            loops: vec![scheduler, reaper, gc],
        }
    }
}

/// Handle to everything `App::start` spawned.
pub struct Running {
    workers: WorkerPool,
    loops: Vec<LoopHandle>,
}

impl Running {
    /// Stop firing schedules, stop leasing, wait for running bodies, then
    /// stop the maintenance loops.
    pub async fn shutdown(self) {
        let mut loops = self.loops.into_iter();
        if let Some(scheduler) = loops.next() {
            scheduler.shutdown_and_join().await;
        }
        self.workers.shutdown_and_join().await;
        for handle in loops {
            handle.shutdown_and_join().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TaskState;
    use crate::app::dispatcher::SubmitRequest;
    use serde_json::json;
    use std::time::Duration;

    fn echo_builder() -> AppBuilder {
        AppBuilder::new()
            .register_fn("echo", |args: Vec<Value>| async move { Ok(Value::Array(args)) })
            .unwrap()
    }

    #[tokio::test]
    async fn build_success() {
        let app = echo_builder().expect_tasks(&["echo"]).build().await;
        assert!(app.is_ok());
    }

    #[tokio::test]
    async fn build_missing_task_types() {
        let app = echo_builder().expect_tasks(&["echo", "resize"]).build().await;
        assert!(matches!(
            app,
            Err(BuildError::MissingTaskTypes(missing)) if missing == vec!["resize".to_string()]
        ));
    }

    #[tokio::test]
    async fn build_rejects_invalid_config() {
        let mut config = CourierConfig::default();
        config.worker.concurrency = 0;
        let app = echo_builder().with_config(config).build().await;
        assert!(matches!(app, Err(BuildError::Config(_))));
    }

    #[test]
    fn duplicate_registration_fails_fast() {
        let result = echo_builder().register_fn("echo", |_args| async { Ok(Value::Null) });
        assert!(matches!(result, Err(RegistryError::AlreadyRegistered(_))));
    }

    #[tokio::test]
    async fn started_app_runs_submitted_task() {
        let mut config = CourierConfig::default();
        config.worker.concurrency = 2;
        config.worker.receive_wait_ms = 20;
        let app = echo_builder().with_config(config).build().await.unwrap();
        let running = app.start();

        let id = app
            .dispatcher
            .submit(SubmitRequest::new("echo", vec![json!(1), json!(2)]))
            .await
            .unwrap();

        let mut record = None;
        for _ in 0..200 {
            record = app.monitor.task_status(id).await.unwrap();
            if record.as_ref().is_some_and(|r| r.is_terminal()) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        running.shutdown().await;

        let record = record.unwrap();
        assert_eq!(record.state, TaskState::Success);
        assert_eq!(record.result, Some(json!([1, 2])));
    }
}
