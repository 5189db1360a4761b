//! Runtime configuration.
//!
//! Load order: defaults, then an optional JSON file, then `COURIER_*`
//! environment overrides, then `validate()`.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::app::backoff::TransportRetry;
use crate::domain::QueueName;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid value for {key}: {value}")]
    Env { key: String, value: String },

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format '{other}'")),
        }
    }
}

/// Worker pool settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Number of concurrent execution slots.
    pub concurrency: usize,
    /// Queues consumed; slots are spread round-robin across them.
    pub queues: Vec<QueueName>,
    /// How long one broker receive call may block.
    pub receive_wait_ms: u64,
    /// Per-task execution limit; an overrun counts as a retryable failure.
    pub task_timeout_ms: Option<u64>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 8,
            queues: vec![QueueName::default()],
            receive_wait_ms: 1_000,
            task_timeout_ms: None,
        }
    }
}

impl WorkerConfig {
    pub fn receive_wait(&self) -> Duration {
        Duration::from_millis(self.receive_wait_ms)
    }

    pub fn task_timeout(&self) -> Option<Duration> {
        self.task_timeout_ms.map(Duration::from_millis)
    }
}

/// Broker settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Unacked deliveries become redeliverable after this long.
    pub visibility_timeout_ms: u64,
    /// Per-queue limit on ready + delayed messages. `None` = unbounded.
    pub max_queue_depth: Option<usize>,
    /// How often the reaper returns expired deliveries.
    pub reclaim_interval_ms: u64,
    /// Upper bound on how long a waiting receive sleeps between checks.
    pub poll_interval_ms: u64,
    /// Per-queue dead letters kept; the oldest are dropped beyond this.
    pub dead_letter_limit: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            visibility_timeout_ms: 30_000,
            max_queue_depth: None,
            reclaim_interval_ms: 1_000,
            poll_interval_ms: 100,
            dead_letter_limit: 1_000,
        }
    }
}

impl BrokerConfig {
    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_millis(self.visibility_timeout_ms)
    }

    pub fn reclaim_interval(&self) -> Duration {
        Duration::from_millis(self.reclaim_interval_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    /// How often a worker renews the lease of a delivery it is still running.
    pub fn lease_renew_interval(&self) -> Duration {
        Duration::from_millis((self.visibility_timeout_ms / 3).max(1))
    }
}

/// Status store settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Record expiry, refreshed on every write.
    pub status_ttl_secs: u64,
    /// How often expired records are swept.
    pub gc_interval_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            status_ttl_secs: 24 * 60 * 60,
            gc_interval_ms: 60_000,
        }
    }
}

impl StoreConfig {
    pub fn status_ttl(&self) -> Duration {
        Duration::from_secs(self.status_ttl_secs)
    }

    pub fn gc_interval(&self) -> Duration {
        Duration::from_millis(self.gc_interval_ms)
    }
}

/// Scheduler settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub tick_interval_ms: u64,
    /// JSON file backing the schedule table. `None` keeps it in memory.
    pub schedule_file: Option<PathBuf>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1_000,
            schedule_file: None,
        }
    }
}

impl SchedulerConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CourierConfig {
    pub worker: WorkerConfig,
    pub broker: BrokerConfig,
    pub store: StoreConfig,
    pub scheduler: SchedulerConfig,
    pub transport_retry: TransportRetry,
    pub log_format: LogFormat,
}

impl CourierConfig {
    /// Defaults, optional file, process environment, validation.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply `COURIER_*` overrides read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = parse_var(&lookup, "COURIER_WORKER_CONCURRENCY")? {
            self.worker.concurrency = v;
        }
        if let Some(raw) = lookup("COURIER_WORKER_QUEUES") {
            self.worker.queues = raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(QueueName::new)
                .collect();
        }
        if let Some(v) = parse_var(&lookup, "COURIER_TASK_TIMEOUT_MS")? {
            self.worker.task_timeout_ms = Some(v);
        }
        if let Some(v) = parse_var(&lookup, "COURIER_VISIBILITY_TIMEOUT_MS")? {
            self.broker.visibility_timeout_ms = v;
        }
        if let Some(v) = parse_var(&lookup, "COURIER_MAX_QUEUE_DEPTH")? {
            self.broker.max_queue_depth = Some(v);
        }
        if let Some(v) = parse_var(&lookup, "COURIER_STATUS_TTL_SECS")? {
            self.store.status_ttl_secs = v;
        }
        if let Some(v) = parse_var(&lookup, "COURIER_SCHEDULER_TICK_MS")? {
            self.scheduler.tick_interval_ms = v;
        }
        if let Some(path) = lookup("COURIER_SCHEDULE_FILE") {
            self.scheduler.schedule_file = Some(PathBuf::from(path));
        }
        if let Some(v) = parse_var(&lookup, "COURIER_LOG_FORMAT")? {
            self.log_format = v;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker.concurrency == 0 {
            return Err(ConfigError::Invalid(
                "worker.concurrency must be at least 1".to_string(),
            ));
        }
        if self.worker.queues.is_empty() {
            return Err(ConfigError::Invalid(
                "worker.queues must name at least one queue".to_string(),
            ));
        }
        if self.broker.visibility_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "broker.visibility_timeout_ms must be positive".to_string(),
            ));
        }
        if self.broker.dead_letter_limit == 0 {
            return Err(ConfigError::Invalid(
                "broker.dead_letter_limit must be positive".to_string(),
            ));
        }
        if self.broker.max_queue_depth == Some(0) {
            return Err(ConfigError::Invalid(
                "broker.max_queue_depth must be positive when set".to_string(),
            ));
        }
        if self.store.status_ttl_secs == 0 {
            return Err(ConfigError::Invalid(
                "store.status_ttl_secs must be positive".to_string(),
            ));
        }
        if self.scheduler.tick_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "scheduler.tick_interval_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw.trim().parse().map(Some).map_err(|_| ConfigError::Env {
            key: key.to_string(),
            value: raw,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_are_valid() {
        let cfg = CourierConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.worker.concurrency, 8);
        assert_eq!(cfg.worker.queues, vec![QueueName::default()]);
        assert_eq!(cfg.broker.visibility_timeout(), Duration::from_secs(30));
        assert_eq!(cfg.broker.max_queue_depth, None);
        assert_eq!(cfg.broker.dead_letter_limit, 1_000);
        assert_eq!(cfg.broker.lease_renew_interval(), Duration::from_secs(10));
        assert_eq!(cfg.store.status_ttl(), Duration::from_secs(86_400));
        assert_eq!(cfg.log_format, LogFormat::Pretty);
    }

    #[test]
    fn partial_json_fills_in_defaults() {
        let cfg: CourierConfig = serde_json::from_str(
            r#"{ "worker": { "concurrency": 2 }, "broker": { "max_queue_depth": 100 } }"#,
        )
        .unwrap();
        assert_eq!(cfg.worker.concurrency, 2);
        assert_eq!(cfg.worker.receive_wait_ms, 1_000);
        assert_eq!(cfg.broker.max_queue_depth, Some(100));
        assert_eq!(cfg.scheduler.tick_interval_ms, 1_000);
    }

    #[test]
    fn env_overrides_file_values() {
        let mut cfg = CourierConfig::default();
        cfg.apply_env(env(&[
            ("COURIER_WORKER_CONCURRENCY", "3"),
            ("COURIER_WORKER_QUEUES", "default, profiling"),
            ("COURIER_MAX_QUEUE_DEPTH", "50"),
            ("COURIER_LOG_FORMAT", "json"),
        ]))
        .unwrap();

        assert_eq!(cfg.worker.concurrency, 3);
        assert_eq!(
            cfg.worker.queues,
            vec![QueueName::new("default"), QueueName::new("profiling")]
        );
        assert_eq!(cfg.broker.max_queue_depth, Some(50));
        assert_eq!(cfg.log_format, LogFormat::Json);
    }

    #[test]
    fn malformed_env_value_is_reported() {
        let mut cfg = CourierConfig::default();
        let err = cfg
            .apply_env(env(&[("COURIER_WORKER_CONCURRENCY", "many")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Env { key, .. } if key == "COURIER_WORKER_CONCURRENCY"));
    }

    #[test]
    fn zero_concurrency_is_invalid() {
        let mut cfg = CourierConfig::default();
        cfg.worker.concurrency = 0;
        assert!(matches!(cfg.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = CourierConfig::from_file(Path::new("/definitely/not/here.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
