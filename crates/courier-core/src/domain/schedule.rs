//! Schedule entries: recurring task definitions owned by the Scheduler.

use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use cron::Schedule as CronSchedule;
use serde::{Deserialize, Serialize};

use super::errors::CourierError;
use super::retry::RetryPolicy;
use super::task_type::{QueueName, TaskName};

/// How often an entry fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Interval {
    /// Fixed period, aligned on the entry's first fire time.
    Every { secs: u64 },

    /// Cron expression. 5 fields (minute precision) or 6/7 fields (with seconds).
    Cron { expr: String },
}

impl Interval {
    pub fn every(period: Duration) -> Self {
        Interval::Every {
            secs: period.as_secs(),
        }
    }

    pub fn cron(expr: impl Into<String>) -> Self {
        Interval::Cron { expr: expr.into() }
    }

    pub fn validate(&self) -> Result<(), CourierError> {
        match self {
            Interval::Every { secs: 0 } => Err(CourierError::InvalidSchedule(
                "interval must be at least one second".to_string(),
            )),
            Interval::Every { .. } => Ok(()),
            Interval::Cron { expr } => parse_cron(expr).map(|_| ()),
        }
    }

    /// First boundary strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Interval::Every { secs } => {
                let period = chrono::Duration::seconds(i64::try_from(*secs).ok()?);
                after.checked_add_signed(period)
            }
            Interval::Cron { expr } => parse_cron(expr).ok()?.after(&after).next(),
        }
    }

    /// Next boundary strictly after `now`, stepping from `anchor` (a past
    /// boundary) without materialising every missed one.
    fn resync(&self, anchor: DateTime<Utc>, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Interval::Every { secs } => {
                let period = i64::try_from(*secs).ok()?.max(1);
                let behind = (now - anchor).num_seconds().max(0);
                let steps = behind / period + 1;
                anchor.checked_add_signed(chrono::Duration::seconds(steps.checked_mul(period)?))
            }
            Interval::Cron { .. } => self.next_after(now),
        }
    }
}

/// cron crate wants a seconds field; accept the common 5-field form too.
fn parse_cron(expr: &str) -> Result<CronSchedule, CourierError> {
    let fields = expr.split_whitespace().count();
    let normalized = if fields == 5 {
        format!("0 {expr}")
    } else {
        expr.to_string()
    };
    CronSchedule::from_str(&normalized)
        .map_err(|e| CourierError::InvalidSchedule(format!("{expr}: {e}")))
}

/// A recurring task definition, persisted by name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub name: String,
    pub task_name: TaskName,
    #[serde(default)]
    pub args: Vec<serde_json::Value>,
    #[serde(default)]
    pub queue: QueueName,
    #[serde(default)]
    pub retry_policy: RetryPolicy,
    pub interval: Interval,
    pub next_fire_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_fired_at: Option<DateTime<Utc>>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

const fn default_true() -> bool {
    true
}

impl ScheduleEntry {
    /// New enabled entry whose first firing is one interval after `now`.
    pub fn new(
        name: impl Into<String>,
        task_name: TaskName,
        interval: Interval,
        now: DateTime<Utc>,
    ) -> Result<Self, CourierError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(CourierError::InvalidSchedule(
                "schedule name must not be empty".to_string(),
            ));
        }
        interval.validate()?;
        let next_fire_at = interval.next_after(now).ok_or_else(|| {
            CourierError::InvalidSchedule(format!("{name}: interval never fires"))
        })?;
        Ok(Self {
            name,
            task_name,
            args: Vec::new(),
            queue: QueueName::default(),
            retry_policy: RetryPolicy::default(),
            interval,
            next_fire_at,
            last_fired_at: None,
            enabled: true,
        })
    }

    pub fn with_args(mut self, args: Vec<serde_json::Value>) -> Self {
        self.args = args;
        self
    }

    pub fn with_queue(mut self, queue: QueueName) -> Self {
        self.queue = queue;
        self
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    /// Override the first fire time (e.g. fire immediately on creation).
    pub fn starting_at(mut self, at: DateTime<Utc>) -> Self {
        self.next_fire_at = at;
        self
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.enabled && self.next_fire_at <= now
    }

    /// Entry after one firing at `now`.
    ///
    /// Missed intervals are not replayed: `next_fire_at` jumps to the first
    /// boundary after `now`. An interval with no future boundary disables the
    /// entry instead.
    pub fn advanced(&self, now: DateTime<Utc>) -> Self {
        let mut next = self.clone();
        next.last_fired_at = Some(now);
        match self.interval.resync(self.next_fire_at, now) {
            Some(at) => next.next_fire_at = at.max(self.next_fire_at),
            None => next.enabled = false,
        }
        next
    }
}
