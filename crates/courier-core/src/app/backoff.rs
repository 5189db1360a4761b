//! Local retry of transient transport failures (broker/store unreachable).
//!
//! This is infrastructure-level retry, separate from the per-envelope
//! `RetryPolicy` that governs task bodies.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::domain::CourierError;

/// Exponential backoff with jitter for transport calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportRetry {
    /// Total tries, including the first one.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// 0.0 to 1.0; 0.25 means +/-25%.
    pub jitter_percent: f64,
}

impl Default for TransportRetry {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 100,
            max_delay_ms: 5_000,
            jitter_percent: 0.25,
        }
    }
}

impl TransportRetry {
    /// No waiting, single try. Handy in tests.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay_ms: 0,
            max_delay_ms: 0,
            jitter_percent: 0.0,
        }
    }

    /// Delay after the `failures`-th consecutive failure (1-indexed).
    pub fn delay_for(&self, failures: u32) -> Duration {
        let exp = failures.saturating_sub(1).min(30) as i32;
        let base = (self.base_delay_ms as f64) * 2f64.powi(exp);
        let capped = base.min(self.max_delay_ms as f64);

        let jitter = self.jitter_percent.clamp(0.0, 1.0);
        let factor = if jitter == 0.0 {
            1.0
        } else {
            1.0 + rand::thread_rng().gen_range(-jitter..=jitter)
        };
        Duration::from_millis((capped * factor).max(0.0) as u64)
    }

    /// Run `op`, retrying transient errors up to `max_attempts` tries.
    ///
    /// Non-transient errors are returned immediately.
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T, CourierError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CourierError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut failures = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && failures + 1 < max_attempts => {
                    failures += 1;
                    let delay = self.delay_for(failures);
                    tracing::warn!(
                        op = what,
                        failures,
                        ?delay,
                        error = %err,
                        "transient failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
