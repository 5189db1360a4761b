//! Retry policy carried by every envelope: attempt budget + backoff schedule.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Backoff schedule between retries.
///
/// Serialized with an explicit `kind` tag so envelopes stay readable:
/// `{"kind":"exponential","base_ms":2000,"multiplier":2.0,"max_ms":60000}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Backoff {
    /// Same delay before every retry.
    Fixed { delay_ms: u64 },

    /// `base_ms * multiplier^(retry - 1)`, capped at `max_ms`.
    Exponential {
        base_ms: u64,
        multiplier: f64,
        max_ms: u64,
    },
}

impl Backoff {
    pub fn fixed(delay: Duration) -> Self {
        Backoff::Fixed {
            delay_ms: duration_to_ms(delay),
        }
    }

    pub fn exponential(base: Duration, multiplier: f64, max: Duration) -> Self {
        Backoff::Exponential {
            base_ms: duration_to_ms(base),
            multiplier,
            max_ms: duration_to_ms(max),
        }
    }
}

/// Retry policy for one envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Upper bound for the envelope's `attempt` counter.
    pub max_attempts: u32,

    #[serde(default = "default_backoff")]
    pub backoff: Backoff,
}

fn default_backoff() -> Backoff {
    Backoff::exponential(Duration::from_secs(2), 2.0, Duration::from_secs(300))
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: default_backoff(),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Backoff) -> Self {
        Self {
            max_attempts,
            backoff,
        }
    }

    /// Policy that never retries.
    pub fn no_retry() -> Self {
        Self::new(0, Backoff::fixed(Duration::ZERO))
    }

    /// Is there budget left for one more retry after `attempt`?
    pub fn can_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Delay before the `retry`-th retry (1-indexed).
    ///
    /// Example with base=2s, multiplier=2.0:
    /// - retry 1: 2s
    /// - retry 2: 4s
    /// - retry 3: 8s
    pub fn next_delay(&self, retry: u32) -> Duration {
        match &self.backoff {
            Backoff::Fixed { delay_ms } => Duration::from_millis(*delay_ms),
            Backoff::Exponential {
                base_ms,
                multiplier,
                max_ms,
            } => {
                // 2^30 is far past any sane cap; keeps powi in range
                let exp = retry.saturating_sub(1).min(30) as i32;
                let delay_ms = (*base_ms as f64) * multiplier.powi(exp);
                let capped = delay_ms.min(*max_ms as f64).max(0.0);
                Duration::from_millis(capped as u64)
            }
        }
    }
}

fn duration_to_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
