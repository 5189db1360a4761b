//! Sample task bodies registered by the binary.

use std::time::Duration;

use async_trait::async_trait;
use courier_core::CourierError;
use courier_core::typed::{Handler, RegistryError, Task};
use courier_core::AppBuilder;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const ECHO: &str = "echo";
pub const ALWAYS_FAILS: &str = "always_fails";
pub const SLEEP: &str = "sleep";

/// `add(a, b)`, the typed sample.
#[derive(Debug, Serialize, Deserialize)]
pub struct Add(pub i64, pub i64);

impl Task for Add {
    const NAME: &'static str = "add";
    type Output = i64;
}

pub struct AddHandler;

#[async_trait]
impl Handler<Add> for AddHandler {
    async fn handle(&self, task: Add) -> Result<i64, CourierError> {
        task.0
            .checked_add(task.1)
            .ok_or_else(|| CourierError::terminal("integer overflow"))
    }
}

/// Returns its first argument (or `null`).
pub async fn echo(args: Vec<Value>) -> Result<Value, CourierError> {
    Ok(args.into_iter().next().unwrap_or(Value::Null))
}

/// Fails with a retryable error every time.
pub async fn always_fails(_args: Vec<Value>) -> Result<Value, CourierError> {
    Err(CourierError::retryable("this task always fails"))
}

/// Sleeps for `args[0]` seconds.
pub async fn sleep(args: Vec<Value>) -> Result<Value, CourierError> {
    let secs = args
        .first()
        .and_then(Value::as_f64)
        .ok_or_else(|| CourierError::terminal("sleep expects a number of seconds"))?;
    if !(0.0..=3600.0).contains(&secs) {
        return Err(CourierError::terminal(format!("sleep out of range: {secs}")));
    }
    tokio::time::sleep(Duration::from_secs_f64(secs)).await;
    Ok(Value::from(secs))
}

pub fn register_all(builder: AppBuilder) -> Result<AppBuilder, RegistryError> {
    builder
        .register::<Add, _>(AddHandler)?
        .register_fn(ECHO, echo)?
        .register_fn(ALWAYS_FAILS, always_fails)?
        .register_fn(SLEEP, sleep)
}

/// Names the binary expects to be present at start-up.
pub fn expected() -> [&'static str; 4] {
    [Add::NAME, ECHO, ALWAYS_FAILS, SLEEP]
}
