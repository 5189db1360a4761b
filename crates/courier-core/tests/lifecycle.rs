//! End-to-end task lifecycle against the in-process broker and status store.
//!
//! Deliveries are driven one at a time through `WorkerContext::process` with a
//! fixed clock, so every step is deterministic.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use courier_core::app::{App, AppBuilder, Processed, SubmitRequest, TransportRetry};
use courier_core::config::{BrokerConfig, CourierConfig};
use courier_core::domain::{Backoff, CourierError, ErrorKind, Interval, QueueName, RetryPolicy, ScheduleEntry, TaskName, TaskState};
use courier_core::impls::InMemoryBroker;
use courier_core::ports::{Broker, Clock, FixedClock};
use rstest::rstest;
use serde_json::{Value, json};

struct Harness {
    clock: Arc<FixedClock>,
    broker: Arc<InMemoryBroker>,
    app: App,
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
}

async fn harness() -> Harness {
    let clock = Arc::new(FixedClock::new(t0()));
    let broker = Arc::new(InMemoryBroker::new(BrokerConfig::default(), clock.clone()));
    let config = CourierConfig {
        transport_retry: TransportRetry::none(),
        ..CourierConfig::default()
    };
    let app = AppBuilder::new()
        .with_config(config)
        .clock(clock.clone())
        .broker(broker.clone())
        .register_fn("echo", |args: Vec<Value>| async move {
            Ok(args.into_iter().next().unwrap_or(Value::Null))
        })
        .unwrap()
        .register_fn("always_fails", |_args| async {
            Err(CourierError::retryable("still broken"))
        })
        .unwrap()
        .build()
        .await
        .unwrap();
    Harness { clock, broker, app }
}

impl Harness {
    async fn step(&self) -> Option<Processed> {
        let delivery = self
            .broker
            .receive(&QueueName::default(), Duration::from_millis(10))
            .await
            .unwrap()?;
        Some(self.app.worker_context.process(delivery).await.unwrap())
    }

    async fn drain(&self) -> Vec<Processed> {
        let mut seen = Vec::new();
        while let Some(processed) = self.step().await {
            seen.push(processed);
        }
        seen
    }

    async fn state(&self, id: courier_core::TaskId) -> courier_core::domain::StatusRecord {
        self.app.monitor.task_status(id).await.unwrap().unwrap()
    }
}

#[tokio::test]
async fn echo_succeeds_with_its_argument() {
    let h = harness().await;
    let id = h
        .app
        .dispatcher
        .submit(SubmitRequest::new("echo", vec![json!("hello")]))
        .await
        .unwrap();
    assert_eq!(h.state(id).await.state, TaskState::Pending);

    assert_eq!(h.drain().await, vec![Processed::Succeeded]);

    let record = h.state(id).await;
    assert_eq!(record.state, TaskState::Success);
    assert_eq!(record.result, Some(json!("hello")));
    assert_eq!(record.attempt, 0);
}

#[rstest]
#[case(0, vec![Processed::Failed])]
#[case(2, vec![Processed::Retried, Processed::Retried, Processed::Failed])]
#[tokio::test]
async fn retry_budget_is_spent_before_failure(#[case] max_attempts: u32, #[case] expected: Vec<Processed>) {
    let h = harness().await;
    let request = SubmitRequest::new("always_fails", vec![])
        .retry_policy(RetryPolicy::new(max_attempts, Backoff::fixed(Duration::ZERO)));
    let id = h.app.dispatcher.submit(request).await.unwrap();

    assert_eq!(h.drain().await, expected);

    let record = h.state(id).await;
    assert_eq!(record.state, TaskState::Failure);
    assert_eq!(record.attempt, max_attempts);
    assert_eq!(record.error.map(|e| e.kind), Some(ErrorKind::RetryableTaskError));
}

#[tokio::test]
async fn retry_waits_for_backoff_before_redelivery() {
    let h = harness().await;
    let request = SubmitRequest::new("always_fails", vec![])
        .retry_policy(RetryPolicy::new(1, Backoff::fixed(Duration::from_secs(30))));
    let id = h.app.dispatcher.submit(request).await.unwrap();

    assert_eq!(h.drain().await, vec![Processed::Retried]);
    assert_eq!(h.state(id).await.state, TaskState::Pending);

    h.clock.advance(chrono::Duration::seconds(30));
    assert_eq!(h.drain().await, vec![Processed::Failed]);
    assert_eq!(h.state(id).await.attempt, 1);
}

#[tokio::test]
async fn unknown_task_name_fails_without_retry() {
    let h = harness().await;
    let id = h
        .app
        .dispatcher
        .submit(SubmitRequest::new("no_such_task", vec![]))
        .await
        .unwrap();

    assert_eq!(h.drain().await, vec![Processed::Failed]);

    let record = h.state(id).await;
    assert_eq!(record.state, TaskState::Failure);
    assert_eq!(record.attempt, 0);
    assert_eq!(record.error.map(|e| e.kind), Some(ErrorKind::UnknownTaskError));
}

#[tokio::test]
async fn dedup_key_returns_live_task_then_releases_after_completion() {
    let h = harness().await;
    let request = || SubmitRequest::new("echo", vec![json!(1)]).dedup_key("nightly-report");

    let first = h.app.dispatcher.submit(request()).await.unwrap();
    let second = h.app.dispatcher.submit(request()).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(h.broker.depth(&QueueName::default()).await.unwrap().ready, 1);

    h.drain().await;
    let third = h.app.dispatcher.submit(request()).await.unwrap();
    assert_ne!(first, third);
}

#[tokio::test]
async fn cancelled_task_is_not_executed_on_delivery() {
    let h = harness().await;
    let id = h
        .app
        .dispatcher
        .submit(SubmitRequest::new("echo", vec![json!("x")]))
        .await
        .unwrap();

    let cancelled = h.app.dispatcher.cancel(id, "operator").await.unwrap();
    assert_eq!(cancelled.state, TaskState::Failure);

    assert_eq!(h.drain().await, vec![Processed::Skipped]);
    let record = h.state(id).await;
    assert_eq!(record.state, TaskState::Failure);
    assert_eq!(record.result, None);
    assert!(matches!(
        h.app.dispatcher.cancel(id, "again").await,
        Err(CourierError::AlreadyTerminal(_))
    ));
}

#[tokio::test]
async fn crashed_worker_delivery_is_redelivered_after_visibility_timeout() {
    let h = harness().await;
    let id = h
        .app
        .dispatcher
        .submit(SubmitRequest::new("echo", vec![json!("again")]))
        .await
        .unwrap();

    // worker leases the message and dies without acking
    let lost = h
        .broker
        .receive(&QueueName::default(), Duration::from_millis(10))
        .await
        .unwrap()
        .unwrap();
    assert!(h.step().await.is_none());

    h.clock.advance(chrono::Duration::from_std(BrokerConfig::default().visibility_timeout()).unwrap());
    assert_eq!(h.broker.reclaim_expired().await.unwrap(), 1);

    assert_eq!(h.drain().await, vec![Processed::Succeeded]);
    assert_eq!(h.state(id).await.state, TaskState::Success);
    assert!(matches!(
        h.broker.ack(&lost.handle).await,
        Err(CourierError::LeaseExpired(_))
    ));
}

#[tokio::test]
async fn publish_failure_is_reported_and_recorded() {
    let h = harness().await;
    h.broker.set_available(false);

    let err = h
        .app
        .dispatcher
        .submit(SubmitRequest::new("echo", vec![]))
        .await
        .unwrap_err();
    assert!(err.is_transient());

    let counts = h.app.monitor.counts_by_state().await.unwrap();
    assert_eq!(counts.failure, 1);
    assert_eq!(counts.pending, 0);
}

#[tokio::test]
async fn poison_message_is_dead_lettered_and_the_queue_keeps_flowing() {
    let h = harness().await;
    h.broker
        .publish_raw(&QueueName::default(), b"{not json".to_vec())
        .await
        .unwrap();
    let id = h
        .app
        .dispatcher
        .submit(SubmitRequest::new("echo", vec![json!(7)]))
        .await
        .unwrap();

    assert_eq!(h.drain().await, vec![Processed::Succeeded]);
    assert_eq!(h.state(id).await.state, TaskState::Success);
    assert_eq!(h.broker.dead_letters(&QueueName::default()).await.len(), 1);
}

#[tokio::test]
async fn scheduler_fires_once_after_downtime_and_task_runs() {
    let h = harness().await;
    let entry = ScheduleEntry::new("heartbeat", TaskName::new("echo"), Interval::every(Duration::from_secs(60)), t0())
        .unwrap()
        .with_args(vec![json!("tick")]);
    h.app.scheduler.add(entry).await.unwrap();

    h.clock.advance(chrono::Duration::seconds(60 + 185));
    let report = h.app.scheduler.tick().await.unwrap();
    assert_eq!(report.fired.len(), 1);
    assert!(h.app.scheduler.tick().await.unwrap().fired.is_empty());

    assert_eq!(h.drain().await, vec![Processed::Succeeded]);
    let record = h.state(report.fired[0].task_id).await;
    assert_eq!(record.result, Some(json!("tick")));
    assert!(report.fired[0].next_fire_at > h.clock.now());
}

#[tokio::test]
async fn body_outliving_visibility_timeout_runs_exactly_once() {
    use std::sync::atomic::{AtomicUsize, Ordering};

    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let runs = Arc::new(AtomicUsize::new(0));

    let mut config = CourierConfig {
        transport_retry: TransportRetry::none(),
        ..CourierConfig::default()
    };
    config.worker.concurrency = 2;
    config.worker.receive_wait_ms = 10;
    config.broker.visibility_timeout_ms = 100;
    config.broker.reclaim_interval_ms = 10;
    config.broker.poll_interval_ms = 5;

    let app = AppBuilder::new()
        .with_config(config)
        .register_fn("slow", {
            let (running, peak, runs) = (running.clone(), peak.clone(), runs.clone());
            move |_args| {
                let (running, peak, runs) = (running.clone(), peak.clone(), runs.clone());
                async move {
                    runs.fetch_add(1, Ordering::SeqCst);
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(300)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    Ok(Value::Null)
                }
            }
        })
        .unwrap()
        .build()
        .await
        .unwrap();
    let started = app.start();

    let id = app
        .dispatcher
        .submit(SubmitRequest::new("slow", vec![]))
        .await
        .unwrap();

    let mut record = None;
    for _ in 0..100 {
        record = app.monitor.task_status(id).await.unwrap();
        if record.as_ref().is_some_and(|r| r.is_terminal()) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    // leave time for a stray redelivery to show up
    tokio::time::sleep(Duration::from_millis(200)).await;
    started.shutdown().await;

    assert_eq!(record.map(|r| r.state), Some(TaskState::Success));
    assert_eq!(peak.load(Ordering::SeqCst), 1);
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}
