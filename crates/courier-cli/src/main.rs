mod cli;
mod tasks;

use std::error::Error;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use courier_core::app::{App, AppBuilder, SubmitRequest};
use courier_core::config::CourierConfig;
use courier_core::domain::{Backoff, Interval, QueueName, RetryPolicy, ScheduleEntry, TaskId, TaskName};
use courier_core::observability::init_tracing;
use courier_core::ports::{Clock, SystemClock};
use serde_json::{Value, json};

use crate::cli::{Cli, Commands, ScheduleAdd, ScheduleCommand};
use crate::tasks::Add;

type CliResult = Result<(), Box<dyn Error>>;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match CourierConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("error: {err}");
            return ExitCode::FAILURE;
        }
    };
    init_tracing(config.log_format);

    let result = match cli.command {
        Commands::Run { concurrency } => run(config, concurrency).await,
        Commands::Demo {
            max_attempts,
            wait_secs,
        } => demo(config, max_attempts, Duration::from_secs(wait_secs)).await,
        Commands::Schedule { command } => schedule(config, command).await,
        Commands::Config => print_config(&config),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, "command failed");
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

async fn build_app(config: CourierConfig) -> Result<App, Box<dyn Error>> {
    let builder = tasks::register_all(AppBuilder::new().with_config(config))?;
    Ok(builder.expect_tasks(&tasks::expected()).build().await?)
}

async fn run(mut config: CourierConfig, concurrency: Option<usize>) -> CliResult {
    if let Some(concurrency) = concurrency {
        config.worker.concurrency = concurrency;
    }
    let app = build_app(config).await?;
    let running = app.start();

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown requested, waiting for running tasks");
    running.shutdown().await;
    Ok(())
}

/// Submit one of each sample, wait for all of them to settle, print results.
async fn demo(mut config: CourierConfig, max_attempts: u32, wait: Duration) -> CliResult {
    config.worker.receive_wait_ms = config.worker.receive_wait_ms.min(100);
    let app = build_app(config).await?;
    let running = app.start();

    let quick_retries = RetryPolicy::new(max_attempts, Backoff::fixed(Duration::from_millis(200)));
    let requests = vec![
        SubmitRequest::new(tasks::ECHO, vec![json!("hello")]),
        SubmitRequest::for_task(&Add(2, 3))?,
        SubmitRequest::new(tasks::SLEEP, vec![json!(0.2)]),
        SubmitRequest::new(tasks::ALWAYS_FAILS, vec![]).retry_policy(quick_retries),
        SubmitRequest::new("no_such_task", vec![]),
    ];

    let mut ids = Vec::with_capacity(requests.len());
    for request in requests {
        ids.push(app.dispatcher.submit(request).await?);
    }

    let settled = wait_for_terminal(&app, &ids, wait).await;
    running.shutdown().await;
    let records = settled?;

    for record in &records {
        println!("{}", serde_json::to_string(record)?);
    }
    let counts = app.monitor.counts_by_state().await?;
    println!("{}", serde_json::to_string(&json!({ "counts": counts }))?);
    Ok(())
}

async fn wait_for_terminal(
    app: &App,
    ids: &[TaskId],
    wait: Duration,
) -> Result<Vec<courier_core::domain::StatusRecord>, Box<dyn Error>> {
    let deadline = tokio::time::Instant::now() + wait;
    loop {
        let mut records = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(record) = app.monitor.task_status(*id).await? {
                records.push(record);
            }
        }
        if records.len() == ids.len() && records.iter().all(|r| r.is_terminal()) {
            return Ok(records);
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(format!("tasks did not settle within {wait:?}").into());
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

async fn schedule(config: CourierConfig, command: ScheduleCommand) -> CliResult {
    if config.scheduler.schedule_file.is_none() {
        return Err("scheduler.schedule_file is not configured (COURIER_SCHEDULE_FILE)".into());
    }
    let app = build_app(config).await?;
    let scheduler = &app.scheduler;

    match command {
        ScheduleCommand::Add(add) => {
            let entry = schedule_entry(add)?;
            let name = entry.name.clone();
            let next = entry.next_fire_at;
            scheduler.add(entry).await?;
            println!("saved {name}, next fire at {next}");
        }
        ScheduleCommand::Remove { name } => {
            scheduler.remove(&name).await?;
            println!("removed {name}");
        }
        ScheduleCommand::Enable { name } => {
            let entry = scheduler.enable(&name).await?;
            println!("enabled {name}, next fire at {}", entry.next_fire_at);
        }
        ScheduleCommand::Disable { name } => {
            scheduler.disable(&name).await?;
            println!("disabled {name}");
        }
        ScheduleCommand::List { json } => {
            let entries = scheduler.list().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else {
                for e in entries {
                    let state = if e.enabled { "enabled" } else { "disabled" };
                    println!("{}\t{}\t{}\t{}", e.name, e.task_name, e.next_fire_at, state);
                }
            }
        }
    }
    Ok(())
}

fn schedule_entry(add: ScheduleAdd) -> Result<ScheduleEntry, Box<dyn Error>> {
    let interval = match (add.every, add.cron) {
        (Some(secs), None) => Interval::every(Duration::from_secs(secs)),
        (None, Some(expr)) => Interval::cron(expr),
        _ => return Err("exactly one of --every or --cron is required".into()),
    };
    let args: Vec<Value> = serde_json::from_str(&add.args)?;
    let entry = ScheduleEntry::new(add.name, TaskName::new(add.task), interval, SystemClock.now())?
        .with_args(args)
        .with_queue(QueueName::new(add.queue));
    Ok(entry)
}

fn print_config(config: &CourierConfig) -> CliResult {
    println!("{}", serde_json::to_string_pretty(config)?);
    Ok(())
}
