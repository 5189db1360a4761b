//! Command-line definitions for the courier binary.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// courier - distributed task queue runner
#[derive(Parser, Debug)]
#[command(name = "courier", version, about = "Distributed task queue runner")]
pub struct Cli {
    /// Path to a JSON config file
    #[arg(long, global = true, env = "COURIER_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run workers, scheduler and maintenance loops until Ctrl-C
    Run {
        /// Override worker.concurrency
        #[arg(long, short = 'c')]
        concurrency: Option<usize>,
    },

    /// Submit sample tasks in-process and print their final status
    Demo {
        /// Retry budget for the always-failing sample
        #[arg(long, default_value = "2")]
        max_attempts: u32,

        /// Give up waiting after this many seconds
        #[arg(long, default_value = "30")]
        wait_secs: u64,
    },

    /// Manage the schedule table (requires scheduler.schedule_file)
    Schedule {
        #[command(subcommand)]
        command: ScheduleCommand,
    },

    /// Print the effective configuration as JSON
    Config,
}

#[derive(Subcommand, Debug)]
pub enum ScheduleCommand {
    /// Add or replace an entry
    Add(ScheduleAdd),

    /// Remove an entry
    Remove { name: String },

    /// Resume firing an entry
    Enable { name: String },

    /// Suspend an entry without deleting it
    Disable { name: String },

    /// List entries
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args, Debug)]
pub struct ScheduleAdd {
    /// Entry name (unique key)
    #[arg(long)]
    pub name: String,

    /// Task name to submit
    #[arg(long, short = 't')]
    pub task: String,

    /// Fire every N seconds
    #[arg(long, conflicts_with = "cron", required_unless_present = "cron")]
    pub every: Option<u64>,

    /// Cron expression (5 or 6 fields)
    #[arg(long)]
    pub cron: Option<String>,

    /// Task args as a JSON array
    #[arg(long, default_value = "[]")]
    pub args: String,

    /// Target queue
    #[arg(long, default_value = "default")]
    pub queue: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_schedule_add() {
        let cli = Cli::try_parse_from([
            "courier", "schedule", "add", "--name", "beat", "-t", "echo", "--every", "60",
        ])
        .unwrap();
        match cli.command {
            Commands::Schedule {
                command: ScheduleCommand::Add(add),
            } => {
                assert_eq!(add.every, Some(60));
                assert_eq!(add.args, "[]");
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn every_and_cron_conflict() {
        let parsed = Cli::try_parse_from([
            "courier", "schedule", "add", "--name", "x", "-t", "echo", "--every", "5", "--cron",
            "* * * * *",
        ]);
        assert!(parsed.is_err());
    }
}
