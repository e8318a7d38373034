// src/cli.rs

//! CLI argument parsing using `clap`.
//!
//! The CLI is the headless front end of the engine: `serve` runs the
//! scheduler until Ctrl-C, the other commands edit the task store or run a
//! single executable in the foreground.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use crate::config::{default_config_path, default_store_path};

/// Command-line arguments for `runwarden`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "runwarden",
    version,
    about = "Run executables on fixed intervals, one instance at a time.",
    long_about = None
)]
pub struct CliArgs {
    /// Task store file (TOML).
    #[arg(long, value_name = "PATH", default_value_os_t = default_store_path(), global = true)]
    pub store: PathBuf,

    /// Config file (TOML).
    #[arg(long, value_name = "PATH", default_value_os_t = default_config_path(), global = true)]
    pub config: PathBuf,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `RUNWARDEN_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL", global = true)]
    pub log_level: Option<LogLevel>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Run the scheduler until Ctrl-C (the default).
    Serve {
        /// Start with the scheduler paused.
        #[arg(long)]
        paused: bool,
    },
    /// Add a task.
    Add {
        #[arg(long)]
        name: String,
        #[arg(long, value_name = "PATH")]
        path: PathBuf,
        /// Interval in minutes.
        #[arg(long, value_name = "MINUTES", allow_negative_numbers = true)]
        interval: i64,
    },
    /// Change an existing task; omitted fields keep their value.
    Edit {
        id: u64,
        #[arg(long)]
        name: Option<String>,
        #[arg(long, value_name = "PATH")]
        path: Option<PathBuf>,
        #[arg(long, value_name = "MINUTES", allow_negative_numbers = true)]
        interval: Option<i64>,
    },
    /// Remove a task.
    Delete { id: u64 },
    /// Print every task.
    List,
    /// Run one task now in the foreground and exit with its exit code.
    Run { id: u64 },
    /// Report whether an executable would be captured (console) or not.
    Classify { path: PathBuf },
}

impl CliArgs {
    pub fn command(&self) -> Command {
        self.command
            .clone()
            .unwrap_or(Command::Serve { paused: false })
    }
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serve_is_the_default_command() {
        let args = CliArgs::try_parse_from(["runwarden"]).unwrap();
        assert!(matches!(args.command(), Command::Serve { paused: false }));
        assert_eq!(args.store, PathBuf::from("tasks.toml"));
        assert_eq!(args.config, PathBuf::from("runwarden.toml"));
    }

    #[test]
    fn add_accepts_negative_interval_for_validation() {
        let args = CliArgs::try_parse_from([
            "runwarden", "add", "--name", "Build", "--path", "build.sh", "--interval", "-5",
        ])
        .unwrap();
        match args.command() {
            Command::Add { interval, .. } => assert_eq!(interval, -5),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn global_flags_after_subcommand() {
        let args =
            CliArgs::try_parse_from(["runwarden", "list", "--store", "/tmp/t.toml", "--log-level", "debug"])
                .unwrap();
        assert_eq!(args.store, PathBuf::from("/tmp/t.toml"));
        assert!(matches!(args.log_level, Some(LogLevel::Debug)));
    }
}
