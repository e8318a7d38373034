// src/console.rs

//! Line-oriented command console for `serve`.
//!
//! Each input line is one command, parsed with the same `clap` machinery as
//! the CLI (`add --name Build --path ./build.sh --interval 5`, `run 1`,
//! `stop 1`, `pause`, `quit`). Double quotes group words, so names with
//! spaces work. Commands go straight to the running [`Orchestrator`], which
//! is the only writer of the task store while the engine is up.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::engine::{EngineEvent, Orchestrator};
use crate::errors::{Result, RunwardenError};
use crate::exec::{ExecutorBackend, LaunchOutcome, TerminateOutcome};
use crate::types::{Task, TaskDraft, TaskId};

#[derive(Debug, Parser)]
#[command(no_binary_name = true, name = "runwarden>", disable_version_flag = true)]
struct ConsoleLine {
    #[command(subcommand)]
    command: ConsoleCommand,
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum ConsoleCommand {
    /// Print every task with its status.
    List,
    /// Add and schedule a task.
    Add {
        #[arg(long)]
        name: String,
        #[arg(long, value_name = "PATH")]
        path: PathBuf,
        #[arg(long, value_name = "MINUTES", allow_negative_numbers = true)]
        interval: i64,
    },
    /// Change a task; omitted fields keep their value.
    Edit {
        id: TaskId,
        #[arg(long)]
        name: Option<String>,
        #[arg(long, value_name = "PATH")]
        path: Option<PathBuf>,
        #[arg(long, value_name = "MINUTES", allow_negative_numbers = true)]
        interval: Option<i64>,
    },
    /// Remove a task.
    Delete { id: TaskId },
    /// Run a task now.
    Run { id: TaskId },
    /// Terminate a task's running process tree.
    Stop { id: TaskId },
    /// Pause scheduled runs.
    Pause,
    /// Resume scheduled runs.
    Resume,
    /// Flip between paused and running.
    Toggle,
    /// Show the captured output kept for a task.
    Output { id: TaskId },
    /// Shut down. Refused while tasks run unless `--force` is given.
    Quit {
        #[arg(long)]
        force: bool,
    },
}

/// What the console loop should do after a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Lines(Vec<String>),
    Quit(Vec<String>),
}

/// Parse one input line. Blank lines yield `Ok(None)`.
pub fn parse_line(line: &str) -> Result<Option<ConsoleCommand>> {
    let words = split_words(line)?;
    if words.is_empty() {
        return Ok(None);
    }
    ConsoleLine::try_parse_from(words)
        .map(|parsed| Some(parsed.command))
        .map_err(|e| RunwardenError::InvalidArgument(e.to_string()))
}

fn split_words(line: &str) -> Result<Vec<String>> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut quoted = false;

    for c in line.chars() {
        match c {
            '"' => {
                quoted = !quoted;
                in_word = true;
            }
            c if c.is_whitespace() && !quoted => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            c => {
                current.push(c);
                in_word = true;
            }
        }
    }
    if quoted {
        return Err(RunwardenError::InvalidArgument(
            "unterminated quote".to_string(),
        ));
    }
    if in_word {
        words.push(current);
    }
    Ok(words)
}

/// Carry out one command against the engine.
pub async fn execute<E: ExecutorBackend>(
    orchestrator: &Orchestrator<E>,
    command: ConsoleCommand,
    events: &mpsc::Sender<EngineEvent>,
) -> Result<Reply> {
    let lines = match command {
        ConsoleCommand::List => {
            let tasks = orchestrator.store().list();
            if tasks.is_empty() {
                vec!["no tasks".to_string()]
            } else {
                tasks.iter().map(format_task).collect()
            }
        }
        ConsoleCommand::Add {
            name,
            path,
            interval,
        } => {
            let task = orchestrator.add_task(TaskDraft::new(name, path, interval))?;
            vec![format!("added task {}", task.id), format_task(&task)]
        }
        ConsoleCommand::Edit {
            id,
            name,
            path,
            interval,
        } => {
            let current = orchestrator
                .store()
                .get(id)
                .ok_or(RunwardenError::TaskNotFound(id))?;
            let draft = TaskDraft::new(
                name.unwrap_or(current.name),
                path.unwrap_or(current.path),
                interval.unwrap_or(i64::from(current.interval)),
            );
            let task = orchestrator.update_task(id, draft)?;
            vec![format_task(&task)]
        }
        ConsoleCommand::Delete { id } => {
            let task = orchestrator.delete_task(id)?;
            vec![format!("deleted task {} ({})", task.id, task.name)]
        }
        ConsoleCommand::Run { id } => {
            let line = match orchestrator.execute_now(id).await? {
                Some(LaunchOutcome::Started(run)) => {
                    format!("task {id} started (run {})", run.run_id)
                }
                Some(LaunchOutcome::AlreadySkipped) => {
                    format!("task {id} skipped: executable already running")
                }
                Some(LaunchOutcome::Failed(err)) => format!("task {id} failed to start: {err}"),
                None => format!("task {id} not started: shutting down"),
            };
            vec![line]
        }
        ConsoleCommand::Stop { id } => {
            let line = match orchestrator.stop_task(id).await? {
                TerminateOutcome::Terminated => format!("task {id} terminated"),
                TerminateOutcome::Killed => format!("task {id} killed"),
                TerminateOutcome::AlreadyExited | TerminateOutcome::NotTracked => {
                    format!("task {id} was not running")
                }
            };
            vec![line]
        }
        ConsoleCommand::Pause => {
            orchestrator.pause_all();
            vec!["scheduler paused".to_string()]
        }
        ConsoleCommand::Resume => {
            orchestrator.resume_all();
            vec!["scheduler running".to_string()]
        }
        ConsoleCommand::Toggle => {
            let paused = orchestrator.toggle_scheduler();
            vec![format!("scheduler {}", if paused { "paused" } else { "running" })]
        }
        ConsoleCommand::Output { id } => {
            orchestrator
                .store()
                .get(id)
                .ok_or(RunwardenError::TaskNotFound(id))?;
            let output = orchestrator.recent_output(id);
            if output.is_empty() {
                vec![format!("no output kept for task {id}")]
            } else {
                output
            }
        }
        ConsoleCommand::Quit { force } => {
            let running = orchestrator.running_tasks();
            if !running.is_empty() && !force {
                let mut lines = vec![format!("{} task(s) still running:", running.len())];
                lines.extend(running.iter().map(|t| format!("  - {} ({})", t.name, t.id)));
                lines.push("use `quit --force` to terminate them and exit".to_string());
                return Ok(Reply::Lines(lines));
            }
            if events.send(EngineEvent::ShutdownRequested).await.is_err() {
                debug!("engine loop already gone");
            }
            return Ok(Reply::Quit(vec!["shutting down".to_string()]));
        }
    };
    Ok(Reply::Lines(lines))
}

/// Read commands from `input` until end-of-input or `quit`.
pub async fn run_console<E, R>(
    orchestrator: Arc<Orchestrator<E>>,
    input: R,
    events: mpsc::Sender<EngineEvent>,
) where
    E: ExecutorBackend,
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                debug!("console input closed");
                return;
            }
            Err(e) => {
                info!(error = %e, "console input failed; console disabled");
                return;
            }
        };

        let command = match parse_line(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(e) => {
                eprintln!("{e}");
                continue;
            }
        };

        match execute(&orchestrator, command, &events).await {
            Ok(Reply::Lines(out)) => out.iter().for_each(|l| println!("{l}")),
            Ok(Reply::Quit(out)) => {
                out.iter().for_each(|l| println!("{l}"));
                return;
            }
            Err(e) => eprintln!("error: {e}"),
        }
    }
}

/// One-line summary of a task, shared with the CLI `list` command.
pub fn format_task(task: &Task) -> String {
    let last_run = task
        .last_run
        .map(|at| at.to_string())
        .unwrap_or_else(|| "never".to_string());
    format!(
        "{:>4}  {:<24} every {:>5} min  {:<7}  last run: {:<19}  {}",
        task.id,
        task.name,
        task.interval,
        task.status.to_string(),
        last_run,
        task.path.display(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quoted_words_keep_their_spaces() {
        assert_eq!(
            split_words(r#"add --name "Nightly backup" --path /x/b.sh"#).unwrap(),
            vec!["add", "--name", "Nightly backup", "--path", "/x/b.sh"]
        );
        assert!(split_words(r#"add --name "open"#).is_err());
    }

    #[test]
    fn lines_parse_into_commands() {
        assert_eq!(parse_line("   ").unwrap(), None);
        assert_eq!(
            parse_line("run 3").unwrap(),
            Some(ConsoleCommand::Run { id: 3 })
        );
        assert_eq!(
            parse_line("quit --force").unwrap(),
            Some(ConsoleCommand::Quit { force: true })
        );
        assert_eq!(
            parse_line("edit 2 --interval -1").unwrap(),
            Some(ConsoleCommand::Edit {
                id: 2,
                name: None,
                path: None,
                interval: Some(-1),
            })
        );
    }

    #[test]
    fn unknown_commands_are_invalid_arguments() {
        assert!(matches!(
            parse_line("explode 1"),
            Err(RunwardenError::InvalidArgument(_))
        ));
        assert!(matches!(
            parse_line("run not-a-number"),
            Err(RunwardenError::InvalidArgument(_))
        ));
    }
}
