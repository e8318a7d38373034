// src/engine/mod.rs

//! Orchestration engine for runwarden.
//!
//! This module ties together:
//! - the task store (owner of task status)
//! - the interval scheduler (`Tick` events)
//! - the process supervisor (`Run` events)
//! - the status watchdog (`WatchdogFired` events)
//! - crash recovery and shutdown sequencing
//!
//! Everything that happens in the background arrives as an [`EngineEvent`]
//! on one channel; everything the presentation layer needs to know leaves as
//! a [`UiEvent`] on another. The engine never touches UI state directly.

use std::path::PathBuf;
use std::time::Duration;

use chrono::NaiveDateTime;

use crate::types::{Task, TaskId, TaskStatus};

/// Why a task run was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunTrigger {
    /// The task's interval elapsed.
    Scheduled,
    /// "Run now" from the user.
    Manual,
}

/// How a supervised process ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The process exited on its own. `None` when it was ended by a signal.
    Exited(Option<i32>),
    /// The process tree was torn down by `force_terminate`.
    Terminated,
    /// Waiting on the process failed; it is no longer tracked.
    WaitFailed(String),
}

impl RunOutcome {
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            RunOutcome::Exited(code) => *code,
            _ => None,
        }
    }
}

/// Events emitted by the supervisor for one run.
#[derive(Debug, Clone, PartialEq)]
pub enum RunEvent {
    /// One line of merged stdout/stderr, without the line terminator.
    LineCaptured {
        task_id: TaskId,
        run_id: u64,
        line: String,
    },
    /// Periodic "still running" notice for heavy-buffering programs.
    Heartbeat {
        task_id: TaskId,
        run_id: u64,
        elapsed: Duration,
    },
    /// The output pipe broke; the run is still monitored for exit.
    StreamFailed {
        task_id: TaskId,
        run_id: u64,
        error: String,
    },
    /// The run is over and no longer tracked.
    Completed {
        task_id: TaskId,
        run_id: u64,
        path: PathBuf,
        outcome: RunOutcome,
    },
}

/// Everything the orchestrator loop reacts to.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// The scheduler's interval for a task elapsed.
    Tick { task_id: TaskId },
    /// Something happened to a supervised process.
    Run(RunEvent),
    /// The status watchdog armed for run `run_id` of a task expired.
    WatchdogFired { task_id: TaskId, run_id: u64 },
    /// Shut down (confirmed: running processes are terminated).
    ShutdownRequested,
}

/// Notifications for the presentation layer.
#[derive(Debug, Clone, PartialEq)]
pub enum UiEvent {
    StatusChanged {
        task_id: TaskId,
        status: TaskStatus,
        last_run: Option<NaiveDateTime>,
    },
    LogLine {
        task_id: TaskId,
        line: String,
    },
    /// A launch was skipped because the executable is already running.
    RunSkipped { task_id: TaskId },
    RunFinished {
        task_id: TaskId,
        outcome: RunOutcome,
    },
    /// The previous session did not shut down cleanly; these tasks may
    /// still have processes running. Advisory only.
    OrphansDetected { tasks: Vec<Task> },
    SchedulerStateChanged { paused: bool },
    Error {
        task_id: Option<TaskId>,
        message: String,
    },
}

/// Result of a shutdown request.
#[derive(Debug, Clone, PartialEq)]
pub enum ShutdownOutcome {
    /// Tasks are still running and the caller did not confirm; nothing was
    /// changed.
    NeedsConfirmation(Vec<Task>),
    /// Shutdown sequence finished.
    Completed { terminated: usize },
}

pub mod handlers;
pub mod log_buffer;
pub mod orchestrator;
pub mod shutdown;

pub use log_buffer::LogBuffer;
pub use orchestrator::Orchestrator;
