// src/exec/mod.rs

//! Process supervision layer.
//!
//! This module launches executables with `tokio::process::Command`, keeps at
//! most one in-flight run per normalized executable path, relays captured
//! output and completion to the engine as [`crate::engine::RunEvent`]s, and
//! tears down whole process trees on request.
//!
//! - [`supervisor`] owns launch / force-terminate / shutdown.
//! - [`registry`] is the path-keyed table of in-flight runs.
//! - [`command`] builds the OS command for capture and non-capture launches.
//! - [`task_runner`] is the per-run completion watcher.
//! - [`output`] merges stdout and stderr into line events.
//! - [`heartbeat`] emits "still running" notices.
//! - [`tree`] enumerates and terminates descendant processes.
//! - [`backend`] is the `ExecutorBackend` seam the orchestrator talks to, so
//!   tests can swap in a fake executor.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use chrono::NaiveDateTime;
use regex::Regex;
use tracing::warn;

use crate::config::EngineSettings;
use crate::types::TaskId;

pub mod backend;
pub mod command;
pub mod heartbeat;
pub mod output;
pub mod registry;
pub mod supervisor;
pub mod task_runner;
pub mod tree;

pub use backend::ExecutorBackend;
pub use registry::RunRegistry;
pub use supervisor::ProcessSupervisor;

/// A request to launch one executable on behalf of a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRequest {
    pub task_id: TaskId,
    pub path: PathBuf,
    /// Pipe stdout+stderr and relay lines; otherwise let the program show
    /// its own window.
    pub capture_output: bool,
}

/// Snapshot of one in-flight run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunInfo {
    /// Monotonic per-supervisor generation; distinguishes successive runs of
    /// the same path.
    pub run_id: u64,
    pub task_id: TaskId,
    /// Normalized path: the tracking key.
    pub path: PathBuf,
    pub pid: Option<u32>,
    pub capture_output: bool,
    /// Heartbeat notices are emitted for this run.
    pub heartbeat: bool,
    pub started_at: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchError {
    /// The path was empty.
    InvalidPath,
    /// The path does not name an existing file.
    NotFound(PathBuf),
    /// The OS refused to start the process.
    Spawn { path: PathBuf, reason: String },
}

impl fmt::Display for LaunchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LaunchError::InvalidPath => f.write_str("invalid executable path"),
            LaunchError::NotFound(path) => write!(f, "executable not found: {}", path.display()),
            LaunchError::Spawn { path, reason } => {
                write!(f, "error executing {}: {reason}", path.display())
            }
        }
    }
}

impl From<LaunchError> for crate::errors::RunwardenError {
    fn from(err: LaunchError) -> Self {
        use crate::errors::RunwardenError;
        match err {
            LaunchError::InvalidPath => {
                RunwardenError::InvalidArgument("executable path must not be empty".to_string())
            }
            LaunchError::NotFound(path) => RunwardenError::NotFound(path),
            LaunchError::Spawn { path, reason } => RunwardenError::LaunchFailure { path, reason },
        }
    }
}

/// Result of [`ProcessSupervisor::launch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchOutcome {
    Started(RunInfo),
    /// A run for the same path is in flight; nothing was started and the
    /// existing run was not touched.
    AlreadySkipped,
    Failed(LaunchError),
}

/// Result of a successful `force_terminate`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminateOutcome {
    /// No run was tracked for the path.
    NotTracked,
    /// The process had already exited.
    AlreadyExited,
    /// The whole tree exited within the grace period.
    Terminated,
    /// At least one process had to be force-killed.
    Killed,
}

/// Tunables of the supervisor, derived from [`EngineSettings`].
#[derive(Debug, Clone)]
pub struct SupervisorOptions {
    pub grace_period: Duration,
    pub heartbeat_every: Duration,
    pub heartbeat_patterns: Vec<Regex>,
}

impl SupervisorOptions {
    /// Invalid heartbeat patterns are logged and ignored.
    pub fn from_settings(settings: &EngineSettings) -> Self {
        let heartbeat_patterns = settings
            .heartbeat_patterns
            .iter()
            .filter_map(|pattern| match Regex::new(pattern) {
                Ok(re) => Some(re),
                Err(e) => {
                    warn!(pattern = %pattern, error = %e, "invalid heartbeat pattern; ignoring");
                    None
                }
            })
            .collect();

        Self {
            grace_period: Duration::from_millis(settings.grace_period_ms),
            heartbeat_every: Duration::from_secs(settings.heartbeat_secs.max(1)),
            heartbeat_patterns,
        }
    }

    /// Whether a captured run of `path` gets heartbeat notices.
    pub fn wants_heartbeat(&self, path: &std::path::Path) -> bool {
        let text = path.to_string_lossy();
        self.heartbeat_patterns.iter().any(|re| re.is_match(&text))
    }
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self::from_settings(&EngineSettings::default())
    }
}
