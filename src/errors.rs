// src/errors.rs

//! Crate-wide error type and result alias.
//!
//! An executable that is already running is deliberately *not* an error:
//! it surfaces as [`crate::exec::LaunchOutcome::AlreadySkipped`].

use std::path::PathBuf;

use thiserror::Error;

use crate::types::TaskId;

#[derive(Error, Debug)]
pub enum RunwardenError {
    #[error("Executable not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Failed to launch {}: {reason}", path.display())]
    LaunchFailure { path: PathBuf, reason: String },

    #[error("Output stream failed: {0}")]
    StreamFailure(String),

    #[error("Process tree of {} (pid {pid}) survived a forced kill", path.display())]
    TerminationFailure { path: PathBuf, pid: u32 },

    #[error("Task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("Scheduler unavailable: {0}")]
    SchedulerUnavailable(String),

    #[error(
        "Task store is in use by a running `runwarden serve` (marker {}); use its console, \
         or delete the marker if no server is running",
        marker.display()
    )]
    StoreInUse { marker: PathBuf },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, RunwardenError>;
