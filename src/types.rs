// src/types.rs

//! Core data model shared by the store, the supervisor and the engine.

use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use chrono::{Local, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};

/// Stable task identifier, assigned by the task store as `max + 1`.
pub type TaskId = u64;

/// Maximum task name length accepted by validation.
pub const MAX_TASK_NAME_LEN: usize = 100;

/// Intervals longer than this (one week, in minutes) are accepted but logged.
pub const LONG_INTERVAL_MINUTES: u32 = 10_080;

/// Persisted run status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TaskStatus {
    #[default]
    Idle,
    Running,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskStatus::Idle => f.write_str("Idle"),
            TaskStatus::Running => f.write_str("Running"),
        }
    }
}

/// A scheduled executable as stored on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub name: String,
    pub path: PathBuf,
    /// Firing interval in minutes.
    pub interval: u32,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run: Option<NaiveDateTime>,
}

impl Task {
    pub fn is_running(&self) -> bool {
        self.status == TaskStatus::Running
    }
}

/// User input for creating or editing a task, before validation.
///
/// `interval` is signed so that non-positive input can be rejected with a
/// proper `InvalidArgument` instead of a parse failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskDraft {
    pub name: String,
    pub path: PathBuf,
    pub interval: i64,
}

impl TaskDraft {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>, interval: i64) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            interval,
        }
    }
}

/// How an executable should be launched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutableKind {
    /// Writes to standard streams; output is captured.
    Console,
    /// Presents its own window; output is not captured.
    Interactive,
}

impl ExecutableKind {
    pub fn needs_capture(self) -> bool {
        matches!(self, ExecutableKind::Console)
    }
}

impl fmt::Display for ExecutableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutableKind::Console => f.write_str("console"),
            ExecutableKind::Interactive => f.write_str("interactive"),
        }
    }
}

/// Lexically normalize a path: drop `.` segments, fold `..` into its parent
/// where possible, collapse repeated separators.
///
/// The filesystem is never consulted, so symlinks are not resolved. The
/// result is the tracking key for in-flight runs.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();

    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.components().next_back() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => out.push(".."),
            },
            other => out.push(other.as_os_str()),
        }
    }

    if out.as_os_str().is_empty() {
        out.push(".");
    }
    out
}

/// Current local time truncated to whole seconds.
pub fn now_local() -> NaiveDateTime {
    let now = Local::now().naive_local();
    now.with_nanosecond(0).unwrap_or(now)
}

pub fn minutes(n: u32) -> Duration {
    Duration::from_secs(u64::from(n) * 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_collapses_dots_and_separators() {
        assert_eq!(
            normalize_path(Path::new("./tools//build/../build.sh")),
            PathBuf::from("tools/build.sh")
        );
        assert_eq!(
            normalize_path(Path::new("/opt/./jobs/../bin/run")),
            PathBuf::from("/opt/bin/run")
        );
    }

    #[test]
    fn normalize_keeps_leading_parent_segments() {
        assert_eq!(
            normalize_path(Path::new("../shared/./job.sh")),
            PathBuf::from("../shared/job.sh")
        );
        assert_eq!(normalize_path(Path::new("/..")), PathBuf::from("/"));
        assert_eq!(normalize_path(Path::new("./")), PathBuf::from("."));
    }

    #[test]
    fn executable_kind_capture() {
        assert!(ExecutableKind::Console.needs_capture());
        assert!(!ExecutableKind::Interactive.needs_capture());
    }
}
