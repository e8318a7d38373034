// src/recovery.rs

//! Crash marker protocol.
//!
//! While the application runs, a marker file sits next to the task store
//! (`<store>.running`). A clean shutdown deletes it as its last persistence
//! step. Finding it at startup means the previous session died without
//! cleaning up, so every task may have an orphaned process. The report is
//! advisory: nothing is killed automatically.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, warn};

use crate::errors::{Result, RunwardenError};
use crate::fs::FileSystem;
use crate::store::sibling_with_suffix;
use crate::types::{Task, now_local};

pub const MARKER_SUFFIX: &str = "running";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryState {
    Clean,
    Recovering,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecoveryReport {
    pub state: RecoveryState,
    /// Tasks that may still have a process running from the last session.
    pub orphaned: Vec<Task>,
}

impl RecoveryReport {
    pub fn clean() -> Self {
        Self {
            state: RecoveryState::Clean,
            orphaned: Vec::new(),
        }
    }
}

#[derive(Debug)]
pub struct CrashRecovery {
    fs: Arc<dyn FileSystem>,
    marker: PathBuf,
}

impl CrashRecovery {
    pub fn new(fs: Arc<dyn FileSystem>, marker: impl Into<PathBuf>) -> Self {
        Self {
            fs,
            marker: marker.into(),
        }
    }

    /// Marker placed next to the task store file.
    pub fn for_store(fs: Arc<dyn FileSystem>, store_path: &Path) -> Self {
        Self::new(fs, sibling_with_suffix(store_path, MARKER_SUFFIX))
    }

    pub fn marker_path(&self) -> &Path {
        &self.marker
    }

    pub fn is_armed(&self) -> bool {
        self.fs.exists(&self.marker)
    }

    /// Fail while a marker is present. Offline edits of the task store use
    /// this; a serving process would overwrite them on its next save.
    pub fn ensure_released(&self) -> Result<()> {
        if self.is_armed() {
            return Err(RunwardenError::StoreInUse {
                marker: self.marker.clone(),
            });
        }
        Ok(())
    }

    /// Inspect (and consume) a marker left by the previous session.
    pub fn check_at_startup(&self, tasks: &[Task]) -> RecoveryReport {
        if !self.fs.exists(&self.marker) {
            return RecoveryReport::clean();
        }

        let left_at = self
            .fs
            .read_to_string(&self.marker)
            .map(|s| s.trim().to_string())
            .unwrap_or_default();
        warn!(
            marker = %self.marker.display(),
            previous = %left_at,
            tasks = tasks.len(),
            "previous session did not shut down cleanly"
        );

        if let Err(e) = self.fs.remove_file(&self.marker) {
            warn!(marker = %self.marker.display(), error = %e, "could not remove crash marker");
        }

        RecoveryReport {
            state: RecoveryState::Recovering,
            orphaned: tasks.to_vec(),
        }
    }

    /// Write a fresh marker. Idempotent.
    pub fn arm(&self) {
        let contents = format!("started at {}\n", now_local().format("%Y-%m-%d %H:%M:%S"));
        match self.fs.write(&self.marker, contents.as_bytes()) {
            Ok(()) => info!(marker = %self.marker.display(), "crash marker armed"),
            Err(e) => warn!(marker = %self.marker.display(), error = %e, "could not write crash marker"),
        }
    }

    /// Remove the marker: last step of a clean shutdown.
    pub fn disarm(&self) {
        if !self.fs.exists(&self.marker) {
            return;
        }
        match self.fs.remove_file(&self.marker) {
            Ok(()) => info!(marker = %self.marker.display(), "crash marker removed"),
            Err(e) => warn!(marker = %self.marker.display(), error = %e, "could not remove crash marker"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::mock::MockFileSystem;
    use crate::types::TaskStatus;

    fn task(id: u64) -> Task {
        Task {
            id,
            name: format!("task {id}"),
            path: PathBuf::from(format!("/bin/t{id}.sh")),
            interval: 5,
            status: TaskStatus::Idle,
            last_run: None,
        }
    }

    #[test]
    fn marker_sits_next_to_the_store() {
        let fs = Arc::new(MockFileSystem::new());
        let recovery = CrashRecovery::for_store(fs, Path::new("/data/tasks.toml"));
        assert_eq!(recovery.marker_path(), Path::new("/data/tasks.toml.running"));
    }

    #[test]
    fn clean_start_reports_nothing() {
        let fs = Arc::new(MockFileSystem::new());
        let recovery = CrashRecovery::for_store(fs, Path::new("tasks.toml"));
        let report = recovery.check_at_startup(&[task(1)]);
        assert_eq!(report, RecoveryReport::clean());
    }

    #[test]
    fn leftover_marker_reports_every_task_and_is_consumed() {
        let fs = Arc::new(MockFileSystem::new());
        fs.add_file("tasks.toml.running", "started at 2024-01-01 00:00:00\n");
        let recovery = CrashRecovery::for_store(fs.clone(), Path::new("tasks.toml"));

        let report = recovery.check_at_startup(&[task(1), task(2)]);
        assert_eq!(report.state, RecoveryState::Recovering);
        assert_eq!(report.orphaned.len(), 2);
        assert!(!recovery.is_armed());
    }

    #[test]
    fn arm_then_disarm() {
        let fs = Arc::new(MockFileSystem::new());
        let recovery = CrashRecovery::for_store(fs.clone(), Path::new("tasks.toml"));

        recovery.arm();
        recovery.arm();
        assert!(recovery.is_armed());
        let contents = fs.contents("tasks.toml.running").unwrap();
        assert!(contents.starts_with("started at "));

        recovery.disarm();
        assert!(!recovery.is_armed());
        recovery.disarm();
    }

    #[test]
    fn armed_marker_blocks_offline_edits() {
        let fs = Arc::new(MockFileSystem::new());
        let recovery = CrashRecovery::for_store(fs, Path::new("tasks.toml"));
        assert!(recovery.ensure_released().is_ok());

        recovery.arm();
        match recovery.ensure_released() {
            Err(RunwardenError::StoreInUse { marker }) => {
                assert_eq!(marker, Path::new("tasks.toml.running"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn write_failures_are_not_fatal() {
        let fs = Arc::new(MockFileSystem::new());
        fs.set_fail_writes(true);
        let recovery = CrashRecovery::for_store(fs, Path::new("tasks.toml"));
        recovery.arm();
        assert!(!recovery.is_armed());
    }
}
