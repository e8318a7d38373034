// src/exec/registry.rs

//! Path-keyed table of in-flight runs.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::oneshot;

use crate::exec::RunInfo;
use crate::exec::task_runner::TerminateRequest;

/// Internal handle for a currently-running process.
///
/// `control` reaches the run's completion watcher, which owns the child
/// process; it is taken exactly once, by whoever terminates the run.
#[derive(Debug)]
pub(crate) struct RunEntry {
    pub(crate) info: RunInfo,
    pub(crate) control: Option<oneshot::Sender<TerminateRequest>>,
}

#[derive(Debug, Default)]
pub(crate) struct RegistryState {
    next_run_id: u64,
    runs: HashMap<PathBuf, RunEntry>,
}

impl RegistryState {
    pub(crate) fn contains(&self, path: &Path) -> bool {
        self.runs.contains_key(path)
    }

    pub(crate) fn next_run_id(&mut self) -> u64 {
        self.next_run_id += 1;
        self.next_run_id
    }

    pub(crate) fn insert(&mut self, entry: RunEntry) {
        self.runs.insert(entry.info.path.clone(), entry);
    }

    pub(crate) fn remove(&mut self, path: &Path) -> Option<RunEntry> {
        self.runs.remove(path)
    }

    /// Remove the entry for `path` only if it still belongs to `run_id`.
    pub(crate) fn remove_run(&mut self, path: &Path, run_id: u64) -> bool {
        match self.runs.get(path) {
            Some(entry) if entry.info.run_id == run_id => {
                self.runs.remove(path);
                true
            }
            _ => false,
        }
    }

    pub(crate) fn drain(&mut self) -> Vec<RunEntry> {
        self.runs.drain().map(|(_, entry)| entry).collect()
    }

    pub(crate) fn snapshot(&self) -> Vec<RunInfo> {
        let mut runs: Vec<RunInfo> = self.runs.values().map(|e| e.info.clone()).collect();
        runs.sort_by_key(|info| info.run_id);
        runs
    }
}

/// At most one [`RunEntry`] per normalized path. Every mutation goes through
/// a single mutex, which is never held across an `.await`.
#[derive(Debug, Default)]
pub struct RunRegistry {
    state: Mutex<RegistryState>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_tracked(&self, path: &Path) -> bool {
        self.lock().contains(path)
    }

    pub fn len(&self) -> usize {
        self.lock().runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> Vec<RunInfo> {
        self.lock().snapshot()
    }
}
