// src/store/task_store.rs

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::config::validate_draft;
use crate::errors::{Result, RunwardenError};
use crate::fs::FileSystem;
use crate::store::atomic::{atomic_write, backup_corrupt};
use crate::types::{Task, TaskDraft, TaskId, TaskStatus, normalize_path};

/// On-disk layout: an array of `[[task]]` tables, in list order.
#[derive(Debug, Default, Serialize, Deserialize)]
struct TaskFile {
    #[serde(default)]
    task: Vec<Task>,
}

/// Owner of the task list and its persisted form.
///
/// Every mutation and the save that follows it happen under one lock, so the
/// in-memory list and the file never disagree about ordering. A failed save
/// is logged and the in-memory change is kept; the next successful save
/// catches the file up.
#[derive(Debug)]
pub struct TaskStore {
    fs: Arc<dyn FileSystem>,
    path: PathBuf,
    tasks: Mutex<Vec<Task>>,
}

impl TaskStore {
    /// Load the store at `path`.
    ///
    /// - Missing file: empty list.
    /// - Unparseable file: moved to `<path>.backup`, empty list.
    pub fn open(fs: Arc<dyn FileSystem>, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let tasks = load_tasks(fs.as_ref(), &path);
        info!(path = %path.display(), count = tasks.len(), "task store loaded");
        Self {
            fs,
            path,
            tasks: Mutex::new(tasks),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn list(&self) -> Vec<Task> {
        self.lock().clone()
    }

    pub fn get(&self, id: TaskId) -> Option<Task> {
        self.lock().iter().find(|t| t.id == id).cloned()
    }

    /// Tasks whose normalized path equals `path` (after normalization).
    pub fn find_by_path(&self, path: &Path) -> Vec<Task> {
        let wanted = normalize_path(path);
        self.lock()
            .iter()
            .filter(|t| normalize_path(&t.path) == wanted)
            .cloned()
            .collect()
    }

    /// Validate and append a new task with id `max + 1`.
    pub fn add(&self, draft: TaskDraft) -> Result<Task> {
        let interval = validate_draft(&draft)?;
        let mut tasks = self.lock();

        let id = tasks.iter().map(|t| t.id).max().unwrap_or(0) + 1;
        let task = Task {
            id,
            name: draft.name.trim().to_string(),
            path: normalize_path(&draft.path),
            interval,
            status: TaskStatus::Idle,
            last_run: None,
        };
        tasks.push(task.clone());
        self.persist(&tasks);

        debug!(task_id = id, name = %task.name, "task added");
        Ok(task)
    }

    /// Replace name, path and interval of an existing task. Status and
    /// `last_run` are left alone.
    pub fn update(&self, id: TaskId, draft: TaskDraft) -> Result<Task> {
        let interval = validate_draft(&draft)?;
        let mut tasks = self.lock();

        let task = tasks
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or(RunwardenError::TaskNotFound(id))?;
        task.name = draft.name.trim().to_string();
        task.path = normalize_path(&draft.path);
        task.interval = interval;
        let updated = task.clone();
        self.persist(&tasks);

        debug!(task_id = id, "task updated");
        Ok(updated)
    }

    pub fn delete(&self, id: TaskId) -> Result<Task> {
        let mut tasks = self.lock();
        let index = tasks
            .iter()
            .position(|t| t.id == id)
            .ok_or(RunwardenError::TaskNotFound(id))?;
        let removed = tasks.remove(index);
        self.persist(&tasks);

        debug!(task_id = id, "task deleted");
        Ok(removed)
    }

    /// Set the status of a task; `last_run` is only overwritten when given.
    pub fn update_status(
        &self,
        id: TaskId,
        status: TaskStatus,
        last_run: Option<NaiveDateTime>,
    ) -> Result<Task> {
        let mut tasks = self.lock();
        let task = tasks
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or(RunwardenError::TaskNotFound(id))?;
        task.status = status;
        if last_run.is_some() {
            task.last_run = last_run;
        }
        let updated = task.clone();
        self.persist(&tasks);
        Ok(updated)
    }

    /// Force every `Running` task back to `Idle` and save, whether or not
    /// anything changed. Returns the ids that were reset.
    pub fn reset_running(&self) -> Result<Vec<TaskId>> {
        let mut tasks = self.lock();
        let mut reset = Vec::new();
        for task in tasks.iter_mut().filter(|t| t.is_running()) {
            task.status = TaskStatus::Idle;
            reset.push(task.id);
        }
        self.write_file(&tasks)?;
        if !reset.is_empty() {
            info!(?reset, "reset stale Running statuses to Idle");
        }
        Ok(reset)
    }

    /// Write the current list to disk.
    pub fn save(&self) -> Result<()> {
        let tasks = self.lock();
        self.write_file(&tasks)
    }

    fn persist(&self, tasks: &[Task]) {
        if let Err(e) = self.write_file(tasks) {
            error!(path = %self.path.display(), error = %e, "failed to save tasks");
        }
    }

    fn write_file(&self, tasks: &[Task]) -> Result<()> {
        let file = TaskFile {
            task: tasks.to_vec(),
        };
        let contents = toml::to_string_pretty(&file)?;
        atomic_write(self.fs.as_ref(), &self.path, contents.as_bytes())
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Task>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn load_tasks(fs: &dyn FileSystem, path: &Path) -> Vec<Task> {
    if !fs.exists(path) {
        return Vec::new();
    }

    let parsed = fs
        .read_to_string(path)
        .map_err(RunwardenError::from)
        .and_then(|contents| toml::from_str::<TaskFile>(&contents).map_err(RunwardenError::from));

    match parsed {
        Ok(file) => file.task,
        Err(e) => {
            let backup = backup_corrupt(fs, path);
            warn!(
                path = %path.display(),
                backup = ?backup,
                error = %e,
                "task store is unreadable; starting with an empty list"
            );
            Vec::new()
        }
    }
}
