// src/engine/orchestrator.rs

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::classify::classify_file;
use crate::config::{ConfigStore, EngineSettings, ensure_executable_exists, validate_draft};
use crate::engine::{EngineEvent, LogBuffer, RunTrigger, UiEvent};
use crate::errors::{Result, RunwardenError};
use crate::exec::{ExecutorBackend, LaunchOutcome, LaunchRequest, RunInfo, TerminateOutcome};
use crate::fs::FileSystem;
use crate::recovery::{CrashRecovery, RecoveryReport};
use crate::scheduler::TaskScheduler;
use crate::store::TaskStore;
use crate::types::{Task, TaskDraft, TaskId, TaskStatus, normalize_path, now_local};
use crate::watchdog::StatusWatchdog;

pub(crate) const SKIPPED_LINE: &str =
    "[!] Second execution attempt blocked - process already running";

/// The run the orchestrator believes is current for a task.
#[derive(Debug, Clone)]
pub(crate) struct ActiveRun {
    pub(crate) run_id: u64,
    pub(crate) path: PathBuf,
}

/// Composition root of the engine.
///
/// Owns the scheduler, watchdog and crash marker, talks to processes only
/// through an [`ExecutorBackend`], and writes every status transition back
/// through the [`TaskStore`]. User commands are plain methods; background
/// happenings arrive on the engine channel consumed by [`Orchestrator::run`].
pub struct Orchestrator<E: ExecutorBackend> {
    pub(crate) store: Arc<TaskStore>,
    pub(crate) config: Arc<ConfigStore>,
    pub(crate) fs: Arc<dyn FileSystem>,
    pub(crate) executor: E,
    pub(crate) scheduler: TaskScheduler,
    pub(crate) watchdog: StatusWatchdog,
    pub(crate) recovery: CrashRecovery,
    pub(crate) settings: EngineSettings,
    pub(crate) logs: Mutex<HashMap<TaskId, LogBuffer>>,
    pub(crate) active: Mutex<HashMap<TaskId, ActiveRun>>,
    pub(crate) ui: mpsc::UnboundedSender<UiEvent>,
    pub(crate) shutting_down: AtomicBool,
}

impl<E: ExecutorBackend> fmt::Debug for Orchestrator<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("store", &self.store.path())
            .field("scheduler", &self.scheduler)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl<E: ExecutorBackend> Orchestrator<E> {
    pub fn new(
        store: Arc<TaskStore>,
        config: Arc<ConfigStore>,
        fs: Arc<dyn FileSystem>,
        executor: E,
        events: mpsc::Sender<EngineEvent>,
        ui: mpsc::UnboundedSender<UiEvent>,
    ) -> Self {
        let settings = config.settings();
        let recovery = CrashRecovery::for_store(Arc::clone(&fs), store.path());
        Self {
            scheduler: TaskScheduler::new(events.clone()),
            watchdog: StatusWatchdog::new(settings.watchdog_factor, events),
            recovery,
            store,
            config,
            fs,
            executor,
            settings,
            logs: Mutex::new(HashMap::new()),
            active: Mutex::new(HashMap::new()),
            ui,
            shutting_down: AtomicBool::new(false),
        }
    }

    pub fn store(&self) -> &TaskStore {
        &self.store
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    pub fn scheduler(&self) -> &TaskScheduler {
        &self.scheduler
    }

    pub fn watchdog(&self) -> &StatusWatchdog {
        &self.watchdog
    }

    pub fn recovery(&self) -> &CrashRecovery {
        &self.recovery
    }

    /// Startup sequence: consume a leftover crash marker, heal statuses
    /// persisted as Running, arm a fresh marker, then schedule every task.
    pub fn start(&self) -> RecoveryReport {
        let tasks = self.store.list();
        let report = self.recovery.check_at_startup(&tasks);
        if !report.orphaned.is_empty() {
            self.emit(UiEvent::OrphansDetected {
                tasks: report.orphaned.clone(),
            });
        }

        match self.store.reset_running() {
            Ok(reset) => {
                for task_id in reset {
                    if let Some(task) = self.store.get(task_id) {
                        self.emit_status(&task);
                    }
                }
            }
            Err(e) => warn!(error = %e, "could not persist status reset at startup"),
        }

        self.recovery.arm();

        for task in &tasks {
            self.schedule_task(task);
        }
        info!(tasks = tasks.len(), state = ?report.state, "engine started");
        report
    }

    /// Main event loop. Ends after a shutdown request or when every sender
    /// is gone.
    pub async fn run(self: Arc<Self>, mut events: mpsc::Receiver<EngineEvent>) {
        info!("runwarden engine loop started");

        while let Some(event) = events.recv().await {
            debug!(?event, "engine received event");
            match event {
                EngineEvent::Tick { task_id } => self.on_tick(task_id).await,
                EngineEvent::Run(run_event) => self.handle_run_event(run_event),
                EngineEvent::WatchdogFired { task_id, run_id } => {
                    self.on_watchdog_fired(task_id, run_id)
                }
                EngineEvent::ShutdownRequested => {
                    if let Err(e) = self.shutdown(true).await {
                        warn!(error = %e, "shutdown finished with errors");
                    }
                    break;
                }
            }
        }

        info!("runwarden engine loop exiting");
    }

    async fn on_tick(&self, task_id: TaskId) {
        match self.run_task(task_id, RunTrigger::Scheduled).await {
            Ok(_) => {}
            Err(RunwardenError::TaskNotFound(_)) => {
                debug!(task_id, "tick for a task that no longer exists");
                self.scheduler.unschedule(task_id);
            }
            Err(e) => warn!(task_id, error = %e, "scheduled run failed"),
        }
    }

    /// Run entry point shared by the scheduler and "run now".
    ///
    /// Returns `Ok(None)` when the run was not attempted: a scheduled tick
    /// while paused, or anything during shutdown. Manual runs ignore pause.
    pub async fn run_task(
        &self,
        task_id: TaskId,
        trigger: RunTrigger,
    ) -> Result<Option<LaunchOutcome>> {
        if self.is_shutting_down() {
            debug!(task_id, "shutting down; run ignored");
            return Ok(None);
        }
        if trigger == RunTrigger::Scheduled && self.scheduler.is_paused() {
            debug!(task_id, "scheduler paused; tick ignored");
            return Ok(None);
        }

        let task = self
            .store
            .get(task_id)
            .ok_or(RunwardenError::TaskNotFound(task_id))?;
        let capture = classify_file(task.path.clone()).await.needs_capture();
        if self.is_shutting_down() {
            debug!(task_id, "shutdown started during classification; run ignored");
            return Ok(None);
        }

        let outcome = self.executor.launch(LaunchRequest {
            task_id,
            path: task.path.clone(),
            capture_output: capture,
        });

        match &outcome {
            LaunchOutcome::Started(run) => self.on_started(&task, run),
            LaunchOutcome::AlreadySkipped => {
                info!(task_id, path = %task.path.display(), ?trigger, "run skipped; executable already running");
                self.push_log(task_id, SKIPPED_LINE);
                self.emit(UiEvent::RunSkipped { task_id });
            }
            LaunchOutcome::Failed(err) => {
                warn!(task_id, error = %err, "launch failed");
                self.push_log(task_id, format!("[x] {err}"));
                self.emit(UiEvent::Error {
                    task_id: Some(task_id),
                    message: err.to_string(),
                });
            }
        }

        Ok(Some(outcome))
    }

    fn on_started(&self, task: &Task, run: &RunInfo) {
        if run.capture_output {
            let stamp = now_local().format("%H:%M:%S");
            let rule = "=".repeat(50);
            self.push_log(task.id, rule.clone());
            self.push_log(task.id, format!("{stamp}  Process started"));
            self.push_log(task.id, rule);
            if run.heartbeat {
                self.push_log(task.id, "NOTE: This application may buffer output.");
                self.push_log(task.id, "   Output may appear in bursts or only at completion.");
            }
        }

        self.lock_active().insert(
            task.id,
            ActiveRun {
                run_id: run.run_id,
                path: run.path.clone(),
            },
        );

        match self.store.update_status(task.id, TaskStatus::Running, None) {
            Ok(updated) => self.emit_status(&updated),
            Err(e) => warn!(task_id = task.id, error = %e, "could not mark task running"),
        }
        self.watchdog.arm(task.id, run.run_id, task.interval);
    }

    // ------------------------------------------------------------------
    // User commands
    // ------------------------------------------------------------------

    /// Validate, persist and schedule a new task.
    pub fn add_task(&self, draft: TaskDraft) -> Result<Task> {
        validate_draft(&draft)?;
        ensure_executable_exists(self.fs.as_ref(), &draft.path)?;

        let task = self.store.add(draft)?;
        self.remember_path(&task);
        self.schedule_task(&task);
        info!(task_id = task.id, name = %task.name, "task added");
        Ok(task)
    }

    /// Replace a task's definition and reinstall its timer.
    pub fn update_task(&self, task_id: TaskId, draft: TaskDraft) -> Result<Task> {
        validate_draft(&draft)?;
        ensure_executable_exists(self.fs.as_ref(), &draft.path)?;

        let task = self.store.update(task_id, draft)?;
        self.remember_path(&task);
        self.schedule_task(&task);
        info!(task_id, "task updated");
        Ok(task)
    }

    /// Remove a task. A run in flight is left alone; its completion is
    /// ignored.
    pub fn delete_task(&self, task_id: TaskId) -> Result<Task> {
        let task = self.store.delete(task_id)?;
        self.scheduler.unschedule(task_id);
        self.watchdog.cancel(task_id);
        self.lock_logs().remove(&task_id);
        self.lock_active().remove(&task_id);
        info!(task_id, "task deleted");
        Ok(task)
    }

    pub async fn execute_now(&self, task_id: TaskId) -> Result<Option<LaunchOutcome>> {
        self.run_task(task_id, RunTrigger::Manual).await
    }

    /// Force-terminate the run of `task_id`'s executable.
    pub async fn stop_task(&self, task_id: TaskId) -> Result<TerminateOutcome> {
        let task = self
            .store
            .get(task_id)
            .ok_or(RunwardenError::TaskNotFound(task_id))?;

        self.push_log(task_id, "[!] Terminating process...");
        match self.executor.force_terminate(task.path.clone()).await {
            Ok(outcome) => {
                let line = match outcome {
                    TerminateOutcome::Terminated => "[+] Process terminated successfully",
                    TerminateOutcome::Killed => "[+] Process killed",
                    TerminateOutcome::AlreadyExited | TerminateOutcome::NotTracked => {
                        "[+] Process was not running"
                    }
                };
                self.push_log(task_id, line);
                Ok(outcome)
            }
            Err(e) => {
                self.push_log(task_id, format!("[x] Error terminating process: {e}"));
                self.emit(UiEvent::Error {
                    task_id: Some(task_id),
                    message: e.to_string(),
                });
                Err(e)
            }
        }
    }

    pub fn pause_all(&self) {
        self.scheduler.pause_all();
        self.emit(UiEvent::SchedulerStateChanged { paused: true });
    }

    pub fn resume_all(&self) {
        self.scheduler.resume_all();
        self.emit(UiEvent::SchedulerStateChanged { paused: false });
    }

    /// Flip pause state; returns the new "paused" value.
    pub fn toggle_scheduler(&self) -> bool {
        if self.scheduler.is_paused() {
            self.resume_all();
            false
        } else {
            self.pause_all();
            true
        }
    }

    pub fn is_paused(&self) -> bool {
        self.scheduler.is_paused()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Captured output retained for `task_id`, oldest first.
    pub fn recent_output(&self, task_id: TaskId) -> Vec<String> {
        self.lock_logs()
            .get(&task_id)
            .map(LogBuffer::to_vec)
            .unwrap_or_default()
    }

    /// Tasks whose executable currently has a live run.
    pub fn running_tasks(&self) -> Vec<Task> {
        let live: Vec<PathBuf> = self
            .executor
            .running()
            .into_iter()
            .map(|run| run.path)
            .collect();
        self.store
            .list()
            .into_iter()
            .filter(|task| live.contains(&normalize_path(&task.path)))
            .collect()
    }

    // ------------------------------------------------------------------
    // Helpers shared with the handler and shutdown modules
    // ------------------------------------------------------------------

    fn schedule_task(&self, task: &Task) {
        if let Err(e) = self.scheduler.schedule(task.id, task.interval) {
            warn!(task_id = task.id, error = %e, "task not scheduled");
            self.emit(UiEvent::Error {
                task_id: Some(task.id),
                message: e.to_string(),
            });
        }
    }

    fn remember_path(&self, task: &Task) {
        if let Err(e) = self.config.set_last_selected_path(&task.path) {
            warn!(error = %e, "could not persist last selected path");
        }
    }

    pub(crate) fn push_log(&self, task_id: TaskId, line: impl Into<String>) {
        let line = line.into();
        let capacity = self.settings.log_buffer_lines;
        self.lock_logs()
            .entry(task_id)
            .or_insert_with(|| LogBuffer::new(capacity))
            .push(line.clone());
        self.emit(UiEvent::LogLine { task_id, line });
    }

    pub(crate) fn emit_status(&self, task: &Task) {
        self.emit(UiEvent::StatusChanged {
            task_id: task.id,
            status: task.status,
            last_run: task.last_run,
        });
    }

    pub(crate) fn emit(&self, event: UiEvent) {
        if self.ui.send(event).is_err() {
            debug!("presentation layer gone; event dropped");
        }
    }

    pub(crate) fn lock_active(&self) -> MutexGuard<'_, HashMap<TaskId, ActiveRun>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_logs(&self) -> MutexGuard<'_, HashMap<TaskId, LogBuffer>> {
        self.logs.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
