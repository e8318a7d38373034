// src/exec/supervisor.rs

//! The process supervisor: launch, track, terminate.

use std::path::Path;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use crate::engine::EngineEvent;
use crate::errors::Result;
use crate::exec::command::build_command;
use crate::exec::heartbeat::spawn_heartbeat;
use crate::exec::output::spawn_output_reader;
use crate::exec::registry::RunEntry;
use crate::exec::task_runner::{RunContext, TerminateRequest, watch_run};
use crate::exec::{
    LaunchError, LaunchOutcome, LaunchRequest, RunInfo, RunRegistry, SupervisorOptions,
    TerminateOutcome,
};
use crate::types::{normalize_path, now_local};

/// Launches executables and keeps at most one in-flight run per normalized
/// path.
///
/// Every spawned run gets a small arena of tasks: a completion watcher that
/// owns the child, an output reader (capture mode only) and an optional
/// heartbeat. All of them report to the engine on `events`.
#[derive(Debug)]
pub struct ProcessSupervisor {
    registry: Arc<RunRegistry>,
    events: mpsc::Sender<EngineEvent>,
    options: SupervisorOptions,
}

impl ProcessSupervisor {
    pub fn new(events: mpsc::Sender<EngineEvent>, options: SupervisorOptions) -> Self {
        Self {
            registry: Arc::new(RunRegistry::new()),
            events,
            options,
        }
    }

    pub fn options(&self) -> &SupervisorOptions {
        &self.options
    }

    pub fn is_tracked(&self, path: &Path) -> bool {
        self.registry.is_tracked(&normalize_path(path))
    }

    /// Start a run. Must be called from within a Tokio runtime.
    ///
    /// The duplicate check and the registry insert happen under one lock, so
    /// two concurrent launches of the same path can never both spawn.
    pub fn launch(&self, request: LaunchRequest) -> LaunchOutcome {
        if request.path.as_os_str().is_empty() {
            return LaunchOutcome::Failed(LaunchError::InvalidPath);
        }
        let path = normalize_path(&request.path);
        if !path.is_file() {
            return LaunchOutcome::Failed(LaunchError::NotFound(path));
        }

        let mut state = self.registry.lock();
        if state.contains(&path) {
            debug!(
                task_id = request.task_id,
                path = %path.display(),
                "already running; launch skipped"
            );
            return LaunchOutcome::AlreadySkipped;
        }

        let mut child = match build_command(&path, request.capture_output).spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!(task_id = request.task_id, path = %path.display(), error = %e, "spawn failed");
                return LaunchOutcome::Failed(LaunchError::Spawn {
                    path,
                    reason: e.to_string(),
                });
            }
        };

        let heartbeat = request.capture_output && self.options.wants_heartbeat(&path);
        let info = RunInfo {
            run_id: state.next_run_id(),
            task_id: request.task_id,
            path,
            pid: child.id(),
            capture_output: request.capture_output,
            heartbeat,
            started_at: now_local(),
        };

        let (control_tx, control_rx) = oneshot::channel();
        let (completed_tx, completed_rx) = watch::channel(false);

        let reader = request.capture_output.then(|| {
            spawn_output_reader(
                &info,
                child.stdout.take(),
                child.stderr.take(),
                self.events.clone(),
            )
        });
        if heartbeat {
            spawn_heartbeat(
                &info,
                self.options.heartbeat_every,
                completed_rx,
                self.events.clone(),
            );
        }

        state.insert(RunEntry {
            info: info.clone(),
            control: Some(control_tx),
        });
        drop(state);

        let ctx = RunContext {
            info: info.clone(),
            registry: Arc::clone(&self.registry),
            events: self.events.clone(),
            completed: completed_tx,
            reader,
        };
        tokio::spawn(watch_run(child, ctx, control_rx));

        info!(
            task_id = info.task_id,
            run_id = info.run_id,
            pid = ?info.pid,
            path = %info.path.display(),
            capture = info.capture_output,
            "process started"
        );
        LaunchOutcome::Started(info)
    }

    /// Tear down the run tracked for `path`, including its descendants.
    ///
    /// The registry entry is released before termination starts, whatever
    /// the outcome. A second call for the same path returns
    /// [`TerminateOutcome::NotTracked`].
    pub async fn force_terminate(&self, path: &Path) -> Result<TerminateOutcome> {
        let path = normalize_path(path);
        let entry = self.registry.lock().remove(&path);
        match entry {
            Some(entry) => self.terminate_entry(entry).await,
            None => Ok(TerminateOutcome::NotTracked),
        }
    }

    /// Terminate every tracked run and clear the registry.
    pub async fn terminate_all(&self) -> Vec<(RunInfo, Result<TerminateOutcome>)> {
        let entries = self.registry.lock().drain();
        let mut results = Vec::with_capacity(entries.len());
        for entry in entries {
            let info = entry.info.clone();
            let result = self.terminate_entry(entry).await;
            results.push((info, result));
        }
        results
    }

    pub fn running(&self) -> Vec<RunInfo> {
        self.registry.snapshot()
    }

    async fn terminate_entry(&self, mut entry: RunEntry) -> Result<TerminateOutcome> {
        let Some(control) = entry.control.take() else {
            return Ok(TerminateOutcome::AlreadyExited);
        };

        let (reply_tx, reply_rx) = oneshot::channel();
        let request = TerminateRequest {
            grace: self.options.grace_period,
            reply: reply_tx,
        };
        if control.send(request).is_err() {
            debug!(run_id = entry.info.run_id, "watcher already finished");
            return Ok(TerminateOutcome::AlreadyExited);
        }

        match reply_rx.await {
            Ok(result) => result,
            // The watcher saw the exit first and dropped the request.
            Err(_) => Ok(TerminateOutcome::AlreadyExited),
        }
    }
}
