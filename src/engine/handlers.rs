// src/engine/handlers.rs

//! Reactions to supervisor and watchdog events.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::engine::{Orchestrator, RunEvent, RunOutcome, UiEvent};
use crate::errors::RunwardenError;
use crate::exec::ExecutorBackend;
use crate::types::{TaskId, TaskStatus, now_local};

impl<E: ExecutorBackend> Orchestrator<E> {
    pub(crate) fn handle_run_event(&self, event: RunEvent) {
        match event {
            RunEvent::LineCaptured { task_id, line, .. } => self.push_log(task_id, line),
            RunEvent::Heartbeat {
                task_id, elapsed, ..
            } => self.on_heartbeat(task_id, elapsed),
            RunEvent::StreamFailed {
                task_id,
                run_id,
                error,
            } => {
                let err = RunwardenError::StreamFailure(error);
                warn!(task_id, run_id, error = %err, "captured output lost; still waiting for exit");
                self.push_log(task_id, format!("[x] {err}"));
            }
            RunEvent::Completed {
                task_id,
                run_id,
                outcome,
                ..
            } => self.on_completed(task_id, run_id, outcome),
        }
    }

    fn on_heartbeat(&self, task_id: TaskId, elapsed: Duration) {
        let stamp = now_local().format("%H:%M:%S");
        self.push_log(
            task_id,
            format!("[{stamp}] Process running... ({}s elapsed)", elapsed.as_secs()),
        );
    }

    /// A run ended. Only the run the orchestrator recorded as current may
    /// change the task's status; anything else is a leftover.
    fn on_completed(&self, task_id: TaskId, run_id: u64, outcome: RunOutcome) {
        let current = {
            let mut active = self.lock_active();
            match active.get(&task_id) {
                Some(run) if run.run_id == run_id => active.remove(&task_id),
                _ => None,
            }
        };
        let Some(run) = current else {
            debug!(task_id, run_id, ?outcome, "completion for a run that is no longer current");
            return;
        };

        self.watchdog.cancel(task_id);

        let last_run = match &outcome {
            RunOutcome::Exited(code) => {
                let code = code.map_or_else(|| "signal".to_string(), |c| c.to_string());
                self.push_log(task_id, format!("[+] Process completed (Exit code: {code})"));
                Some(now_local())
            }
            RunOutcome::Terminated => None,
            RunOutcome::WaitFailed(reason) => {
                self.push_log(task_id, format!("[x] Lost track of process: {reason}"));
                Some(now_local())
            }
        };

        info!(task_id, run_id, path = %run.path.display(), ?outcome, "run finished");
        match self.store.update_status(task_id, TaskStatus::Idle, last_run) {
            Ok(task) => self.emit_status(&task),
            Err(e) => warn!(task_id, error = %e, "could not record run completion"),
        }
        self.emit(UiEvent::RunFinished { task_id, outcome });
    }

    /// Heal a status stuck at Running. `last_run` is left untouched, and
    /// the run stays current so its late completion still counts.
    pub(crate) fn on_watchdog_fired(&self, task_id: TaskId, run_id: u64) {
        let current = self
            .lock_active()
            .get(&task_id)
            .is_some_and(|run| run.run_id == run_id);
        if !current {
            debug!(task_id, run_id, "watchdog fired for a run that is no longer current");
            return;
        }
        let Some(task) = self.store.get(task_id) else {
            return;
        };
        if !task.is_running() {
            debug!(task_id, "watchdog fired for an idle task; nothing to do");
            return;
        }

        warn!(task_id, run_id, "status still Running after watchdog period; forcing Idle");
        match self.store.update_status(task_id, TaskStatus::Idle, None) {
            Ok(task) => self.emit_status(&task),
            Err(e) => warn!(task_id, error = %e, "could not reset stuck status"),
        }
    }
}
