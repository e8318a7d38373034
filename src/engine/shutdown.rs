// src/engine/shutdown.rs

//! Shutdown sequencing.
//!
//! Order matters: processes first, then statuses, then the crash marker.
//! The marker is only removed once nothing can be left Running on disk,
//! so a failed status save leaves it in place for the next startup.

use std::sync::atomic::Ordering;

use tracing::{info, warn};

use crate::engine::{Orchestrator, ShutdownOutcome, UiEvent};
use crate::errors::Result;
use crate::exec::ExecutorBackend;

impl<E: ExecutorBackend> Orchestrator<E> {
    /// Stop everything.
    ///
    /// Without `confirmed`, a shutdown while tasks are running returns
    /// [`ShutdownOutcome::NeedsConfirmation`] and changes nothing.
    pub async fn shutdown(&self, confirmed: bool) -> Result<ShutdownOutcome> {
        let running = self.running_tasks();
        if !running.is_empty() && !confirmed {
            info!(running = running.len(), "shutdown needs confirmation");
            return Ok(ShutdownOutcome::NeedsConfirmation(running));
        }

        if self.shutting_down.swap(true, Ordering::SeqCst) {
            info!("shutdown already in progress");
        }
        self.scheduler.pause_all();

        let results = self.executor.terminate_all().await;
        let terminated = results.len();
        for (run, result) in results {
            match result {
                Ok(outcome) => {
                    info!(task_id = run.task_id, pid = ?run.pid, ?outcome, "run terminated for shutdown");
                }
                Err(e) => {
                    warn!(task_id = run.task_id, pid = ?run.pid, error = %e, "could not terminate run");
                    self.emit(UiEvent::Error {
                        task_id: Some(run.task_id),
                        message: e.to_string(),
                    });
                }
            }
        }

        self.lock_active().clear();
        self.watchdog.cancel_all();
        self.scheduler.shutdown();

        let reset = self.store.reset_running()?;
        for task_id in reset {
            if let Some(task) = self.store.get(task_id) {
                self.emit_status(&task);
            }
        }

        self.recovery.disarm();

        info!(terminated, "shutdown complete");
        Ok(ShutdownOutcome::Completed { terminated })
    }
}
