// src/exec/backend.rs

//! Pluggable executor backend abstraction.
//!
//! The orchestrator talks to an `ExecutorBackend` instead of the
//! [`ProcessSupervisor`] directly. Production code uses the supervisor; tests
//! can provide a backend that records launches and emits
//! `RunEvent::Completed` on demand without spawning anything.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;

use crate::errors::Result;
use crate::exec::{LaunchOutcome, LaunchRequest, ProcessSupervisor, RunInfo, TerminateOutcome};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Trait abstracting how task runs are started and stopped.
pub trait ExecutorBackend: Send + Sync {
    /// Start a run, or report why not. Never blocks on the child.
    fn launch(&self, request: LaunchRequest) -> LaunchOutcome;

    /// Tear down the run for `path`. `NotTracked` when nothing runs there.
    fn force_terminate(&self, path: PathBuf) -> BoxFuture<'_, Result<TerminateOutcome>>;

    /// Tear down every run (shutdown).
    fn terminate_all(&self) -> BoxFuture<'_, Vec<(RunInfo, Result<TerminateOutcome>)>>;

    /// Snapshot of in-flight runs.
    fn running(&self) -> Vec<RunInfo>;
}

impl ExecutorBackend for ProcessSupervisor {
    fn launch(&self, request: LaunchRequest) -> LaunchOutcome {
        ProcessSupervisor::launch(self, request)
    }

    fn force_terminate(&self, path: PathBuf) -> BoxFuture<'_, Result<TerminateOutcome>> {
        Box::pin(async move { ProcessSupervisor::force_terminate(self, &path).await })
    }

    fn terminate_all(&self) -> BoxFuture<'_, Vec<(RunInfo, Result<TerminateOutcome>)>> {
        Box::pin(ProcessSupervisor::terminate_all(self))
    }

    fn running(&self) -> Vec<RunInfo> {
        ProcessSupervisor::running(self)
    }
}
