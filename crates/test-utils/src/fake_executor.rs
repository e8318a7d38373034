use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use runwarden::engine::{EngineEvent, RunEvent, RunOutcome};
use runwarden::errors::Result;
use runwarden::exec::backend::BoxFuture;
use runwarden::exec::{
    ExecutorBackend, LaunchError, LaunchOutcome, LaunchRequest, RunInfo, TerminateOutcome,
};
use runwarden::types::{normalize_path, now_local};
use tokio::sync::mpsc;

#[derive(Default)]
struct FakeState {
    next_run_id: u64,
    running: HashMap<PathBuf, RunInfo>,
    launches: Vec<LaunchRequest>,
    missing: HashSet<PathBuf>,
}

/// A fake executor that:
/// - records every launch request
/// - keeps the same one-run-per-path rule as the real supervisor
/// - emits `RunEvent::Completed` when a test calls [`FakeExecutor::complete`],
///   or right away when built with [`FakeExecutor::auto_exit`]
///
/// Clones share state, so a test can keep one handle while the
/// orchestrator owns another.
#[derive(Clone)]
pub struct FakeExecutor {
    state: Arc<Mutex<FakeState>>,
    events: mpsc::Sender<EngineEvent>,
    auto_exit: Option<i32>,
}

impl FakeExecutor {
    pub fn new(events: mpsc::Sender<EngineEvent>) -> Self {
        Self {
            state: Arc::new(Mutex::new(FakeState::default())),
            events,
            auto_exit: None,
        }
    }

    /// Every run prints one line and exits with `code` immediately.
    pub fn auto_exit(mut self, code: i32) -> Self {
        self.auto_exit = Some(code);
        self
    }

    /// Launches of `path` fail with `NotFound`.
    pub fn mark_missing(&self, path: impl Into<PathBuf>) {
        self.lock().missing.insert(normalize_path(&path.into()));
    }

    pub fn launches(&self) -> Vec<LaunchRequest> {
        self.lock().launches.clone()
    }

    pub fn launch_count(&self) -> usize {
        self.lock().launches.len()
    }

    /// Finish the run for `path` with exit `code`. Returns false when
    /// nothing was running there.
    pub async fn complete(&self, path: impl Into<PathBuf>, code: i32) -> bool {
        let run = self.lock().running.remove(&normalize_path(&path.into()));
        match run {
            Some(run) => {
                send_completed(&self.events, run, RunOutcome::Exited(Some(code))).await;
                true
            }
            None => false,
        }
    }

    /// Emit a captured line for the run at `path`.
    pub async fn emit_line(&self, path: impl Into<PathBuf>, line: &str) {
        let run = self.lock().running.get(&normalize_path(&path.into())).cloned();
        if let Some(run) = run {
            let _ = self
                .events
                .send(EngineEvent::Run(RunEvent::LineCaptured {
                    task_id: run.task_id,
                    run_id: run.run_id,
                    line: line.to_string(),
                }))
                .await;
        }
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }
}

async fn send_completed(events: &mpsc::Sender<EngineEvent>, run: RunInfo, outcome: RunOutcome) {
    let _ = events
        .send(EngineEvent::Run(RunEvent::Completed {
            task_id: run.task_id,
            run_id: run.run_id,
            path: run.path,
            outcome,
        }))
        .await;
}

impl ExecutorBackend for FakeExecutor {
    fn launch(&self, request: LaunchRequest) -> LaunchOutcome {
        let path = normalize_path(&request.path);
        let mut state = self.lock();
        state.launches.push(request.clone());

        if state.missing.contains(&path) {
            return LaunchOutcome::Failed(LaunchError::NotFound(path));
        }
        if state.running.contains_key(&path) {
            return LaunchOutcome::AlreadySkipped;
        }

        state.next_run_id += 1;
        let run = RunInfo {
            run_id: state.next_run_id,
            task_id: request.task_id,
            path: path.clone(),
            pid: None,
            capture_output: request.capture_output,
            heartbeat: false,
            started_at: now_local(),
        };

        if let Some(code) = self.auto_exit {
            let events = self.events.clone();
            let finished = run.clone();
            tokio::spawn(async move {
                let _ = events
                    .send(EngineEvent::Run(RunEvent::LineCaptured {
                        task_id: finished.task_id,
                        run_id: finished.run_id,
                        line: "fake output".to_string(),
                    }))
                    .await;
                send_completed(&events, finished, RunOutcome::Exited(Some(code))).await;
            });
        } else {
            state.running.insert(path, run.clone());
        }

        LaunchOutcome::Started(run)
    }

    fn force_terminate(&self, path: PathBuf) -> BoxFuture<'_, Result<TerminateOutcome>> {
        Box::pin(async move {
            let run = self.lock().running.remove(&normalize_path(&path));
            match run {
                Some(run) => {
                    send_completed(&self.events, run, RunOutcome::Terminated).await;
                    Ok(TerminateOutcome::Terminated)
                }
                None => Ok(TerminateOutcome::NotTracked),
            }
        })
    }

    fn terminate_all(&self) -> BoxFuture<'_, Vec<(RunInfo, Result<TerminateOutcome>)>> {
        Box::pin(async move {
            let runs: Vec<RunInfo> = self.lock().running.drain().map(|(_, run)| run).collect();
            let mut results = Vec::with_capacity(runs.len());
            for run in runs {
                send_completed(&self.events, run.clone(), RunOutcome::Terminated).await;
                results.push((run, Ok(TerminateOutcome::Terminated)));
            }
            results
        })
    }

    fn running(&self) -> Vec<RunInfo> {
        let mut runs: Vec<RunInfo> = self.lock().running.values().cloned().collect();
        runs.sort_by_key(|run| run.run_id);
        runs
    }
}
