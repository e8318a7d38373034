// src/exec/task_runner.rs

//! Per-run completion watcher.
//!
//! The watcher owns the child process. It waits for whichever comes first:
//! the process exiting on its own, or a [`TerminateRequest`] from the
//! supervisor. Either way it clears the run's registry entry (only if the
//! entry still belongs to this run), raises the shared completed flag that
//! stops the heartbeat, lets the output reader drain, and finally emits
//! exactly one [`RunEvent::Completed`].

use std::sync::Arc;
use std::time::Duration;

use tokio::process::Child;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::engine::{EngineEvent, RunEvent, RunOutcome};
use crate::errors::Result;
use crate::exec::tree::terminate_tree;
use crate::exec::{RunInfo, RunRegistry, TerminateOutcome};

/// How long the watcher waits for the reader to hit end-of-stream after the
/// process is gone. Grandchildren holding the pipe open would otherwise keep
/// the run alive forever.
const READER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Ask the watcher to tear down the process tree and report back.
#[derive(Debug)]
pub struct TerminateRequest {
    pub grace: Duration,
    pub reply: oneshot::Sender<Result<TerminateOutcome>>,
}

/// Everything a watcher needs besides the child itself.
pub(crate) struct RunContext {
    pub(crate) info: RunInfo,
    pub(crate) registry: Arc<RunRegistry>,
    pub(crate) events: mpsc::Sender<EngineEvent>,
    pub(crate) completed: watch::Sender<bool>,
    pub(crate) reader: Option<JoinHandle<()>>,
}

pub(crate) async fn watch_run(
    mut child: Child,
    ctx: RunContext,
    control_rx: oneshot::Receiver<TerminateRequest>,
) {
    let info = &ctx.info;
    let mut control = Some(control_rx);

    let outcome = loop {
        tokio::select! {
            status = child.wait() => {
                break match status {
                    Ok(status) => {
                        info!(
                            task_id = info.task_id,
                            run_id = info.run_id,
                            path = %info.path.display(),
                            exit_code = ?status.code(),
                            "process exited"
                        );
                        RunOutcome::Exited(status.code())
                    }
                    Err(e) => {
                        warn!(
                            task_id = info.task_id,
                            run_id = info.run_id,
                            error = %e,
                            "waiting for process failed"
                        );
                        RunOutcome::WaitFailed(e.to_string())
                    }
                };
            }

            request = async {
                match control.as_mut() {
                    Some(rx) => rx.await,
                    None => std::future::pending().await,
                }
            } => {
                control = None;
                match request {
                    Ok(request) => {
                        info!(
                            task_id = info.task_id,
                            run_id = info.run_id,
                            pid = ?info.pid,
                            "terminating process tree"
                        );
                        let result = terminate_tree(&mut child, &info.path, request.grace).await;
                        if let Err(e) = &result {
                            warn!(task_id = info.task_id, run_id = info.run_id, error = %e, "process tree survived termination");
                        }
                        let _ = request.reply.send(result);
                        break RunOutcome::Terminated;
                    }
                    Err(_) => {
                        debug!(
                            task_id = info.task_id,
                            run_id = info.run_id,
                            "control channel closed; still waiting for exit"
                        );
                    }
                }
            }
        }
    };

    // A request that raced the exit is answered here; closing the receiver
    // makes any later send fail. Neither may wait for the engine channel.
    if let Some(mut rx) = control.take() {
        if let Ok(request) = rx.try_recv() {
            debug!(task_id = info.task_id, run_id = info.run_id, "terminate request arrived after exit");
            let _ = request.reply.send(Ok(TerminateOutcome::AlreadyExited));
        }
    }

    finish_run(ctx, outcome).await;
}

async fn finish_run(ctx: RunContext, outcome: RunOutcome) {
    let RunContext {
        info,
        registry,
        events,
        completed,
        reader,
    } = ctx;

    if !registry.lock().remove_run(&info.path, info.run_id) {
        debug!(run_id = info.run_id, "registry entry already released");
    }
    let _ = completed.send(true);

    if let Some(mut reader) = reader {
        if timeout(READER_DRAIN_TIMEOUT, &mut reader).await.is_err() {
            debug!(run_id = info.run_id, "output still open after exit; detaching reader");
            reader.abort();
        }
    }

    let event = EngineEvent::Run(RunEvent::Completed {
        task_id: info.task_id,
        run_id: info.run_id,
        path: info.path.clone(),
        outcome,
    });
    if events.send(event).await.is_err() {
        debug!(run_id = info.run_id, "engine gone; completion dropped");
    }
}
