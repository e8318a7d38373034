// src/scheduler/timer.rs

//! One recurring, pausable timer.

use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, sleep};
use tracing::{debug, trace};

use crate::engine::EngineEvent;
use crate::types::TaskId;

/// Fire `Tick { task_id }` every `period`.
///
/// While `paused` is true the countdown is frozen: the time left when the
/// pause began is what remains after resume. The loop ends when the engine
/// channel or the pause sender goes away.
pub(crate) async fn run_timer(
    task_id: TaskId,
    period: Duration,
    mut paused: watch::Receiver<bool>,
    events: mpsc::Sender<EngineEvent>,
) {
    let mut remaining = period;

    loop {
        while *paused.borrow_and_update() {
            if paused.changed().await.is_err() {
                return;
            }
        }

        let started = Instant::now();
        tokio::select! {
            _ = sleep(remaining) => {
                trace!(task_id, "interval elapsed");
                if events.send(EngineEvent::Tick { task_id }).await.is_err() {
                    debug!(task_id, "engine gone; timer stopped");
                    return;
                }
                remaining = period;
            }
            changed = paused.changed() => {
                if changed.is_err() {
                    return;
                }
                remaining = remaining.saturating_sub(started.elapsed());
            }
        }
    }
}
