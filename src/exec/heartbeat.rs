// src/exec/heartbeat.rs

//! "Still running" notices for programs that buffer their output.
//!
//! Some console programs (PDF generators are the usual suspects) write
//! nothing until they exit. For those runs a timer emits
//! [`RunEvent::Heartbeat`] every `every` so the log does not look frozen.
//! The timer stops when the run's completed flag flips.

use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::debug;

use crate::engine::{EngineEvent, RunEvent};
use crate::exec::RunInfo;

pub fn spawn_heartbeat(
    info: &RunInfo,
    every: Duration,
    mut completed: watch::Receiver<bool>,
    events: mpsc::Sender<EngineEvent>,
) -> JoinHandle<()> {
    let task_id = info.task_id;
    let run_id = info.run_id;

    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + every, every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut beats: u32 = 0;

        loop {
            if *completed.borrow() {
                break;
            }

            tokio::select! {
                _ = ticker.tick() => {
                    beats += 1;
                    let event = RunEvent::Heartbeat {
                        task_id,
                        run_id,
                        elapsed: every * beats,
                    };
                    if events.send(EngineEvent::Run(event)).await.is_err() {
                        break;
                    }
                }
                changed = completed.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        debug!(task_id, run_id, beats, "heartbeat stopped");
    })
}
