// src/watchdog.rs

//! Status watchdog.
//!
//! A run that never reports completion (lost event, hung watcher) would
//! leave its task shown as Running forever. When a run starts, the
//! orchestrator arms a one-shot timer of `factor × interval`; if it fires
//! first, [`EngineEvent::WatchdogFired`] tells the orchestrator to heal the
//! status.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::engine::EngineEvent;
use crate::types::{TaskId, minutes};

#[derive(Debug)]
pub struct StatusWatchdog {
    factor: u32,
    events: mpsc::Sender<EngineEvent>,
    timers: Mutex<HashMap<TaskId, JoinHandle<()>>>,
}

impl StatusWatchdog {
    pub fn new(factor: u32, events: mpsc::Sender<EngineEvent>) -> Self {
        Self {
            factor: factor.max(1),
            events,
            timers: Mutex::new(HashMap::new()),
        }
    }

    /// Arm (or re-arm) the timer for run `run_id` of `task_id`:
    /// `factor × interval_minutes`.
    pub fn arm(&self, task_id: TaskId, run_id: u64, interval_minutes: u32) {
        let delay = minutes(interval_minutes.max(1)).saturating_mul(self.factor);
        self.arm_after(task_id, run_id, delay);
    }

    /// Arm with an explicit delay.
    pub fn arm_after(&self, task_id: TaskId, run_id: u64, delay: Duration) {
        let events = self.events.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            info!(task_id, run_id, ?delay, "status watchdog fired");
            let _ = events
                .send(EngineEvent::WatchdogFired { task_id, run_id })
                .await;
        });

        if let Some(previous) = self.lock().insert(task_id, handle) {
            previous.abort();
        }
        debug!(task_id, run_id, ?delay, "watchdog armed");
    }

    pub fn cancel(&self, task_id: TaskId) {
        if let Some(handle) = self.lock().remove(&task_id) {
            handle.abort();
            debug!(task_id, "watchdog cancelled");
        }
    }

    pub fn cancel_all(&self) {
        for (_, handle) in self.lock().drain() {
            handle.abort();
        }
    }

    /// Armed and not yet fired.
    pub fn is_armed(&self, task_id: TaskId) -> bool {
        self.lock()
            .get(&task_id)
            .is_some_and(|handle| !handle.is_finished())
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<TaskId, JoinHandle<()>>> {
        self.timers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for StatusWatchdog {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn fires_after_factor_times_interval() {
        let (tx, mut rx) = mpsc::channel(4);
        let watchdog = StatusWatchdog::new(2, tx);
        let started = tokio::time::Instant::now();

        watchdog.arm(5, 11, 1);
        assert!(watchdog.is_armed(5));

        match rx.recv().await {
            Some(EngineEvent::WatchdogFired { task_id, run_id }) => {
                assert_eq!((task_id, run_id), (5, 11));
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(started.elapsed() >= Duration::from_secs(120));
    }

    #[tokio::test(start_paused = true)]
    async fn rearm_replaces_and_cancel_silences() {
        let (tx, mut rx) = mpsc::channel(4);
        let watchdog = StatusWatchdog::new(2, tx);

        watchdog.arm_after(1, 1, Duration::from_secs(10));
        watchdog.arm_after(1, 2, Duration::from_secs(30));
        watchdog.arm_after(2, 3, Duration::from_secs(20));
        watchdog.cancel(2);

        let started = tokio::time::Instant::now();
        match rx.recv().await {
            Some(EngineEvent::WatchdogFired { task_id, run_id }) => {
                assert_eq!((task_id, run_id), (1, 2));
            }
            other => panic!("unexpected event: {other:?}"),
        }
        let waited = started.elapsed();
        assert!(waited >= Duration::from_secs(30) && waited < Duration::from_secs(31));

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert!(rx.try_recv().is_err());
    }
}
