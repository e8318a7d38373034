// src/scheduler/mod.rs

//! Fixed-interval task scheduler.
//!
//! One recurring timer per task id, each emitting
//! [`EngineEvent::Tick`] into the engine channel. The scheduler only knows
//! `(task_id, interval)`; the orchestrator looks the task up again on every
//! tick, so edits are picked up by the next run.
//!
//! Pause/resume is global and keeps registrations. After
//! [`TaskScheduler::shutdown`] the scheduler refuses new registrations.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::engine::EngineEvent;
use crate::errors::{Result, RunwardenError};
use crate::types::{TaskId, minutes};

mod timer;

#[derive(Debug)]
struct ScheduledJob {
    period: Duration,
    handle: JoinHandle<()>,
}

#[derive(Debug)]
pub struct TaskScheduler {
    events: mpsc::Sender<EngineEvent>,
    paused: watch::Sender<bool>,
    jobs: Mutex<HashMap<TaskId, ScheduledJob>>,
    stopped: AtomicBool,
}

impl TaskScheduler {
    pub fn new(events: mpsc::Sender<EngineEvent>) -> Self {
        let (paused, _) = watch::channel(false);
        Self {
            events,
            paused,
            jobs: Mutex::new(HashMap::new()),
            stopped: AtomicBool::new(false),
        }
    }

    /// Install or replace the timer for `task_id`.
    pub fn schedule(&self, task_id: TaskId, interval_minutes: u32) -> Result<()> {
        if interval_minutes == 0 {
            return Err(RunwardenError::InvalidArgument(
                "interval must be at least one minute".to_string(),
            ));
        }
        self.schedule_every(task_id, minutes(interval_minutes))
    }

    /// Like [`schedule`](Self::schedule) with an arbitrary period.
    pub fn schedule_every(&self, task_id: TaskId, period: Duration) -> Result<()> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(RunwardenError::SchedulerUnavailable(
                "scheduler has been shut down".to_string(),
            ));
        }
        if period.is_zero() {
            return Err(RunwardenError::InvalidArgument(
                "period must be non-zero".to_string(),
            ));
        }

        let handle = tokio::spawn(timer::run_timer(
            task_id,
            period,
            self.paused.subscribe(),
            self.events.clone(),
        ));

        let previous = self.lock().insert(task_id, ScheduledJob { period, handle });
        if let Some(previous) = previous {
            previous.handle.abort();
            debug!(task_id, ?period, "task rescheduled");
        } else {
            debug!(task_id, ?period, "task scheduled");
        }
        Ok(())
    }

    /// Remove the timer for `task_id`. Returns whether one existed.
    pub fn unschedule(&self, task_id: TaskId) -> bool {
        match self.lock().remove(&task_id) {
            Some(job) => {
                job.handle.abort();
                debug!(task_id, "task unscheduled");
                true
            }
            None => false,
        }
    }

    pub fn pause_all(&self) {
        if !self.paused.send_replace(true) {
            info!("scheduler paused");
        }
    }

    pub fn resume_all(&self) {
        if self.paused.send_replace(false) {
            info!("scheduler resumed");
        }
    }

    pub fn is_paused(&self) -> bool {
        *self.paused.borrow()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub fn scheduled_ids(&self) -> Vec<TaskId> {
        let mut ids: Vec<TaskId> = self.lock().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn period_of(&self, task_id: TaskId) -> Option<Duration> {
        self.lock().get(&task_id).map(|job| job.period)
    }

    /// Abort every timer and refuse further registrations.
    pub fn shutdown(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        let jobs: Vec<ScheduledJob> = self.lock().drain().map(|(_, job)| job).collect();
        for job in &jobs {
            job.handle.abort();
        }
        info!(aborted = jobs.len(), "scheduler stopped");
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<TaskId, ScheduledJob>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for TaskScheduler {
    fn drop(&mut self) {
        for (_, job) in self.lock().drain() {
            job.handle.abort();
        }
    }
}
