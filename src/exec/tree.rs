// src/exec/tree.rs

//! Process tree teardown.
//!
//! Descendants are found by walking parent links in a `sysinfo` process
//! snapshot. Termination is two-phase: a graceful terminate signal to every
//! child and then the parent, a grace period, then a hard kill for anything
//! still alive. Only a root process that survives the hard kill is an error.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Duration;

use sysinfo::{Pid, Process, ProcessRefreshKind, ProcessStatus, ProcessesToUpdate, Signal, System};
use tokio::process::Child;
use tokio::time::{Instant, sleep, timeout};
use tracing::{debug, warn};

use crate::errors::{Result, RunwardenError};
use crate::exec::TerminateOutcome;

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const KILL_CONFIRM_TIMEOUT: Duration = Duration::from_secs(3);

/// Terminate `child` and every descendant it has spawned.
pub async fn terminate_tree(
    child: &mut Child,
    path: &Path,
    grace: Duration,
) -> Result<TerminateOutcome> {
    if let Ok(Some(_)) = child.try_wait() {
        return Ok(TerminateOutcome::AlreadyExited);
    }
    let Some(raw_pid) = child.id() else {
        return Ok(TerminateOutcome::AlreadyExited);
    };
    let root = Pid::from_u32(raw_pid);

    let mut system = System::new();
    refresh_all(&mut system);
    let descendants = descendants_of(&system, root);
    debug!(pid = raw_pid, descendants = descendants.len(), "terminating process tree");

    for pid in &descendants {
        if let Some(process) = system.process(*pid) {
            request_terminate(process);
        }
    }
    match system.process(root) {
        Some(process) => request_terminate(process),
        None => {
            let _ = child.start_kill();
        }
    }

    let deadline = Instant::now() + grace;
    let root_exited = matches!(timeout(grace, child.wait()).await, Ok(Ok(_)));

    let mut survivors = alive(&mut system, &descendants);
    while !survivors.is_empty() && Instant::now() < deadline {
        sleep(POLL_INTERVAL).await;
        survivors = alive(&mut system, &survivors);
    }

    let mut forced = false;
    for pid in &survivors {
        if let Some(process) = system.process(*pid) {
            debug!(pid = pid.as_u32(), "descendant outlived grace period; killing");
            if !process.kill() {
                warn!(pid = pid.as_u32(), "failed to kill descendant");
            }
            forced = true;
        }
    }

    if !root_exited {
        forced = true;
        if let Err(e) = child.start_kill() {
            debug!(pid = raw_pid, error = %e, "kill after grace period failed");
        }
        match timeout(KILL_CONFIRM_TIMEOUT, child.wait()).await {
            Ok(Ok(_)) => {}
            _ => {
                return Err(RunwardenError::TerminationFailure {
                    path: path.to_path_buf(),
                    pid: raw_pid,
                });
            }
        }
    }

    Ok(if forced {
        TerminateOutcome::Killed
    } else {
        TerminateOutcome::Terminated
    })
}

/// All transitive children of `root`, children before grandchildren.
pub fn descendants_of(system: &System, root: Pid) -> Vec<Pid> {
    let mut children: HashMap<Pid, Vec<Pid>> = HashMap::new();
    for (pid, process) in system.processes() {
        if process.thread_kind().is_some() {
            continue;
        }
        if let Some(parent) = process.parent() {
            children.entry(parent).or_default().push(*pid);
        }
    }

    let mut seen = HashSet::from([root]);
    let mut order = Vec::new();
    let mut frontier = vec![root];
    while let Some(next) = frontier.pop() {
        for child in children.get(&next).into_iter().flatten() {
            if seen.insert(*child) {
                order.push(*child);
                frontier.push(*child);
            }
        }
    }
    order
}

/// Whether `pid` names a live (non-zombie) process, after a fresh refresh.
pub fn is_alive(pid: u32) -> bool {
    let mut system = System::new();
    let pid = Pid::from_u32(pid);
    !alive(&mut system, &[pid]).is_empty()
}

fn refresh_all(system: &mut System) {
    system.refresh_processes_specifics(ProcessesToUpdate::All, true, ProcessRefreshKind::new());
}

fn alive(system: &mut System, pids: &[Pid]) -> Vec<Pid> {
    if pids.is_empty() {
        return Vec::new();
    }
    system.refresh_processes_specifics(ProcessesToUpdate::Some(pids), true, ProcessRefreshKind::new());
    pids.iter()
        .copied()
        .filter(|pid| {
            system
                .process(*pid)
                .is_some_and(|p| p.status() != ProcessStatus::Zombie)
        })
        .collect()
}

fn request_terminate(process: &Process) {
    match process.kill_with(Signal::Term) {
        Some(true) => {}
        Some(false) => debug!(pid = process.pid().as_u32(), "terminate signal not delivered"),
        // No graceful signal on this platform; the grace period still
        // applies before the hard kill.
        None => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_process_is_alive_and_has_no_descendants_loop() {
        let me = std::process::id();
        assert!(is_alive(me));

        let mut system = System::new();
        refresh_all(&mut system);
        let descendants = descendants_of(&system, Pid::from_u32(me));
        assert!(!descendants.contains(&Pid::from_u32(me)));
    }
}
