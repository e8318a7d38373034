// tests/supervisor_processes.rs
#![cfg(unix)]

mod common;
use crate::common::init_tracing;
use crate::common::scripts::{spawn_lock, write_script};

use std::path::PathBuf;
use std::time::Duration;

use regex::Regex;
use tokio::sync::mpsc;
use tokio::time::timeout;

use runwarden::engine::{EngineEvent, RunEvent, RunOutcome};
use runwarden::exec::tree::is_alive;
use runwarden::exec::{
    LaunchError, LaunchOutcome, LaunchRequest, ProcessSupervisor, RunInfo, SupervisorOptions,
    TerminateOutcome,
};

fn supervisor() -> (ProcessSupervisor, mpsc::Receiver<EngineEvent>) {
    supervisor_with(SupervisorOptions {
        grace_period: Duration::from_millis(500),
        heartbeat_every: Duration::from_secs(10),
        heartbeat_patterns: Vec::new(),
    })
}

fn supervisor_with(options: SupervisorOptions) -> (ProcessSupervisor, mpsc::Receiver<EngineEvent>) {
    let (tx, rx) = mpsc::channel(256);
    (ProcessSupervisor::new(tx, options), rx)
}

fn request(task_id: u64, path: &PathBuf) -> LaunchRequest {
    LaunchRequest {
        task_id,
        path: path.clone(),
        capture_output: true,
    }
}

fn started(outcome: LaunchOutcome) -> RunInfo {
    match outcome {
        LaunchOutcome::Started(run) => run,
        other => panic!("expected Started, got {other:?}"),
    }
}

/// Every event of `run_id` up to and including its completion.
async fn collect_run(rx: &mut mpsc::Receiver<EngineEvent>, run_id: u64) -> (Vec<RunEvent>, RunOutcome) {
    let mut seen = Vec::new();
    loop {
        let event = timeout(Duration::from_secs(15), rx.recv())
            .await
            .expect("timed out waiting for run events")
            .expect("event channel closed");
        let EngineEvent::Run(event) = event else {
            continue;
        };
        match event {
            RunEvent::Completed {
                run_id: id,
                outcome,
                ..
            } if id == run_id => return (seen, outcome),
            other => seen.push(other),
        }
    }
}

fn lines_of(events: &[RunEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|ev| match ev {
            RunEvent::LineCaptured { line, .. } => Some(line.clone()),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn captures_both_streams_and_exit_code() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let (sup, mut rx) = supervisor();

    let run = {
        let _guard = spawn_lock();
        let script = write_script(dir.path(), "report.sh", "echo hello\necho oops 1>&2\nexit 3");
        started(sup.launch(request(1, &script)))
    };
    assert!(run.pid.is_some());

    let (events, outcome) = collect_run(&mut rx, run.run_id).await;
    let mut lines = lines_of(&events);
    lines.sort();
    assert_eq!(lines, vec!["hello".to_string(), "oops".to_string()]);
    assert_eq!(outcome, RunOutcome::Exited(Some(3)));
    assert!(sup.running().is_empty());
}

#[tokio::test]
async fn working_directory_is_the_script_directory() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let (sup, mut rx) = supervisor();

    let run = {
        let _guard = spawn_lock();
        let script = write_script(dir.path(), "where.sh", "pwd");
        started(sup.launch(request(1, &script)))
    };

    let (events, _) = collect_run(&mut rx, run.run_id).await;
    let reported = PathBuf::from(&lines_of(&events)[0]);
    assert_eq!(
        reported.canonicalize().unwrap(),
        dir.path().canonicalize().unwrap()
    );
}

#[tokio::test]
async fn chatty_child_does_not_deadlock() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let (sup, mut rx) = supervisor();

    let run = {
        let _guard = spawn_lock();
        let script = write_script(
            dir.path(),
            "flood.sh",
            "i=0\nwhile [ $i -lt 3000 ]; do\n  echo \"out $i\"\n  echo \"err $i\" 1>&2\n  i=$((i+1))\ndone",
        );
        started(sup.launch(request(1, &script)))
    };

    let (events, outcome) = collect_run(&mut rx, run.run_id).await;
    assert_eq!(lines_of(&events).len(), 6000);
    assert_eq!(outcome, RunOutcome::Exited(Some(0)));
}

#[tokio::test]
async fn second_launch_of_same_path_is_skipped() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let (sup, mut rx) = supervisor();

    let (first, script) = {
        let _guard = spawn_lock();
        let script = write_script(dir.path(), "long.sh", "echo started\nsleep 30");
        (started(sup.launch(request(1, &script))), script)
    };

    // Different task, same executable, spelled differently.
    let dotted = dir.path().join(".").join("long.sh");
    assert_eq!(sup.launch(request(2, &dotted)), LaunchOutcome::AlreadySkipped);

    let running = sup.running();
    assert_eq!(running.len(), 1);
    assert_eq!(running[0].task_id, 1);
    assert_eq!(running[0].run_id, first.run_id);

    let outcome = sup.force_terminate(&script).await.unwrap();
    assert!(matches!(
        outcome,
        TerminateOutcome::Terminated | TerminateOutcome::Killed
    ));
    assert_eq!(
        sup.force_terminate(&script).await.unwrap(),
        TerminateOutcome::NotTracked
    );

    let (events, outcome) = collect_run(&mut rx, first.run_id).await;
    assert_eq!(outcome, RunOutcome::Terminated);
    assert!(events.iter().all(|ev| match ev {
        RunEvent::LineCaptured { task_id, .. } => *task_id == 1,
        _ => true,
    }));
    assert!(sup.running().is_empty());
}

#[tokio::test]
async fn force_terminate_kills_descendants() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let (sup, mut rx) = supervisor();

    let (run, script) = {
        let _guard = spawn_lock();
        let script = write_script(dir.path(), "spawner.sh", "sleep 30 &\necho $!\nwait");
        (started(sup.launch(request(1, &script))), script)
    };

    let child_pid: u32 = loop {
        match timeout(Duration::from_secs(10), rx.recv()).await {
            Ok(Some(EngineEvent::Run(RunEvent::LineCaptured { line, .. }))) => {
                break line.trim().parse().unwrap();
            }
            Ok(Some(_)) => continue,
            other => panic!("no pid line: {other:?}"),
        }
    };
    assert!(is_alive(child_pid));

    let outcome = sup.force_terminate(&script).await.unwrap();
    assert!(matches!(
        outcome,
        TerminateOutcome::Terminated | TerminateOutcome::Killed
    ));

    let (_, completion) = collect_run(&mut rx, run.run_id).await;
    assert_eq!(completion, RunOutcome::Terminated);

    let mut gone = false;
    for _ in 0..30 {
        if !is_alive(child_pid) {
            gone = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert!(gone, "descendant {child_pid} survived tree termination");
}

#[tokio::test]
async fn terminate_all_clears_every_run() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let (sup, _rx) = supervisor();

    {
        let _guard = spawn_lock();
        let a = write_script(dir.path(), "a.sh", "sleep 30");
        let b = write_script(dir.path(), "b.sh", "sleep 30");
        started(sup.launch(request(1, &a)));
        started(sup.launch(request(2, &b)));
    }
    assert_eq!(sup.running().len(), 2);

    let results = sup.terminate_all().await;
    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|(_, r)| r.is_ok()));
    assert!(sup.running().is_empty());
}

#[tokio::test]
async fn missing_and_empty_paths_fail_fast() {
    let dir = tempfile::tempdir().unwrap();
    let (sup, _rx) = supervisor();

    let missing = dir.path().join("nope.sh");
    assert_eq!(
        sup.launch(request(1, &missing)),
        LaunchOutcome::Failed(LaunchError::NotFound(missing.clone()))
    );
    assert_eq!(
        sup.launch(request(1, &PathBuf::new())),
        LaunchOutcome::Failed(LaunchError::InvalidPath)
    );
    assert!(sup.running().is_empty());
}

#[tokio::test]
async fn matching_paths_get_heartbeats() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let (sup, mut rx) = supervisor_with(SupervisorOptions {
        grace_period: Duration::from_millis(500),
        heartbeat_every: Duration::from_secs(1),
        heartbeat_patterns: vec![Regex::new("(?i)pdf").unwrap()],
    });

    let run = {
        let _guard = spawn_lock();
        let script = write_script(dir.path(), "make_PDF.sh", "sleep 3");
        started(sup.launch(request(1, &script)))
    };
    assert!(run.heartbeat);

    let (events, outcome) = collect_run(&mut rx, run.run_id).await;
    assert_eq!(outcome, RunOutcome::Exited(Some(0)));
    let beats = events
        .iter()
        .filter(|ev| matches!(ev, RunEvent::Heartbeat { .. }))
        .count();
    assert!(beats >= 1, "expected heartbeats, got {events:?}");
}

#[tokio::test]
async fn non_capture_runs_are_still_monitored() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let (sup, mut rx) = supervisor();

    let run = {
        let _guard = spawn_lock();
        let script = write_script(dir.path(), "quiet.sh", "exit 0");
        started(sup.launch(LaunchRequest {
            task_id: 4,
            path: script,
            capture_output: false,
        }))
    };
    assert!(!run.capture_output);
    assert!(!run.heartbeat);

    let (events, outcome) = collect_run(&mut rx, run.run_id).await;
    assert!(lines_of(&events).is_empty());
    assert_eq!(outcome, RunOutcome::Exited(Some(0)));
}

#[tokio::test]
async fn terminate_all_returns_while_event_channel_is_full() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let (tx, mut rx) = mpsc::channel(1);
    tx.send(EngineEvent::ShutdownRequested).await.unwrap();
    let sup = ProcessSupervisor::new(
        tx,
        SupervisorOptions {
            grace_period: Duration::from_millis(500),
            heartbeat_every: Duration::from_secs(10),
            heartbeat_patterns: Vec::new(),
        },
    );

    {
        let _guard = spawn_lock();
        let quick = write_script(dir.path(), "quick.sh", "exit 0");
        let slow = write_script(dir.path(), "slow.sh", "sleep 30");
        started(sup.launch(LaunchRequest {
            task_id: 1,
            path: quick,
            capture_output: false,
        }));
        started(sup.launch(LaunchRequest {
            task_id: 2,
            path: slow,
            capture_output: false,
        }));
    }
    // Let the quick run exit and block on the full channel.
    tokio::time::sleep(Duration::from_millis(500)).await;

    let results = timeout(Duration::from_secs(10), sup.terminate_all())
        .await
        .expect("terminate_all hung behind a full event channel");
    assert!(!results.is_empty());
    assert!(results.iter().all(|(_, r)| r.is_ok()));
    assert!(sup.running().is_empty());

    // Both completions are still delivered once the engine drains.
    let mut completed = 0;
    while completed < 2 {
        match timeout(Duration::from_secs(10), rx.recv()).await.unwrap() {
            Some(EngineEvent::Run(RunEvent::Completed { .. })) => completed += 1,
            Some(_) => {}
            None => panic!("event channel closed"),
        }
    }
}
