// tests/end_to_end.rs
#![cfg(unix)]

mod common;
use crate::common::{init_tracing, with_timeout};
use crate::common::scripts::{spawn_lock, write_script};

use std::sync::Arc;

use tokio::sync::mpsc;

use runwarden::EVENT_CHANNEL_CAPACITY;
use runwarden::config::{ConfigStore, EngineSettings};
use runwarden::engine::{EngineEvent, Orchestrator, RunOutcome, ShutdownOutcome, UiEvent};
use runwarden::exec::{ProcessSupervisor, SupervisorOptions};
use runwarden::fs::{FileSystem, RealFileSystem};
use runwarden::store::TaskStore;
use runwarden::types::{TaskDraft, TaskStatus};

async fn next_ui(rx: &mut mpsc::UnboundedReceiver<UiEvent>) -> UiEvent {
    with_timeout(rx.recv()).await.expect("UI channel closed")
}

async fn collect_until<F>(rx: &mut mpsc::UnboundedReceiver<UiEvent>, mut done: F) -> Vec<UiEvent>
where
    F: FnMut(&UiEvent) -> bool,
{
    let mut seen = Vec::new();
    loop {
        let event = next_ui(rx).await;
        let stop = done(&event);
        seen.push(event);
        if stop {
            return seen;
        }
    }
}

#[tokio::test]
async fn scheduled_script_runs_to_completion_and_shuts_down_cleanly() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let fs: Arc<dyn FileSystem> = Arc::new(RealFileSystem);
    let store_path = dir.path().join("tasks.toml");

    let config = Arc::new(ConfigStore::load(
        Arc::clone(&fs),
        dir.path().join("runwarden.toml"),
    ));
    let store = Arc::new(TaskStore::open(Arc::clone(&fs), &store_path));

    let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let (ui_tx, mut ui_rx) = mpsc::unbounded_channel();
    let supervisor = ProcessSupervisor::new(
        events_tx.clone(),
        SupervisorOptions::from_settings(&EngineSettings::default()),
    );
    let orchestrator = Arc::new(Orchestrator::new(
        store,
        config,
        Arc::clone(&fs),
        supervisor,
        events_tx.clone(),
        ui_tx,
    ));

    orchestrator.start();
    let marker = dir.path().join("tasks.toml.running");
    assert!(marker.exists());

    let task = {
        let _guard = spawn_lock();
        let script = write_script(dir.path(), "build.sh", "echo building\nexit 0");
        orchestrator
            .add_task(TaskDraft::new("Build", script, 5))
            .unwrap()
    };
    let engine = tokio::spawn(Arc::clone(&orchestrator).run(events_rx));

    // Stand in for the five-minute timer.
    events_tx
        .send(EngineEvent::Tick { task_id: task.id })
        .await
        .unwrap();

    let events = collect_until(&mut ui_rx, |e| {
        matches!(
            e,
            UiEvent::StatusChanged { status: TaskStatus::Idle, last_run: Some(_), .. }
        )
    })
    .await;

    assert!(events.iter().any(|e| matches!(
        e,
        UiEvent::StatusChanged { status: TaskStatus::Running, .. }
    )));
    let lines: Vec<&str> = events
        .iter()
        .filter_map(|e| match e {
            UiEvent::LogLine { line, .. } => Some(line.as_str()),
            _ => None,
        })
        .collect();
    assert!(lines.iter().any(|l| l.ends_with("Process started")));
    assert!(lines.contains(&"building"));
    assert!(lines.contains(&"[+] Process completed (Exit code: 0)"));
    assert!(events.iter().any(|e| matches!(
        e,
        UiEvent::RunFinished { outcome: RunOutcome::Exited(Some(0)), .. }
    )));

    let stored = orchestrator.store().get(task.id).unwrap();
    assert_eq!(stored.status, TaskStatus::Idle);
    assert!(stored.last_run.is_some());

    assert_eq!(
        orchestrator.shutdown(true).await.unwrap(),
        ShutdownOutcome::Completed { terminated: 0 }
    );
    assert!(!marker.exists());

    events_tx.send(EngineEvent::ShutdownRequested).await.unwrap();
    with_timeout(engine).await.unwrap();
}

#[tokio::test]
async fn shutdown_terminates_a_running_script() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let fs: Arc<dyn FileSystem> = Arc::new(RealFileSystem);

    let config = Arc::new(ConfigStore::load(
        Arc::clone(&fs),
        dir.path().join("runwarden.toml"),
    ));
    let store = Arc::new(TaskStore::open(Arc::clone(&fs), dir.path().join("tasks.toml")));
    let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let (ui_tx, mut ui_rx) = mpsc::unbounded_channel();
    let mut settings = EngineSettings::default();
    settings.grace_period_ms = 500;
    let supervisor =
        ProcessSupervisor::new(events_tx.clone(), SupervisorOptions::from_settings(&settings));
    let orchestrator = Arc::new(Orchestrator::new(
        store,
        config,
        fs,
        supervisor,
        events_tx.clone(),
        ui_tx,
    ));
    orchestrator.start();

    let task = {
        let _guard = spawn_lock();
        let script = write_script(dir.path(), "serve.sh", "echo up\nsleep 60");
        let task = orchestrator
            .add_task(TaskDraft::new("Serve", script, 10))
            .unwrap();
        orchestrator.execute_now(task.id).await.unwrap();
        task
    };
    let engine = tokio::spawn(Arc::clone(&orchestrator).run(events_rx));

    collect_until(&mut ui_rx, |e| matches!(e, UiEvent::LogLine { line, .. } if line == "up")).await;

    match orchestrator.shutdown(false).await.unwrap() {
        ShutdownOutcome::NeedsConfirmation(tasks) => assert_eq!(tasks[0].id, task.id),
        other => panic!("expected confirmation request, got {other:?}"),
    }
    assert_eq!(
        orchestrator.shutdown(true).await.unwrap(),
        ShutdownOutcome::Completed { terminated: 1 }
    );
    assert!(orchestrator.running_tasks().is_empty());
    assert_eq!(
        orchestrator.store().get(task.id).unwrap().status,
        TaskStatus::Idle
    );

    events_tx.send(EngineEvent::ShutdownRequested).await.unwrap();
    with_timeout(engine).await.unwrap();
}
