// tests/console_commands.rs

mod common;
use crate::common::{EngineHarness, SettingsBuilder, init_tracing};

use std::sync::Arc;
use std::time::Duration;

use runwarden::console::{ConsoleCommand, Reply, execute, parse_line, run_console};
use runwarden::engine::EngineEvent;
use runwarden::errors::RunwardenError;
use runwarden::types::TaskStatus;

fn harness() -> EngineHarness {
    init_tracing();
    EngineHarness::new(SettingsBuilder::new().build())
}

async fn send(h: &EngineHarness, line: &str) -> runwarden::errors::Result<Reply> {
    let command = parse_line(line)?.expect("blank line");
    execute(&h.orchestrator, command, &h.events_tx).await
}

fn lines(reply: Reply) -> Vec<String> {
    match reply {
        Reply::Lines(lines) => lines,
        Reply::Quit(lines) => panic!("unexpected quit: {lines:?}"),
    }
}

fn saw_shutdown(h: &mut EngineHarness) -> bool {
    let rx = h.events_rx.as_mut().unwrap();
    let mut seen = false;
    while let Ok(event) = rx.try_recv() {
        seen |= matches!(event, EngineEvent::ShutdownRequested);
    }
    seen
}

#[tokio::test(start_paused = true)]
async fn add_edit_and_list_go_through_the_engine() {
    let h = harness();
    h.add_executable("/opt/jobs/build.sh");

    let out = lines(
        send(&h, r#"add --name "Nightly build" --path /opt/jobs/build.sh --interval 5"#)
            .await
            .unwrap(),
    );
    assert_eq!(out[0], "added task 1");
    assert_eq!(h.orchestrator.scheduler().scheduled_ids(), vec![1]);

    lines(send(&h, "edit 1 --interval 10").await.unwrap());
    let stored = h.orchestrator.store().get(1).unwrap();
    assert_eq!(stored.name, "Nightly build");
    assert_eq!(stored.interval, 10);
    assert_eq!(
        h.orchestrator.scheduler().period_of(1),
        Some(Duration::from_secs(600))
    );

    let listed = lines(send(&h, "list").await.unwrap());
    assert_eq!(listed.len(), 1);
    assert!(listed[0].contains("Nightly build"));
    assert!(listed[0].contains("every    10 min"));
}

#[tokio::test(start_paused = true)]
async fn command_errors_come_back_as_errors() {
    let h = harness();

    assert!(matches!(
        send(&h, "run 42").await,
        Err(RunwardenError::TaskNotFound(42))
    ));
    assert!(matches!(
        send(&h, "add --name Missing --path /nowhere.sh --interval 5").await,
        Err(RunwardenError::NotFound(_))
    ));
    assert!(h.orchestrator.store().list().is_empty());
}

#[tokio::test(start_paused = true)]
async fn run_stop_and_pause_drive_the_orchestrator() {
    let h = harness();
    h.add_executable("/opt/jobs/build.sh");
    lines(send(&h, "add --name Build --path /opt/jobs/build.sh --interval 5").await.unwrap());

    let out = lines(send(&h, "run 1").await.unwrap());
    assert!(out[0].starts_with("task 1 started"), "{out:?}");
    assert_eq!(h.executor.launch_count(), 1);

    let out = lines(send(&h, "run 1").await.unwrap());
    assert_eq!(out, vec!["task 1 skipped: executable already running"]);

    let out = lines(send(&h, "stop 1").await.unwrap());
    assert_eq!(out, vec!["task 1 terminated"]);

    lines(send(&h, "pause").await.unwrap());
    assert!(h.orchestrator.is_paused());
    let out = lines(send(&h, "toggle").await.unwrap());
    assert_eq!(out, vec!["scheduler running"]);
    assert!(!h.orchestrator.is_paused());
}

#[tokio::test(start_paused = true)]
async fn quit_asks_for_force_while_tasks_run() {
    let mut h = harness();
    h.add_executable("/opt/jobs/build.sh");
    lines(send(&h, "add --name Build --path /opt/jobs/build.sh --interval 5").await.unwrap());
    lines(send(&h, "run 1").await.unwrap());

    let out = lines(send(&h, "quit").await.unwrap());
    assert_eq!(out[0], "1 task(s) still running:");
    assert!(out.iter().any(|l| l.contains("quit --force")));
    assert!(!saw_shutdown(&mut h));

    let reply = send(&h, "quit --force").await.unwrap();
    assert_eq!(reply, Reply::Quit(vec!["shutting down".to_string()]));
    assert!(saw_shutdown(&mut h));
}

#[tokio::test(start_paused = true)]
async fn console_loop_reads_until_quit() {
    let mut h = harness();
    h.add_executable("/opt/jobs/backup.sh");

    let input: &[u8] = b"\n\
        add --name \"Nightly backup\" --path /opt/jobs/backup.sh --interval 30\n\
        explode\n\
        quit\n\
        delete 1\n";
    run_console(Arc::clone(&h.orchestrator), input, h.events_tx.clone()).await;

    let tasks = h.orchestrator.store().list();
    assert_eq!(tasks.len(), 1, "lines after quit must not run");
    assert_eq!(tasks[0].name, "Nightly backup");
    assert_eq!(tasks[0].status, TaskStatus::Idle);
    assert!(saw_shutdown(&mut h));
}

#[test]
fn parse_keeps_optional_edit_fields_empty() {
    assert_eq!(
        parse_line("edit 3 --name Renamed").unwrap(),
        Some(ConsoleCommand::Edit {
            id: 3,
            name: Some("Renamed".to_string()),
            path: None,
            interval: None,
        })
    );
}
