// src/lib.rs

pub mod classify;
pub mod cli;
pub mod config;
pub mod console;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod fs;
pub mod logging;
pub mod recovery;
pub mod scheduler;
pub mod store;
pub mod types;
pub mod watchdog;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use tokio::io::BufReader;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::cli::{CliArgs, Command};
use crate::config::{ConfigStore, ensure_executable_exists};
use crate::engine::{EngineEvent, Orchestrator, RunEvent, RunOutcome, UiEvent};
use crate::exec::{LaunchOutcome, LaunchRequest, ProcessSupervisor, SupervisorOptions};
use crate::fs::{FileSystem, RealFileSystem};
use crate::recovery::{CrashRecovery, RecoveryState};
use crate::store::TaskStore;
use crate::types::{Task, TaskDraft};

/// Capacity of the engine event channel. Output readers wait when it is
/// full, which throttles a flooding child instead of growing memory.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// High-level entry point used by `main.rs`. Returns the process exit code.
pub async fn run(args: CliArgs) -> Result<i32> {
    let fs: Arc<dyn FileSystem> = Arc::new(RealFileSystem);

    match args.command() {
        Command::Serve { paused } => serve(fs, &args, paused).await.map(|()| 0),
        Command::Add {
            name,
            path,
            interval,
        } => {
            CrashRecovery::for_store(Arc::clone(&fs), &args.store).ensure_released()?;
            let config = ConfigStore::load(Arc::clone(&fs), &args.config);
            let store = TaskStore::open(Arc::clone(&fs), &args.store);
            ensure_executable_exists(fs.as_ref(), &path)?;
            let task = store.add(TaskDraft::new(name, path, interval))?;
            config
                .set_last_selected_path(&task.path)
                .context("saving last selected path")?;
            println!("added task {}", task.id);
            print_task(&task);
            Ok(0)
        }
        Command::Edit {
            id,
            name,
            path,
            interval,
        } => {
            CrashRecovery::for_store(Arc::clone(&fs), &args.store).ensure_released()?;
            let config = ConfigStore::load(Arc::clone(&fs), &args.config);
            let store = TaskStore::open(Arc::clone(&fs), &args.store);
            let current = store
                .get(id)
                .ok_or(errors::RunwardenError::TaskNotFound(id))?;
            let draft = TaskDraft::new(
                name.unwrap_or(current.name),
                path.unwrap_or(current.path),
                interval.unwrap_or(i64::from(current.interval)),
            );
            ensure_executable_exists(fs.as_ref(), &draft.path)?;
            let task = store.update(id, draft)?;
            config
                .set_last_selected_path(&task.path)
                .context("saving last selected path")?;
            print_task(&task);
            Ok(0)
        }
        Command::Delete { id } => {
            CrashRecovery::for_store(Arc::clone(&fs), &args.store).ensure_released()?;
            let store = TaskStore::open(fs, &args.store);
            let task = store.delete(id)?;
            println!("deleted task {} ({})", task.id, task.name);
            Ok(0)
        }
        Command::List => {
            let store = TaskStore::open(fs, &args.store);
            let tasks = store.list();
            if tasks.is_empty() {
                println!("no tasks in {}", args.store.display());
            }
            for task in &tasks {
                print_task(task);
            }
            Ok(0)
        }
        Command::Run { id } => {
            let config = ConfigStore::load(Arc::clone(&fs), &args.config);
            let store = TaskStore::open(fs, &args.store);
            let task = store
                .get(id)
                .ok_or(errors::RunwardenError::TaskNotFound(id))?;
            run_foreground(&task, SupervisorOptions::from_settings(&config.settings())).await
        }
        Command::Classify { path } => {
            ensure_executable_exists(fs.as_ref(), &path)?;
            println!("{}: {}", path.display(), classify::classify(&path));
            Ok(0)
        }
    }
}

/// Run the engine until Ctrl-C or a console `quit`. Ctrl-C counts as
/// confirmation: running processes are terminated. Task edits made while
/// serving go through the console on stdin.
async fn serve(fs: Arc<dyn FileSystem>, args: &CliArgs, paused: bool) -> Result<()> {
    let config = Arc::new(ConfigStore::load(Arc::clone(&fs), &args.config));
    let store = Arc::new(TaskStore::open(Arc::clone(&fs), &args.store));
    let settings = config.settings();

    let (events_tx, events_rx) = mpsc::channel::<EngineEvent>(EVENT_CHANNEL_CAPACITY);
    let (ui_tx, ui_rx) = mpsc::unbounded_channel::<UiEvent>();

    let supervisor = ProcessSupervisor::new(
        events_tx.clone(),
        SupervisorOptions::from_settings(&settings),
    );
    let orchestrator = Arc::new(Orchestrator::new(
        store,
        config,
        fs,
        supervisor,
        events_tx.clone(),
        ui_tx,
    ));

    let printer = tokio::spawn(print_ui_events(ui_rx));

    let report = orchestrator.start();
    if report.state == RecoveryState::Recovering {
        info!(orphaned = report.orphaned.len(), "recovered from unclean shutdown");
    }
    if paused {
        orchestrator.pause_all();
    }

    // Ctrl-C → confirmed shutdown.
    {
        let tx = events_tx.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                eprintln!("failed to listen for Ctrl+C: {e}");
                return;
            }
            let _ = tx.send(EngineEvent::ShutdownRequested).await;
        });
    }
    tokio::spawn(console::run_console(
        Arc::clone(&orchestrator),
        BufReader::new(tokio::io::stdin()),
        events_tx.clone(),
    ));
    drop(events_tx);

    Arc::clone(&orchestrator).run(events_rx).await;
    drop(orchestrator);

    if tokio::time::timeout(Duration::from_secs(2), printer)
        .await
        .is_err()
    {
        debug!("ui printer did not drain in time");
    }
    Ok(())
}

/// Launch one task through the supervisor, relay its output to stdout and
/// return its exit code. The task store is not touched.
async fn run_foreground(task: &Task, options: SupervisorOptions) -> Result<i32> {
    let capture = classify::classify_file(task.path.clone()).await.needs_capture();
    let (events_tx, mut events_rx) = mpsc::channel::<EngineEvent>(EVENT_CHANNEL_CAPACITY);
    let supervisor = ProcessSupervisor::new(events_tx, options);

    let run = match supervisor.launch(LaunchRequest {
        task_id: task.id,
        path: task.path.clone(),
        capture_output: capture,
    }) {
        LaunchOutcome::Started(run) => run,
        LaunchOutcome::AlreadySkipped => bail!("{} is already running", task.path.display()),
        LaunchOutcome::Failed(err) => return Err(errors::RunwardenError::from(err).into()),
    };
    info!(task_id = task.id, pid = ?run.pid, capture, "foreground run started");

    while let Some(event) = events_rx.recv().await {
        match event {
            EngineEvent::Run(RunEvent::LineCaptured { line, .. }) => println!("{line}"),
            EngineEvent::Run(RunEvent::Heartbeat { elapsed, .. }) => {
                eprintln!("... still running ({}s elapsed)", elapsed.as_secs());
            }
            EngineEvent::Run(RunEvent::StreamFailed { error, .. }) => {
                eprintln!("output stream failed: {error}");
            }
            EngineEvent::Run(RunEvent::Completed { outcome, .. }) => {
                return Ok(exit_code_of(&outcome));
            }
            _ => {}
        }
    }
    bail!("supervisor stopped before the run completed")
}

fn exit_code_of(outcome: &RunOutcome) -> i32 {
    match outcome {
        RunOutcome::Exited(Some(code)) => *code,
        _ => 1,
    }
}

/// Presentation stand-in: one stdout line per UI event.
async fn print_ui_events(mut rx: mpsc::UnboundedReceiver<UiEvent>) {
    while let Some(event) = rx.recv().await {
        match event {
            UiEvent::StatusChanged {
                task_id,
                status,
                last_run,
            } => match last_run {
                Some(at) => println!("[task {task_id}] status {status} (last run {at})"),
                None => println!("[task {task_id}] status {status}"),
            },
            UiEvent::LogLine { task_id, line } => println!("[task {task_id}] {line}"),
            UiEvent::RunSkipped { task_id } => {
                println!("[task {task_id}] skipped: already running");
            }
            UiEvent::RunFinished { task_id, outcome } => {
                println!("[task {task_id}] finished: {outcome:?}");
            }
            UiEvent::OrphansDetected { tasks } => {
                println!("previous session ended unexpectedly; these tasks may still be running:");
                for task in &tasks {
                    println!("  - {} ({})", task.name, task.path.display());
                }
            }
            UiEvent::SchedulerStateChanged { paused } => {
                println!("scheduler {}", if paused { "paused" } else { "running" });
            }
            UiEvent::Error { task_id, message } => match task_id {
                Some(id) => eprintln!("[task {id}] error: {message}"),
                None => eprintln!("error: {message}"),
            },
        }
    }
}

fn print_task(task: &Task) {
    println!("{}", console::format_task(task));
}
