//! An orchestrator wired to an in-memory filesystem and a fake executor.

use std::path::PathBuf;
use std::sync::Arc;

use runwarden::config::{AppConfig, ConfigStore, EngineSettings, save_to_path};
use runwarden::engine::{EngineEvent, Orchestrator, UiEvent};
use runwarden::fs::FileSystem;
use runwarden::fs::mock::MockFileSystem;
use runwarden::store::TaskStore;
use tokio::sync::mpsc;

use crate::fake_executor::FakeExecutor;

pub const STORE_PATH: &str = "/state/tasks.toml";
pub const CONFIG_PATH: &str = "/state/runwarden.toml";

pub struct EngineHarness {
    pub fs: MockFileSystem,
    pub executor: FakeExecutor,
    pub orchestrator: Arc<Orchestrator<FakeExecutor>>,
    pub events_tx: mpsc::Sender<EngineEvent>,
    pub events_rx: Option<mpsc::Receiver<EngineEvent>>,
    pub ui_rx: mpsc::UnboundedReceiver<UiEvent>,
}

impl EngineHarness {
    pub fn new(settings: EngineSettings) -> Self {
        Self::with_fs(MockFileSystem::new(), settings, None)
    }

    /// Build on an existing filesystem (e.g. one holding a store or a crash
    /// marker). With `auto_exit`, every fake run exits with that code.
    pub fn with_fs(fs: MockFileSystem, settings: EngineSettings, auto_exit: Option<i32>) -> Self {
        let config = AppConfig {
            last_selected_path: None,
            engine: settings,
        };
        save_to_path(&fs, CONFIG_PATH, &config).unwrap();

        let shared: Arc<dyn FileSystem> = Arc::new(fs.clone());
        let config = Arc::new(ConfigStore::load(Arc::clone(&shared), CONFIG_PATH));
        let store = Arc::new(TaskStore::open(Arc::clone(&shared), STORE_PATH));

        let (events_tx, events_rx) = mpsc::channel(256);
        let (ui_tx, ui_rx) = mpsc::unbounded_channel();

        let mut executor = FakeExecutor::new(events_tx.clone());
        if let Some(code) = auto_exit {
            executor = executor.auto_exit(code);
        }

        let orchestrator = Arc::new(Orchestrator::new(
            store,
            config,
            shared,
            executor.clone(),
            events_tx.clone(),
            ui_tx,
        ));

        Self {
            fs,
            executor,
            orchestrator,
            events_tx,
            events_rx: Some(events_rx),
            ui_rx,
        }
    }

    /// Register an executable in the mock filesystem so validation accepts it.
    pub fn add_executable(&self, path: &str) -> PathBuf {
        self.fs.add_file(path, "#!/bin/sh\n");
        PathBuf::from(path)
    }

    /// Spawn the engine loop.
    pub fn spawn_loop(&mut self) -> tokio::task::JoinHandle<()> {
        let rx = self.events_rx.take().expect("engine loop already spawned");
        tokio::spawn(Arc::clone(&self.orchestrator).run(rx))
    }

    /// Drain UI events until `pred` matches one; returns everything seen.
    pub async fn wait_for_ui<F>(&mut self, mut pred: F) -> Vec<UiEvent>
    where
        F: FnMut(&UiEvent) -> bool,
    {
        let mut seen = Vec::new();
        while let Some(event) = self.ui_rx.recv().await {
            let done = pred(&event);
            seen.push(event);
            if done {
                return seen;
            }
        }
        panic!("ui channel closed; saw {seen:?}");
    }

    /// Everything already queued on the UI channel.
    pub fn drain_ui(&mut self) -> Vec<UiEvent> {
        let mut seen = Vec::new();
        while let Ok(event) = self.ui_rx.try_recv() {
            seen.push(event);
        }
        seen
    }
}
