// src/config/loader.rs

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};

use crate::config::model::{AppConfig, EngineSettings};
use crate::config::validate::validate_settings;
use crate::errors::Result;
use crate::fs::FileSystem;

/// Read and parse a config file. No fallback; see [`load_or_default`].
pub fn load_from_path(fs: &dyn FileSystem, path: impl AsRef<Path>) -> Result<AppConfig> {
    let contents = fs.read_to_string(path.as_ref())?;
    let config: AppConfig = toml::from_str(&contents)?;
    validate_settings(&config.engine)?;
    Ok(config)
}

/// Load a config file, falling back to defaults when it is missing,
/// unreadable, corrupt or invalid. The config never blocks startup.
pub fn load_or_default(fs: &dyn FileSystem, path: impl AsRef<Path>) -> AppConfig {
    let path = path.as_ref();
    if !fs.exists(path) {
        debug!(path = %path.display(), "no config file; using defaults");
        return AppConfig::default();
    }

    match load_from_path(fs, path) {
        Ok(cfg) => cfg,
        Err(e) => {
            warn!(
                path = %path.display(),
                error = %e,
                "failed to load config; using defaults"
            );
            AppConfig::default()
        }
    }
}

/// Serialize and write a config file (plain write, not atomic).
pub fn save_to_path(fs: &dyn FileSystem, path: impl AsRef<Path>, config: &AppConfig) -> Result<()> {
    let contents = toml::to_string_pretty(config)?;
    fs.write(path.as_ref(), contents.as_bytes())?;
    Ok(())
}

/// Default location of the task store, relative to the working directory.
pub fn default_store_path() -> PathBuf {
    PathBuf::from("tasks.toml")
}

/// Default location of the config file, relative to the working directory.
pub fn default_config_path() -> PathBuf {
    PathBuf::from("runwarden.toml")
}

/// Loaded config plus the place it came from, shared between the engine and
/// the front end.
#[derive(Debug)]
pub struct ConfigStore {
    fs: Arc<dyn FileSystem>,
    path: PathBuf,
    config: Mutex<AppConfig>,
}

impl ConfigStore {
    pub fn load(fs: Arc<dyn FileSystem>, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let config = load_or_default(fs.as_ref(), &path);
        Self {
            fs,
            path,
            config: Mutex::new(config),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn snapshot(&self) -> AppConfig {
        self.lock().clone()
    }

    pub fn settings(&self) -> EngineSettings {
        self.lock().engine.clone()
    }

    pub fn last_selected_path(&self) -> Option<PathBuf> {
        self.lock().last_selected_path.clone()
    }

    /// Remember `path` for the next selection and persist immediately.
    pub fn set_last_selected_path(&self, path: impl Into<PathBuf>) -> Result<()> {
        let mut config = self.lock();
        config.last_selected_path = Some(path.into());
        save_to_path(self.fs.as_ref(), &self.path, &config)
    }

    fn lock(&self) -> MutexGuard<'_, AppConfig> {
        self.config.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
