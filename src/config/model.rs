// src/config/model.rs

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Application config as read from a TOML file.
///
/// ```toml
/// last_selected_path = "C:/jobs/nightly.exe"
///
/// [engine]
/// grace_period_ms = 1500
/// heartbeat_secs = 10
/// heartbeat_patterns = ["(?i)pdf"]
/// log_buffer_lines = 500
/// watchdog_factor = 2
/// ```
///
/// Every field is optional; a missing or unreadable file yields
/// `AppConfig::default()`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Last executable chosen when adding or editing a task, used to
    /// pre-fill the next selection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_selected_path: Option<PathBuf>,

    #[serde(default)]
    pub engine: EngineSettings,
}

/// `[engine]` section: tunables of the supervisor, scheduler and watchdog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineSettings {
    /// How long a terminated process tree gets to exit before it is killed.
    #[serde(default = "default_grace_period_ms")]
    pub grace_period_ms: u64,

    /// Period of the "still running" notice for heavy-buffering programs.
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,

    /// Regexes matched against the executable path. A captured run whose
    /// path matches any of them gets heartbeat notices.
    #[serde(default = "default_heartbeat_patterns")]
    pub heartbeat_patterns: Vec<String>,

    /// Lines of captured output retained per task.
    #[serde(default = "default_log_buffer_lines")]
    pub log_buffer_lines: usize,

    /// The status watchdog fires after `watchdog_factor * interval`.
    #[serde(default = "default_watchdog_factor")]
    pub watchdog_factor: u32,
}

fn default_grace_period_ms() -> u64 {
    1_500
}

fn default_heartbeat_secs() -> u64 {
    10
}

fn default_heartbeat_patterns() -> Vec<String> {
    vec!["(?i)pdf".to_string()]
}

fn default_log_buffer_lines() -> usize {
    500
}

fn default_watchdog_factor() -> u32 {
    2
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            grace_period_ms: default_grace_period_ms(),
            heartbeat_secs: default_heartbeat_secs(),
            heartbeat_patterns: default_heartbeat_patterns(),
            log_buffer_lines: default_log_buffer_lines(),
            watchdog_factor: default_watchdog_factor(),
        }
    }
}
