#![allow(dead_code)]

use std::path::PathBuf;

use runwarden::config::EngineSettings;
use runwarden::types::TaskDraft;

/// Builder for `TaskDraft` to simplify test setup.
pub struct TaskDraftBuilder {
    draft: TaskDraft,
}

impl TaskDraftBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            draft: TaskDraft::new(name, format!("/opt/jobs/{}.sh", name.to_lowercase()), 5),
        }
    }

    pub fn path(mut self, path: impl Into<PathBuf>) -> Self {
        self.draft.path = path.into();
        self
    }

    pub fn interval(mut self, minutes: i64) -> Self {
        self.draft.interval = minutes;
        self
    }

    pub fn build(self) -> TaskDraft {
        self.draft
    }
}

/// Builder for `EngineSettings`, starting from the defaults.
pub struct SettingsBuilder {
    settings: EngineSettings,
}

impl SettingsBuilder {
    pub fn new() -> Self {
        Self {
            settings: EngineSettings::default(),
        }
    }

    pub fn grace_period_ms(mut self, ms: u64) -> Self {
        self.settings.grace_period_ms = ms;
        self
    }

    pub fn heartbeat_secs(mut self, secs: u64) -> Self {
        self.settings.heartbeat_secs = secs;
        self
    }

    pub fn heartbeat_patterns(mut self, patterns: &[&str]) -> Self {
        self.settings.heartbeat_patterns = patterns.iter().map(|p| p.to_string()).collect();
        self
    }

    pub fn watchdog_factor(mut self, factor: u32) -> Self {
        self.settings.watchdog_factor = factor;
        self
    }

    pub fn build(self) -> EngineSettings {
        self.settings
    }
}

impl Default for SettingsBuilder {
    fn default() -> Self {
        Self::new()
    }
}
