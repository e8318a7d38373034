// src/config/validate.rs

use std::path::Path;

use tracing::warn;

use crate::config::model::EngineSettings;
use crate::errors::{Result, RunwardenError};
use crate::fs::FileSystem;
use crate::types::{LONG_INTERVAL_MINUTES, MAX_TASK_NAME_LEN, TaskDraft};

/// Check the shape of a task draft: non-empty name of at most 100
/// characters, non-empty path, positive interval that fits in `u32`.
///
/// Returns the interval as stored on the task.
pub fn validate_draft(draft: &TaskDraft) -> Result<u32> {
    let name = draft.name.trim();
    if name.is_empty() {
        return Err(RunwardenError::InvalidArgument(
            "task name must not be empty".to_string(),
        ));
    }
    if name.chars().count() > MAX_TASK_NAME_LEN {
        return Err(RunwardenError::InvalidArgument(format!(
            "task name is too long (max {MAX_TASK_NAME_LEN} characters)"
        )));
    }
    if draft.path.as_os_str().is_empty() {
        return Err(RunwardenError::InvalidArgument(
            "executable path must not be empty".to_string(),
        ));
    }
    if draft.interval <= 0 {
        return Err(RunwardenError::InvalidArgument(format!(
            "interval must be greater than 0 (got {})",
            draft.interval
        )));
    }
    let interval = u32::try_from(draft.interval).map_err(|_| {
        RunwardenError::InvalidArgument(format!("interval {} is out of range", draft.interval))
    })?;
    if interval > LONG_INTERVAL_MINUTES {
        warn!(
            task = %name,
            interval,
            "interval is longer than one week"
        );
    }
    Ok(interval)
}

/// Require `path` to name an existing regular file.
pub fn ensure_executable_exists(fs: &dyn FileSystem, path: &Path) -> Result<()> {
    if !fs.exists(path) {
        return Err(RunwardenError::NotFound(path.to_path_buf()));
    }
    if !fs.is_file(path) {
        return Err(RunwardenError::InvalidArgument(format!(
            "{} is not a file",
            path.display()
        )));
    }
    Ok(())
}

/// Reject engine settings that would make timers or buffers degenerate.
pub fn validate_settings(settings: &EngineSettings) -> Result<()> {
    if settings.log_buffer_lines == 0 {
        return Err(RunwardenError::InvalidArgument(
            "[engine].log_buffer_lines must be >= 1 (got 0)".to_string(),
        ));
    }
    if settings.watchdog_factor == 0 {
        return Err(RunwardenError::InvalidArgument(
            "[engine].watchdog_factor must be >= 1 (got 0)".to_string(),
        ));
    }
    if settings.heartbeat_secs == 0 {
        return Err(RunwardenError::InvalidArgument(
            "[engine].heartbeat_secs must be >= 1 (got 0)".to_string(),
        ));
    }
    Ok(())
}
