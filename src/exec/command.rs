// src/exec/command.rs

//! OS command construction for supervised launches.

use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;

/// `CREATE_NO_WINDOW`: keeps console programs from flashing a window while
/// their output is piped.
#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Build the command for `path`.
///
/// The working directory is always the executable's own directory. With
/// `capture_output`, stdin is closed and both output streams are piped;
/// otherwise the child inherits the parent's stdio and may open its own
/// windows.
pub fn build_command(path: &Path, capture_output: bool) -> Command {
    let program = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());

    let mut cmd = Command::new(&program);
    if let Some(dir) = program.parent().filter(|d| !d.as_os_str().is_empty()) {
        cmd.current_dir(dir);
    }

    if capture_output {
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        #[cfg(windows)]
        cmd.creation_flags(CREATE_NO_WINDOW);
    }

    // A dropped watcher must never leave the child behind.
    cmd.kill_on_drop(true);
    cmd
}
