// src/store/atomic.rs

//! Crash-safe file replacement: write a sibling temp file, rotate the
//! current file to `.bak`, rename the temp file into place.
//!
//! Renaming over an existing file is not portable (it fails on Windows), so
//! the previous version is always moved out of the way first.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::errors::Result;
use crate::fs::FileSystem;

/// `tasks.toml` + `"tmp"` -> `tasks.toml.tmp`.
pub fn sibling_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_os_string();
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

/// Atomically replace `path` with `contents`, keeping the previous version
/// as `<path>.bak`.
pub fn atomic_write(fs: &dyn FileSystem, path: &Path, contents: &[u8]) -> Result<()> {
    let tmp = sibling_with_suffix(path, "tmp");
    let bak = sibling_with_suffix(path, "bak");

    if let Err(e) = fs.write(&tmp, contents) {
        discard_temp(fs, &tmp);
        return Err(e.into());
    }

    if fs.exists(path) {
        if fs.exists(&bak) {
            if let Err(e) = fs.remove_file(&bak) {
                warn!(path = %bak.display(), error = %e, "failed to remove old backup");
            }
        }
        if let Err(e) = fs.rename(path, &bak) {
            warn!(path = %path.display(), error = %e, "failed to rotate previous version to backup");
        }
    }

    if let Err(e) = fs.rename(&tmp, path) {
        discard_temp(fs, &tmp);
        return Err(e.into());
    }
    Ok(())
}

/// Move an unreadable file to `<path>.backup` so a fresh one can be written.
pub fn backup_corrupt(fs: &dyn FileSystem, path: &Path) -> Option<PathBuf> {
    let backup = sibling_with_suffix(path, "backup");
    match fs.rename(path, &backup) {
        Ok(()) => Some(backup),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to back up corrupt file");
            None
        }
    }
}

fn discard_temp(fs: &dyn FileSystem, tmp: &Path) {
    if fs.exists(tmp) {
        let _ = fs.remove_file(tmp);
    }
}
