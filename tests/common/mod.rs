#![allow(dead_code, unused_imports)]

pub use runwarden_test_utils::builders::{SettingsBuilder, TaskDraftBuilder};
pub use runwarden_test_utils::fake_executor::FakeExecutor;
pub use runwarden_test_utils::harness::{CONFIG_PATH, EngineHarness, STORE_PATH};
pub use runwarden_test_utils::{init_tracing, with_timeout};

#[cfg(unix)]
pub mod scripts {
    use std::os::unix::fs::PermissionsExt;
    use std::path::{Path, PathBuf};
    use std::sync::{Mutex, MutexGuard};

    /// Writing an executable and exec'ing it while another thread forks can
    /// fail with ETXTBSY; tests that write scripts and spawn hold this lock.
    static SPAWN_LOCK: Mutex<()> = Mutex::new(());

    pub fn spawn_lock() -> MutexGuard<'static, ()> {
        SPAWN_LOCK.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Write an executable `sh` script into `dir`.
    pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
        path
    }
}
