// src/store/mod.rs

//! Persistent task store.
//!
//! - [`task_store`] owns the ordered task list and every mutation of it.
//! - [`atomic`] implements temp-file + backup-rotation writes and the
//!   corrupt-file backup used on load.

pub mod atomic;
pub mod task_store;

pub use atomic::{atomic_write, backup_corrupt, sibling_with_suffix};
pub use task_store::TaskStore;
