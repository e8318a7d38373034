// src/config/mod.rs

//! Configuration for runwarden.
//!
//! - `model.rs`: the TOML-backed config file (`last_selected_path` and the
//!   `[engine]` tunables).
//! - `loader.rs`: load with fallback to defaults, save, and the shared
//!   [`ConfigStore`].
//! - `validate.rs`: task draft validation and settings sanity checks.

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{
    ConfigStore, default_config_path, default_store_path, load_from_path, load_or_default,
    save_to_path,
};
pub use model::{AppConfig, EngineSettings};
pub use validate::{ensure_executable_exists, validate_draft, validate_settings};
