//! # Configuration System
//!
//! Settings and persisted configuration for the authentication backend.
//!
//! This crate provides:
//! - Process-level [`Settings`] (lease limits, lock sharding, directory
//!   client and storage options)
//! - Environment variable loading (`EXOAUTH_*`)
//! - Configuration file loading (TOML/YAML)
//! - Validation through the `validator` crate
//! - The persisted [`ApiConfig`] entry holding directory credentials

pub mod api;
pub mod config;
pub mod file_loader;
pub mod loader;
pub mod validation;

pub use api::{ApiConfig, ApiSecret, CONFIG_KEY, ConfigView, ConfigWriteRequest};
pub use config::{DirectorySettings, LeaseSettings, LockSettings, Settings, StorageSettings};
pub use file_loader::{ConfigFileError, load_from_file, load_from_toml, load_from_yaml};
pub use loader::load_from_env;
pub use validation::validate;
