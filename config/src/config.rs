//! # Backend Settings
//!
//! Process-level settings for the authentication backend.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use validator::Validate;

/// Root settings structure.
///
/// # M-CANONICAL-DOCS
///
/// ## Purpose
/// Groups every process-level setting the backend needs before any request
/// is served: lease limits, lock sharding, directory client options and the
/// storage backend selection.
///
/// ## Fields
/// - `lease`: lease ceiling and default used when the host gives none
/// - `locks`: size of the sharded lock pools
/// - `directory`: remote compute directory client options
/// - `storage`: key-value backend selection
///
/// ## Validation
/// All nested settings must pass their own validation rules.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, Default, PartialEq)]
pub struct Settings {
    #[serde(default)]
    #[validate(nested)]
    pub lease: LeaseSettings,

    #[serde(default)]
    #[validate(nested)]
    pub locks: LockSettings,

    #[serde(default)]
    #[validate(nested)]
    pub directory: DirectorySettings,

    #[serde(default)]
    #[validate(nested)]
    pub storage: StorageSettings,
}

/// Lease limits.
///
/// ## Fields
/// - `default_lease_ttl_seconds`: default 768h
/// - `max_lease_ttl_seconds`: ceiling against which role TTLs and periods
///   are checked, default 768h
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
#[validate(schema(function = "validate_lease_bounds"))]
pub struct LeaseSettings {
    #[serde(default = "default_lease_ttl")]
    #[validate(range(min = 1))]
    pub default_lease_ttl_seconds: u64,

    #[serde(default = "default_lease_ttl")]
    #[validate(range(min = 1))]
    pub max_lease_ttl_seconds: u64,
}

fn default_lease_ttl() -> u64 {
    768 * 3600
}

fn validate_lease_bounds(lease: &LeaseSettings) -> Result<(), validator::ValidationError> {
    if lease.default_lease_ttl_seconds > lease.max_lease_ttl_seconds {
        return Err(validator::ValidationError::new(
            "default lease TTL exceeds max lease TTL",
        ));
    }
    Ok(())
}

impl LeaseSettings {
    pub fn default_lease_ttl(&self) -> Duration {
        Duration::from_secs(self.default_lease_ttl_seconds)
    }

    pub fn max_lease_ttl(&self) -> Duration {
        Duration::from_secs(self.max_lease_ttl_seconds)
    }
}

impl Default for LeaseSettings {
    fn default() -> Self {
        Self {
            default_lease_ttl_seconds: default_lease_ttl(),
            max_lease_ttl_seconds: default_lease_ttl(),
        }
    }
}

/// Lock pool sizing.
///
/// ## Fields
/// - `pool_size`: number of shards in each lock pool (default 256, range
///   1-4096)
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct LockSettings {
    #[serde(default = "default_lock_pool_size")]
    #[validate(range(min = 1, max = 4096))]
    pub pool_size: usize,
}

fn default_lock_pool_size() -> usize {
    256
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            pool_size: default_lock_pool_size(),
        }
    }
}

/// Compute directory client options.
///
/// ## Fields
/// - `timeout_seconds`: per-request HTTP timeout (default 30, range 1-300)
/// - `user_agent`: value of the `User-Agent` header
/// - `signature_ttl_seconds`: validity of request signatures (default 600)
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
pub struct DirectorySettings {
    #[serde(default = "default_directory_timeout")]
    #[validate(range(min = 1, max = 300))]
    pub timeout_seconds: u64,

    #[serde(default = "default_user_agent")]
    #[validate(length(min = 1, max = 255))]
    pub user_agent: String,

    #[serde(default = "default_signature_ttl")]
    #[validate(range(min = 1, max = 3600))]
    pub signature_ttl_seconds: u64,
}

fn default_directory_timeout() -> u64 {
    30
}

fn default_user_agent() -> String {
    format!("exoscale-vault-auth/{}", env!("CARGO_PKG_VERSION"))
}

fn default_signature_ttl() -> u64 {
    600
}

impl DirectorySettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

impl Default for DirectorySettings {
    fn default() -> Self {
        Self {
            timeout_seconds: default_directory_timeout(),
            user_agent: default_user_agent(),
            signature_ttl_seconds: default_signature_ttl(),
        }
    }
}

/// Key-value backend selection.
///
/// ## Fields
/// - `backend`: `"inmem"` or `"redis"` (default `"inmem"`)
/// - `redis_url`: connection string, required when `backend` is `"redis"`
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq)]
#[validate(schema(function = "validate_storage_backend"))]
pub struct StorageSettings {
    #[serde(default = "default_storage_backend")]
    pub backend: String,

    #[serde(default)]
    pub redis_url: Option<String>,
}

fn default_storage_backend() -> String {
    "inmem".to_string()
}

fn validate_storage_backend(storage: &StorageSettings) -> Result<(), validator::ValidationError> {
    match storage.backend.as_str() {
        "inmem" => Ok(()),
        "redis" if storage.redis_url.as_deref().is_some_and(|u| !u.is_empty()) => Ok(()),
        "redis" => Err(validator::ValidationError::new(
            "redis storage requires redis_url",
        )),
        _ => Err(validator::ValidationError::new("Invalid storage backend")),
    }
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            backend: default_storage_backend(),
            redis_url: None,
        }
    }
}
