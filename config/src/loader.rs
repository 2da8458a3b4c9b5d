//! # Environment Variable Loader
//!
//! Loads settings from `EXOAUTH_*` environment variables.

use crate::config::{DirectorySettings, LeaseSettings, LockSettings, Settings, StorageSettings};
use std::env;

/// Load settings from environment variables.
///
/// # M-CANONICAL-DOCS
///
/// ## Purpose
/// Builds [`Settings`] from the process environment. Unset variables fall
/// back to defaults; set but unparsable variables are errors.
///
/// ## Usage
/// ```rust,no_run
/// use config::load_from_env;
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let settings = load_from_env()?;
///     println!("lock shards: {}", settings.locks.pool_size);
///     Ok(())
/// }
/// ```
///
/// ## Environment Variables
/// - `EXOAUTH_DEFAULT_LEASE_TTL_SECONDS` (default: 2764800)
/// - `EXOAUTH_MAX_LEASE_TTL_SECONDS` (default: 2764800)
/// - `EXOAUTH_LOCK_POOL_SIZE` (default: 256)
/// - `EXOAUTH_DIRECTORY_TIMEOUT_SECONDS` (default: 30)
/// - `EXOAUTH_USER_AGENT` (default: "exoscale-vault-auth/<version>")
/// - `EXOAUTH_SIGNATURE_TTL_SECONDS` (default: 600)
/// - `EXOAUTH_STORAGE_BACKEND`: "inmem" or "redis" (default: "inmem")
/// - `EXOAUTH_REDIS_URL` (optional)
pub fn load_from_env() -> Result<Settings, Box<dyn std::error::Error>> {
    let defaults = Settings::default();

    Ok(Settings {
        lease: LeaseSettings {
            default_lease_ttl_seconds: parse_env("EXOAUTH_DEFAULT_LEASE_TTL_SECONDS")?
                .unwrap_or(defaults.lease.default_lease_ttl_seconds),
            max_lease_ttl_seconds: parse_env("EXOAUTH_MAX_LEASE_TTL_SECONDS")?
                .unwrap_or(defaults.lease.max_lease_ttl_seconds),
        },
        locks: LockSettings {
            pool_size: parse_env("EXOAUTH_LOCK_POOL_SIZE")?.unwrap_or(defaults.locks.pool_size),
        },
        directory: DirectorySettings {
            timeout_seconds: parse_env("EXOAUTH_DIRECTORY_TIMEOUT_SECONDS")?
                .unwrap_or(defaults.directory.timeout_seconds),
            user_agent: env::var("EXOAUTH_USER_AGENT")
                .unwrap_or(defaults.directory.user_agent.clone()),
            signature_ttl_seconds: parse_env("EXOAUTH_SIGNATURE_TTL_SECONDS")?
                .unwrap_or(defaults.directory.signature_ttl_seconds),
        },
        storage: StorageSettings {
            backend: env::var("EXOAUTH_STORAGE_BACKEND")
                .unwrap_or(defaults.storage.backend.clone()),
            redis_url: env::var("EXOAUTH_REDIS_URL").ok(),
        },
    })
}

fn parse_env<T>(key: &str) -> Result<Option<T>, Box<dyn std::error::Error>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(s) => s
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| format!("{key}: {e}").into()),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const VARS: &[&str] = &[
        "EXOAUTH_DEFAULT_LEASE_TTL_SECONDS",
        "EXOAUTH_MAX_LEASE_TTL_SECONDS",
        "EXOAUTH_LOCK_POOL_SIZE",
        "EXOAUTH_DIRECTORY_TIMEOUT_SECONDS",
        "EXOAUTH_USER_AGENT",
        "EXOAUTH_SIGNATURE_TTL_SECONDS",
        "EXOAUTH_STORAGE_BACKEND",
        "EXOAUTH_REDIS_URL",
    ];

    fn clear() {
        for var in VARS {
            unsafe { env::remove_var(var) };
        }
    }

    #[test]
    #[serial]
    fn test_load_from_env_defaults() {
        clear();
        let settings = load_from_env().unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    #[serial]
    fn test_load_from_env_overrides() {
        clear();
        unsafe {
            env::set_var("EXOAUTH_MAX_LEASE_TTL_SECONDS", "3600");
            env::set_var("EXOAUTH_DEFAULT_LEASE_TTL_SECONDS", "600");
            env::set_var("EXOAUTH_LOCK_POOL_SIZE", "32");
            env::set_var("EXOAUTH_USER_AGENT", "custom/1.0");
            env::set_var("EXOAUTH_STORAGE_BACKEND", "redis");
            env::set_var("EXOAUTH_REDIS_URL", "redis://localhost:6379");
        }

        let settings = load_from_env().unwrap();
        assert_eq!(settings.lease.max_lease_ttl_seconds, 3600);
        assert_eq!(settings.lease.default_lease_ttl_seconds, 600);
        assert_eq!(settings.locks.pool_size, 32);
        assert_eq!(settings.directory.user_agent, "custom/1.0");
        assert_eq!(settings.storage.backend, "redis");
        assert_eq!(
            settings.storage.redis_url.as_deref(),
            Some("redis://localhost:6379")
        );
        clear();
    }

    #[test]
    #[serial]
    fn test_load_from_env_rejects_garbage() {
        clear();
        unsafe { env::set_var("EXOAUTH_LOCK_POOL_SIZE", "many") };
        let err = load_from_env().unwrap_err();
        assert!(err.to_string().contains("EXOAUTH_LOCK_POOL_SIZE"));
        clear();
    }
}
