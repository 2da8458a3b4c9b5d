//! # Settings Validation

use crate::config::Settings;
use validator::Validate;

/// Validate settings.
///
/// ## Validation Rules
/// - `lease`: both TTLs at least one second, default not above max
/// - `locks.pool_size`: 1-4096
/// - `directory.timeout_seconds`: 1-300
/// - `directory.user_agent`: 1-255 characters
/// - `storage.backend`: "inmem", or "redis" with a non-empty `redis_url`
pub fn validate(settings: &Settings) -> Result<(), validator::ValidationErrors> {
    settings.validate()
}
