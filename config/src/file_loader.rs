//! # Configuration File Loading
//!
//! Loads settings from TOML or YAML files, detecting the format from the
//! file extension.

use crate::config::Settings;
use std::path::Path;

/// Configuration file loading error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigFileError {
    #[error("File not found: {path}")]
    FileNotFound { path: String },

    #[error("Failed to parse TOML: {reason}")]
    TomlParse { reason: String },

    #[error("Failed to parse YAML: {reason}")]
    YamlParse { reason: String },

    #[error("Config file has no extension")]
    NoExtension,

    #[error("Unsupported config file format: {extension}")]
    UnsupportedFormat { extension: String },
}

fn read(path: &Path) -> Result<String, ConfigFileError> {
    std::fs::read_to_string(path).map_err(|_| ConfigFileError::FileNotFound {
        path: path.display().to_string(),
    })
}

/// Load settings from a TOML file.
///
/// ## Usage
/// ```rust,no_run
/// use config::load_from_toml;
/// use std::path::Path;
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let settings = load_from_toml(Path::new("exoauth.toml"))?;
///     println!("timeout: {}s", settings.directory.timeout_seconds);
///     Ok(())
/// }
/// ```
pub fn load_from_toml(path: &Path) -> Result<Settings, ConfigFileError> {
    toml::from_str(&read(path)?).map_err(|e| ConfigFileError::TomlParse {
        reason: e.to_string(),
    })
}

/// Load settings from a YAML file.
pub fn load_from_yaml(path: &Path) -> Result<Settings, ConfigFileError> {
    serde_yaml::from_str(&read(path)?).map_err(|e| ConfigFileError::YamlParse {
        reason: e.to_string(),
    })
}

/// Load settings from file with auto-detection.
///
/// ## Supported Formats
/// - `.toml`
/// - `.yaml` / `.yml`
pub fn load_from_file(path: &Path) -> Result<Settings, ConfigFileError> {
    let extension = path
        .extension()
        .and_then(|s| s.to_str())
        .ok_or(ConfigFileError::NoExtension)?;

    match extension.to_lowercase().as_str() {
        "toml" => load_from_toml(path),
        "yaml" | "yml" => load_from_yaml(path),
        other => Err(ConfigFileError::UnsupportedFormat {
            extension: other.to_string(),
        }),
    }
}
