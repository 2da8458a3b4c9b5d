//! # Persisted API Configuration
//!
//! Credentials and zone used to reach the compute directory, stored under
//! the `config` key.

use errors::AuthError;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Storage key of the API configuration entry.
pub const CONFIG_KEY: &str = "config";

/// API secret, wiped from memory on drop and never printed.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(transparent)]
pub struct ApiSecret(String);

impl ApiSecret {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for ApiSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ApiSecret(***)")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiConfig {
    pub api_endpoint: String,
    pub api_key: String,
    pub api_secret: ApiSecret,
    #[serde(default)]
    pub approle_mode: bool,
    pub zone: String,
}

/// Admin write request for the API configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigWriteRequest {
    pub api_endpoint: Option<String>,
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    pub approle_mode: Option<bool>,
    pub zone: Option<String>,
}

/// API configuration as returned by reads. Never carries the secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfigView {
    pub api_endpoint: String,
    pub api_key: String,
    pub approle_mode: bool,
    pub zone: String,
}

pub fn default_api_endpoint(zone: &str) -> String {
    format!("https://api-{zone}.exoscale.com/v2")
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl ApiConfig {
    /// Applies a write request on top of the existing entry, if any.
    ///
    /// Credentials and zone must end up set. The endpoint follows the zone
    /// unless given explicitly.
    pub fn apply(existing: Option<Self>, req: ConfigWriteRequest) -> Result<Self, AuthError> {
        let api_key = non_empty(req.api_key).or_else(|| existing.as_ref().map(|c| c.api_key.clone()));
        let api_secret = non_empty(req.api_secret)
            .map(ApiSecret::new)
            .or_else(|| existing.as_ref().map(|c| c.api_secret.clone()));
        let (Some(api_key), Some(api_secret)) = (api_key, api_secret) else {
            return Err(AuthError::missing("api credentials"));
        };

        let zone = non_empty(req.zone)
            .or_else(|| existing.as_ref().map(|c| c.zone.clone()))
            .ok_or_else(|| AuthError::missing("zone"))?;

        let api_endpoint = match non_empty(req.api_endpoint) {
            Some(endpoint) => {
                if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
                    return Err(AuthError::invalid(
                        "api_endpoint",
                        "must be an http(s) URL",
                    ));
                }
                endpoint.trim_end_matches('/').to_string()
            }
            None => existing
                .as_ref()
                .filter(|c| c.zone == zone)
                .map(|c| c.api_endpoint.clone())
                .unwrap_or_else(|| default_api_endpoint(&zone)),
        };

        let approle_mode = req
            .approle_mode
            .or_else(|| existing.as_ref().map(|c| c.approle_mode))
            .unwrap_or(false);

        Ok(Self {
            api_endpoint,
            api_key,
            api_secret,
            approle_mode,
            zone,
        })
    }

    pub fn view(&self) -> ConfigView {
        ConfigView {
            api_endpoint: self.api_endpoint.clone(),
            api_key: self.api_key.clone(),
            approle_mode: self.approle_mode,
            zone: self.zone.clone(),
        }
    }
}
