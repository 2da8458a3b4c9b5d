use crate::models::{InstanceDto, NamedDto};
use crate::signer;
use async_trait::async_trait;
use chrono::Utc;
use config::{ApiConfig, ApiSecret, DirectorySettings};
use errors::DirectoryError;
use exo_core::{
    ComputeDirectory, DirectoryResource, InstancePool, InstanceRecord, RequestContext,
    SecurityGroup,
};
use reqwest::{Client, StatusCode, Url};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;

/// Exoscale API v2 client for the resources instance authentication needs.
pub struct ExoscaleClient {
    client: Client,
    endpoint: String,
    api_key: String,
    api_secret: ApiSecret,
    signature_ttl: Duration,
}

impl std::fmt::Debug for ExoscaleClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExoscaleClient")
            .field("endpoint", &self.endpoint)
            .field("api_key", &self.api_key)
            .finish_non_exhaustive()
    }
}

/// Ids are interpolated into the request path.
fn valid_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 64
        && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
}

fn transport_error(e: &reqwest::Error) -> DirectoryError {
    if e.is_timeout() {
        DirectoryError::Timeout
    } else {
        DirectoryError::Transport {
            reason: e.to_string(),
        }
    }
}

impl ExoscaleClient {
    pub fn new(
        endpoint: &str,
        api_key: &str,
        api_secret: ApiSecret,
        user_agent: &str,
        timeout: Duration,
        signature_ttl: Duration,
    ) -> Result<Self, DirectoryError> {
        Url::parse(endpoint).map_err(|e| DirectoryError::Configuration {
            reason: format!("invalid API endpoint {endpoint:?}: {e}"),
        })?;

        let client = Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()
            .map_err(|e| DirectoryError::Configuration {
                reason: e.to_string(),
            })?;

        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            api_secret,
            signature_ttl,
        })
    }

    pub fn from_config(config: &ApiConfig, settings: &DirectorySettings) -> Result<Self, DirectoryError> {
        Self::new(
            &config.api_endpoint,
            &config.api_key,
            config.api_secret.clone(),
            &settings.user_agent,
            settings.timeout(),
            Duration::from_secs(settings.signature_ttl_seconds),
        )
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn get<T: DeserializeOwned>(
        &self,
        resource: DirectoryResource,
        zone: &str,
        id: &str,
    ) -> Result<T, DirectoryError> {
        if !valid_id(id) {
            return Err(DirectoryError::NotFound {
                resource: resource.to_string(),
                id: id.to_string(),
            });
        }

        let url = format!("{}/{}/{}", self.endpoint, resource, id);
        let path = Url::parse(&url)
            .map_err(|e| DirectoryError::Configuration {
                reason: e.to_string(),
            })?
            .path()
            .to_string();
        let expires = Utc::now().timestamp() + self.signature_ttl.as_secs() as i64;
        let authorization = signer::authorization(
            &self.api_key,
            self.api_secret.expose(),
            "GET",
            &path,
            "",
            expires,
        )
        .map_err(|reason| DirectoryError::Configuration { reason })?;

        debug!(url = %url, zone = %zone, "Making Exoscale API request");

        let response = self
            .client
            .get(&url)
            .header("Authorization", authorization)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| transport_error(&e))?;

        match response.status() {
            status if status.is_success() => {
                let body = response.bytes().await.map_err(|e| transport_error(&e))?;
                serde_json::from_slice(&body).map_err(|e| DirectoryError::Decode {
                    reason: format!("{resource} {id}: {e}"),
                })
            }
            StatusCode::NOT_FOUND => Err(DirectoryError::NotFound {
                resource: resource.to_string(),
                id: id.to_string(),
            }),
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(DirectoryError::Api {
                    status: status.as_u16(),
                    message: body,
                })
            }
        }
    }
}

#[async_trait]
impl ComputeDirectory for ExoscaleClient {
    async fn get_instance(
        &self,
        ctx: &RequestContext,
        zone: &str,
        id: &str,
    ) -> Result<InstanceRecord, DirectoryError> {
        ctx.run(self.get::<InstanceDto>(DirectoryResource::Instance, zone, id))
            .await
            .map(Into::into)
    }

    async fn get_instance_pool(
        &self,
        ctx: &RequestContext,
        zone: &str,
        id: &str,
    ) -> Result<InstancePool, DirectoryError> {
        ctx.run(self.get::<NamedDto>(DirectoryResource::InstancePool, zone, id))
            .await
            .map(Into::into)
    }

    async fn get_security_group(
        &self,
        ctx: &RequestContext,
        zone: &str,
        id: &str,
    ) -> Result<SecurityGroup, DirectoryError> {
        ctx.run(self.get::<NamedDto>(DirectoryResource::SecurityGroup, zone, id))
            .await
            .map(Into::into)
    }
}
