//! Core traits for the authentication backend

use crate::context::RequestContext;
use crate::types::{InstancePool, InstanceRecord, SecurityGroup};
use async_trait::async_trait;
use errors::{DirectoryError, StorageError};
use std::time::Duration;

/// Persisted key-value storage owned by the host.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError>;

    /// Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// Keys directly under `prefix`, relative to it, one level deep.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError>;
}

/// Remote compute control plane.
#[async_trait]
pub trait ComputeDirectory: Send + Sync {
    async fn get_instance(
        &self,
        ctx: &RequestContext,
        zone: &str,
        id: &str,
    ) -> Result<InstanceRecord, DirectoryError>;

    async fn get_instance_pool(
        &self,
        ctx: &RequestContext,
        zone: &str,
        id: &str,
    ) -> Result<InstancePool, DirectoryError>;

    async fn get_security_group(
        &self,
        ctx: &RequestContext,
        zone: &str,
        id: &str,
    ) -> Result<SecurityGroup, DirectoryError>;
}

/// Host-provided lease limits.
pub trait SystemView: Send + Sync {
    fn default_lease_ttl(&self) -> Duration;

    fn max_lease_ttl(&self) -> Duration;
}

/// Fixed lease limits, used when the host does not provide its own view.
#[derive(Debug, Clone, Copy)]
pub struct StaticSystemView {
    pub default_lease_ttl: Duration,
    pub max_lease_ttl: Duration,
}

impl SystemView for StaticSystemView {
    fn default_lease_ttl(&self) -> Duration {
        self.default_lease_ttl
    }

    fn max_lease_ttl(&self) -> Duration {
        self.max_lease_ttl
    }
}
