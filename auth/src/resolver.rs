//! Instance attribute resolution.
//!
//! Expressions are opaque text, so the full attribute set is always
//! resolved: the instance, its pool when it has one, and every security
//! group it belongs to.

use errors::{AuthError, DirectoryError};
use exo_core::{
    ComputeDirectory, INSTANCE_POOL_MANAGER, Instance, InstanceManager, RequestContext,
    SecurityGroup,
};
use thiserror::Error;
use tracing::debug;

/// Only a missing instance is a denial. A missing pool or security group
/// means the directory answered inconsistently.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("instance {id} not found")]
    NotFound { id: String },

    #[error("failed to resolve {resource}: {source}")]
    Internal {
        resource: String,
        #[source]
        source: DirectoryError,
    },
}

impl From<ResolveError> for AuthError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::NotFound { .. } => AuthError::denied(err.to_string()),
            ResolveError::Internal { .. } => AuthError::internal(err.to_string()),
        }
    }
}

fn internal(resource: impl Into<String>) -> impl FnOnce(DirectoryError) -> ResolveError {
    let resource = resource.into();
    move |source| ResolveError::Internal { resource, source }
}

pub async fn resolve_instance(
    directory: &dyn ComputeDirectory,
    ctx: &RequestContext,
    zone: &str,
    id: &str,
) -> Result<Instance, ResolveError> {
    let record = match directory.get_instance(ctx, zone, id).await {
        Ok(record) => record,
        Err(e) if e.is_not_found() => return Err(ResolveError::NotFound { id: id.to_string() }),
        Err(e) => return Err(internal(format!("instance {id}"))(e)),
    };

    let manager = match record.manager {
        Some(m) if m.kind == INSTANCE_POOL_MANAGER => {
            let pool = directory
                .get_instance_pool(ctx, zone, &m.id)
                .await
                .map_err(internal(format!("instance pool {}", m.id)))?;
            Some(InstanceManager {
                kind: m.kind,
                id: m.id,
                name: pool.name,
            })
        }
        Some(m) => Some(InstanceManager {
            kind: m.kind,
            id: m.id,
            name: String::new(),
        }),
        None => None,
    };

    let mut security_groups = Vec::with_capacity(record.security_group_ids.len());
    for sg_id in &record.security_group_ids {
        let sg = directory
            .get_security_group(ctx, zone, sg_id)
            .await
            .map_err(internal(format!("security group {sg_id}")))?;
        security_groups.push(SecurityGroup {
            id: sg_id.clone(),
            name: sg.name,
        });
    }

    debug!(
        instance_id = %record.id,
        zone = %zone,
        security_groups = security_groups.len(),
        "Resolved instance attributes"
    );

    Ok(Instance {
        id: record.id,
        name: record.name,
        zone: zone.to_string(),
        created_at: record.created_at,
        public_ip: record.public_ip,
        labels: record.labels,
        manager,
        security_groups,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use exo_core::DirectoryResource;
    use std::time::Duration;
    use testing::{Fault, InstanceBuilder, MockDirectory};

    fn directory() -> MockDirectory {
        MockDirectory::new()
            .with_instance(
                InstanceBuilder::new("i-1")
                    .name("web-1")
                    .public_ip("203.0.113.10")
                    .pool("pool-1")
                    .security_group("sg-2")
                    .security_group("sg-1")
                    .build(),
            )
            .with_pool("pool-1", "web")
            .with_security_group("sg-1", "default")
            .with_security_group("sg-2", "ssh")
    }

    #[tokio::test]
    async fn test_resolves_pool_and_security_groups_in_order() {
        let dir = directory();
        let inst = resolve_instance(&dir, &RequestContext::new(), "ch-gva-2", "i-1")
            .await
            .unwrap();

        assert_eq!(inst.zone, "ch-gva-2");
        assert_eq!(inst.manager.as_ref().unwrap().name, "web");
        assert_eq!(inst.security_group_ids(), vec!["sg-2", "sg-1"]);
        assert_eq!(inst.security_group_names(), vec!["ssh", "default"]);
        assert_eq!(dir.calls(), 4);
    }

    #[tokio::test]
    async fn test_non_pool_manager_keeps_empty_name() {
        let dir = MockDirectory::new()
            .with_instance(InstanceBuilder::new("i-1").manager("sks-nodepool", "np-1").build());
        let inst = resolve_instance(&dir, &RequestContext::new(), "z", "i-1")
            .await
            .unwrap();
        let manager = inst.manager.unwrap();
        assert_eq!(manager.kind, "sks-nodepool");
        assert!(manager.name.is_empty());
        assert_eq!(dir.calls(), 1);
    }

    #[tokio::test]
    async fn test_missing_instance_is_not_found() {
        let err = resolve_instance(&directory(), &RequestContext::new(), "z", "i-404")
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::NotFound { .. }));
        assert!(AuthError::from(err).is_denial());
    }

    #[tokio::test]
    async fn test_missing_pool_or_security_group_is_internal() {
        let dir = MockDirectory::new()
            .with_instance(InstanceBuilder::new("i-1").pool("pool-gone").build());
        let err = resolve_instance(&dir, &RequestContext::new(), "z", "i-1")
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::Internal { .. }));

        let dir = MockDirectory::new()
            .with_instance(InstanceBuilder::new("i-1").security_group("sg-gone").build());
        let err = resolve_instance(&dir, &RequestContext::new(), "z", "i-1")
            .await
            .unwrap_err();
        assert!(!AuthError::from(err).is_denial());
    }

    #[tokio::test]
    async fn test_transport_failure_is_internal() {
        let dir = directory().with_fault(DirectoryResource::Instance, "i-1", Fault::Transport);
        let err = resolve_instance(&dir, &RequestContext::new(), "z", "i-1")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ResolveError::Internal {
                source: DirectoryError::Transport { .. },
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_cancellation_is_internal() {
        let dir = directory().with_fault(DirectoryResource::SecurityGroup, "sg-1", Fault::Hang);
        let ctx = RequestContext::with_timeout(Duration::from_millis(20));
        let err = resolve_instance(&dir, &ctx, "z", "i-1").await.unwrap_err();
        assert!(matches!(
            err,
            ResolveError::Internal {
                source: DirectoryError::Timeout,
                ..
            }
        ));
    }
}
