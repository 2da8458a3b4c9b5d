//! In-memory compute directory with call counting and fault injection.

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;
use errors::DirectoryError;
use exo_core::{
    ComputeDirectory, DirectoryResource, INSTANCE_POOL_MANAGER, InstancePool, InstanceRecord,
    ManagerRef, RequestContext, SecurityGroup,
};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// How an injected fault surfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    Transport,
    Timeout,
    ServerError,
    /// Never answers, so only cancellation or a deadline ends the call.
    Hang,
}

impl Fault {
    fn to_error(self) -> DirectoryError {
        match self {
            Self::Transport => DirectoryError::Transport {
                reason: "connection reset".to_string(),
            },
            Self::Timeout => DirectoryError::Timeout,
            Self::ServerError => DirectoryError::Api {
                status: 500,
                message: "internal server error".to_string(),
            },
            Self::Hang => DirectoryError::Timeout,
        }
    }
}

#[derive(Debug, Default)]
pub struct MockDirectory {
    instances: DashMap<String, InstanceRecord>,
    pools: DashMap<String, InstancePool>,
    security_groups: DashMap<String, SecurityGroup>,
    faults: DashMap<(DirectoryResource, String), Fault>,
    calls: AtomicUsize,
}

impl MockDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_instance(self, record: InstanceRecord) -> Self {
        self.instances.insert(record.id.clone(), record);
        self
    }

    pub fn with_pool(self, id: &str, name: &str) -> Self {
        self.pools.insert(
            id.to_string(),
            InstancePool {
                id: id.to_string(),
                name: name.to_string(),
            },
        );
        self
    }

    pub fn with_security_group(self, id: &str, name: &str) -> Self {
        self.security_groups.insert(
            id.to_string(),
            SecurityGroup {
                id: id.to_string(),
                name: name.to_string(),
            },
        );
        self
    }

    pub fn with_fault(self, resource: DirectoryResource, id: &str, fault: Fault) -> Self {
        self.faults.insert((resource, id.to_string()), fault);
        self
    }

    pub fn remove_instance(&self, id: &str) {
        self.instances.remove(id);
    }

    /// Total number of directory calls served so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn lookup<T: Clone>(
        &self,
        ctx: &RequestContext,
        resource: DirectoryResource,
        id: &str,
        table: &DashMap<String, T>,
    ) -> Result<T, DirectoryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let fault = self.faults.get(&(resource, id.to_string())).map(|f| *f);
        ctx.run(async {
            match fault {
                Some(Fault::Hang) => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Err(Fault::Hang.to_error())
                }
                Some(fault) => Err(fault.to_error()),
                None => table
                    .get(id)
                    .map(|entry| entry.value().clone())
                    .ok_or_else(|| DirectoryError::NotFound {
                        resource: resource.to_string(),
                        id: id.to_string(),
                    }),
            }
        })
        .await
    }
}

#[async_trait]
impl ComputeDirectory for MockDirectory {
    async fn get_instance(
        &self,
        ctx: &RequestContext,
        _zone: &str,
        id: &str,
    ) -> Result<InstanceRecord, DirectoryError> {
        self.lookup(ctx, DirectoryResource::Instance, id, &self.instances)
            .await
    }

    async fn get_instance_pool(
        &self,
        ctx: &RequestContext,
        _zone: &str,
        id: &str,
    ) -> Result<InstancePool, DirectoryError> {
        self.lookup(ctx, DirectoryResource::InstancePool, id, &self.pools)
            .await
    }

    async fn get_security_group(
        &self,
        ctx: &RequestContext,
        _zone: &str,
        id: &str,
    ) -> Result<SecurityGroup, DirectoryError> {
        self.lookup(ctx, DirectoryResource::SecurityGroup, id, &self.security_groups)
            .await
    }
}

/// Builder for directory instance records.
#[derive(Debug, Clone)]
pub struct InstanceBuilder {
    record: InstanceRecord,
}

impl InstanceBuilder {
    pub fn new(id: &str) -> Self {
        Self {
            record: InstanceRecord {
                id: id.to_string(),
                name: format!("instance-{id}"),
                created_at: Utc::now(),
                public_ip: None,
                labels: BTreeMap::new(),
                manager: None,
                security_group_ids: Vec::new(),
            },
        }
    }

    pub fn name(mut self, name: &str) -> Self {
        self.record.name = name.to_string();
        self
    }

    pub fn created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.record.created_at = created_at;
        self
    }

    pub fn age(self, age: TimeDelta) -> Self {
        self.created_at(Utc::now() - age)
    }

    pub fn public_ip(mut self, ip: &str) -> Self {
        self.record.public_ip = Some(ip.to_string());
        self
    }

    pub fn label(mut self, key: &str, value: &str) -> Self {
        self.record.labels.insert(key.to_string(), value.to_string());
        self
    }

    pub fn pool(self, pool_id: &str) -> Self {
        self.manager(INSTANCE_POOL_MANAGER, pool_id)
    }

    pub fn manager(mut self, kind: &str, id: &str) -> Self {
        self.record.manager = Some(ManagerRef {
            kind: kind.to_string(),
            id: id.to_string(),
        });
        self
    }

    pub fn security_group(mut self, id: &str) -> Self {
        self.record.security_group_ids.push(id.to_string());
        self
    }

    pub fn build(self) -> InstanceRecord {
        self.record
    }
}
