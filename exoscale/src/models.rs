//! Wire representations of Exoscale API v2 resources.

use chrono::{DateTime, Utc};
use exo_core::{InstancePool, InstanceRecord, ManagerRef, SecurityGroup};
use serde::Deserialize;
use std::collections::BTreeMap;

#[derive(Debug, Deserialize)]
pub(crate) struct ResourceRef {
    pub id: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ManagerDto {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub(crate) struct InstanceDto {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub public_ip: Option<String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub manager: Option<ManagerDto>,
    #[serde(default)]
    pub security_groups: Vec<ResourceRef>,
}

impl From<InstanceDto> for InstanceRecord {
    fn from(dto: InstanceDto) -> Self {
        Self {
            id: dto.id,
            name: dto.name,
            created_at: dto.created_at,
            public_ip: dto.public_ip.filter(|ip| !ip.is_empty()),
            labels: dto.labels,
            manager: dto.manager.map(|m| ManagerRef {
                kind: m.kind,
                id: m.id,
            }),
            security_group_ids: dto.security_groups.into_iter().map(|sg| sg.id).collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct NamedDto {
    pub id: String,
    #[serde(default)]
    pub name: String,
}

impl From<NamedDto> for InstancePool {
    fn from(dto: NamedDto) -> Self {
        Self {
            id: dto.id,
            name: dto.name,
        }
    }
}

impl From<NamedDto> for SecurityGroup {
    fn from(dto: NamedDto) -> Self {
        Self {
            id: dto.id,
            name: dto.name,
        }
    }
}
