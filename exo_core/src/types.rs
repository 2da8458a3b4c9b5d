use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use strum::{AsRefStr, Display, EnumString};

/// Manager type under which the directory reports instance pool members.
pub const INSTANCE_POOL_MANAGER: &str = "instance-pool";

/// Longest accepted role name, in bytes.
pub const MAX_ROLE_NAME_LEN: usize = 128;

/// Case-normalized role name.
///
/// Two names differing only by case always map to the same value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RoleName(String);

impl RoleName {
    pub fn new(name: &str) -> Option<Self> {
        if name.is_empty()
            || name.len() > MAX_ROLE_NAME_LEN
            || !name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        {
            None
        } else {
            Some(Self(name.to_ascii_lowercase()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl std::fmt::Display for RoleName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for RoleName {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s).ok_or_else(|| format!("invalid role name {s:?}"))
    }
}

/// Resource kinds exposed by the compute directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, Display, AsRefStr)]
#[strum(serialize_all = "kebab-case")]
pub enum DirectoryResource {
    Instance,
    InstancePool,
    SecurityGroup,
}

/// Reference to the entity managing an instance, as returned by the directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagerRef {
    pub kind: String,
    pub id: String,
}

/// Instance as returned by a single directory lookup, before the manager
/// and security groups are resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceRecord {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub public_ip: Option<String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    pub manager: Option<ManagerRef>,
    #[serde(default)]
    pub security_group_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstancePool {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityGroup {
    pub id: String,
    pub name: String,
}

/// Resolved instance manager. `name` is empty unless the manager is an
/// instance pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceManager {
    pub kind: String,
    pub id: String,
    pub name: String,
}

/// Fully resolved instance attributes. Built fresh for every login attempt
/// and never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    pub id: String,
    pub name: String,
    pub zone: String,
    pub created_at: DateTime<Utc>,
    pub public_ip: Option<String>,
    pub labels: BTreeMap<String, String>,
    pub manager: Option<InstanceManager>,
    pub security_groups: Vec<SecurityGroup>,
}

impl Instance {
    pub fn security_group_ids(&self) -> Vec<String> {
        self.security_groups.iter().map(|sg| sg.id.clone()).collect()
    }

    pub fn security_group_names(&self) -> Vec<String> {
        self.security_groups
            .iter()
            .map(|sg| sg.name.clone())
            .collect()
    }
}

/// Token issuance parameters attached to a role. Durations are stored as
/// whole seconds; zero means "use the system default".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenParams {
    #[serde(default)]
    pub token_ttl: u64,
    #[serde(default)]
    pub token_max_ttl: u64,
    #[serde(default)]
    pub token_period: u64,
    #[serde(default)]
    pub token_num_uses: u32,
    #[serde(default)]
    pub token_bound_cidrs: Vec<String>,
    #[serde(default)]
    pub token_policies: Vec<String>,
}

impl TokenParams {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.token_ttl)
    }

    pub fn max_ttl(&self) -> Duration {
        Duration::from_secs(self.token_max_ttl)
    }

    pub fn period(&self) -> Duration {
        Duration::from_secs(self.token_period)
    }
}

/// Data embedded in an issued session and handed back at renewal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenewalState {
    pub role: String,
    pub instance_id: String,
    pub zone: String,
}
