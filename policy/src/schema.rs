//! Variables available to policy expressions.
//!
//! | variable | type |
//! |----------|------|
//! | `instance_id` | string |
//! | `instance_name` | string |
//! | `instance_zone` | string |
//! | `instance_created` | timestamp |
//! | `instance_public_ip` | string (empty when the instance has none) |
//! | `instance_manager_type` | string (empty when unmanaged) |
//! | `instance_manager_id` | string |
//! | `instance_manager_name` | string (instance pool name) |
//! | `instance_security_group_ids` | list(string) |
//! | `instance_security_group_names` | list(string) |
//! | `instance_labels` | map(string, string) |
//! | `client_ip` | string |
//! | `now` | timestamp |

use crate::types::Type;
use std::collections::HashMap;
use std::sync::LazyLock;

pub const INSTANCE_ID: &str = "instance_id";
pub const INSTANCE_NAME: &str = "instance_name";
pub const INSTANCE_ZONE: &str = "instance_zone";
pub const INSTANCE_CREATED: &str = "instance_created";
pub const INSTANCE_PUBLIC_IP: &str = "instance_public_ip";
pub const INSTANCE_MANAGER_TYPE: &str = "instance_manager_type";
pub const INSTANCE_MANAGER_ID: &str = "instance_manager_id";
pub const INSTANCE_MANAGER_NAME: &str = "instance_manager_name";
pub const INSTANCE_SECURITY_GROUP_IDS: &str = "instance_security_group_ids";
pub const INSTANCE_SECURITY_GROUP_NAMES: &str = "instance_security_group_names";
pub const INSTANCE_LABELS: &str = "instance_labels";
pub const CLIENT_IP: &str = "client_ip";
pub const NOW: &str = "now";

#[derive(Debug, Clone, Default)]
pub struct Schema {
    variables: HashMap<String, Type>,
}

static INSTANCE_SCHEMA: LazyLock<Schema> = LazyLock::new(|| {
    Schema::default()
        .declare(INSTANCE_ID, Type::String)
        .declare(INSTANCE_NAME, Type::String)
        .declare(INSTANCE_ZONE, Type::String)
        .declare(INSTANCE_CREATED, Type::Timestamp)
        .declare(INSTANCE_PUBLIC_IP, Type::String)
        .declare(INSTANCE_MANAGER_TYPE, Type::String)
        .declare(INSTANCE_MANAGER_ID, Type::String)
        .declare(INSTANCE_MANAGER_NAME, Type::String)
        .declare(INSTANCE_SECURITY_GROUP_IDS, Type::list(Type::String))
        .declare(INSTANCE_SECURITY_GROUP_NAMES, Type::list(Type::String))
        .declare(INSTANCE_LABELS, Type::map(Type::String, Type::String))
        .declare(CLIENT_IP, Type::String)
        .declare(NOW, Type::Timestamp)
});

impl Schema {
    /// The fixed schema role policies are compiled against.
    pub fn instance() -> &'static Schema {
        &INSTANCE_SCHEMA
    }

    pub fn declare(mut self, name: &str, ty: Type) -> Self {
        self.variables.insert(name.to_string(), ty);
        self
    }

    pub fn lookup(&self, name: &str) -> Option<&Type> {
        self.variables.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.variables.keys().map(String::as_str)
    }
}
