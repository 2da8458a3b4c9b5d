//! Per-attempt variable bindings.

use crate::schema;
use crate::value::Value;
use chrono::{DateTime, Utc};
use exo_core::Instance;
use std::collections::HashMap;

/// Bindings for a single evaluation. Consumed by
/// [`CompiledPolicy::evaluate`](crate::CompiledPolicy::evaluate).
#[derive(Debug, Clone, Default)]
pub struct EvaluationContext {
    bindings: HashMap<String, Value>,
}

impl EvaluationContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.bindings.insert(name.to_string(), value.into());
        self
    }

    /// Binds every schema variable from a resolved instance and the request.
    pub fn for_instance(instance: &Instance, client_ip: &str, now: DateTime<Utc>) -> Self {
        let (manager_type, manager_id, manager_name) = match &instance.manager {
            Some(m) => (m.kind.as_str(), m.id.as_str(), m.name.as_str()),
            None => ("", "", ""),
        };

        Self::new()
            .bind(schema::INSTANCE_ID, instance.id.as_str())
            .bind(schema::INSTANCE_NAME, instance.name.as_str())
            .bind(schema::INSTANCE_ZONE, instance.zone.as_str())
            .bind(schema::INSTANCE_CREATED, instance.created_at)
            .bind(
                schema::INSTANCE_PUBLIC_IP,
                instance.public_ip.as_deref().unwrap_or_default(),
            )
            .bind(schema::INSTANCE_MANAGER_TYPE, manager_type)
            .bind(schema::INSTANCE_MANAGER_ID, manager_id)
            .bind(schema::INSTANCE_MANAGER_NAME, manager_name)
            .bind(
                schema::INSTANCE_SECURITY_GROUP_IDS,
                Value::string_list(instance.security_group_ids()),
            )
            .bind(
                schema::INSTANCE_SECURITY_GROUP_NAMES,
                Value::string_list(instance.security_group_names()),
            )
            .bind(
                schema::INSTANCE_LABELS,
                Value::string_map(instance.labels.clone()),
            )
            .bind(schema::CLIENT_IP, client_ip)
            .bind(schema::NOW, now)
    }

    pub(crate) fn get(&self, name: &str) -> Option<&Value> {
        self.bindings.get(name)
    }
}
