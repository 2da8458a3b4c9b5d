//! Role entries, write requests and the legacy constraint schema.

use errors::AuthError;
use exo_core::{MAX_ROLE_NAME_LEN, RoleName, TokenParams};
use policy::ast::quote;
use policy::duration::format_duration;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use strum::{AsRefStr, Display, EnumString};

pub const ROLE_PREFIX: &str = "role/";

pub fn role_key(name: &str) -> String {
    format!("{ROLE_PREFIX}{name}")
}

/// Normalizes a role name. Writes and logins go through the same rules.
pub fn normalize_name(name: &str) -> Result<String, AuthError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(AuthError::missing("role_name"));
    }
    RoleName::new(name).map(RoleName::into_inner).ok_or_else(|| {
        AuthError::invalid(
            "role_name",
            format!(
                "{name:?} must be at most {MAX_ROLE_NAME_LEN} characters of letters, digits, '.', '_' or '-'"
            ),
        )
    })
}

/// Authorization rule of a role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RolePolicy {
    Expression { validator: String },
}

impl RolePolicy {
    pub fn validator(&self) -> &str {
        match self {
            Self::Expression { validator } => validator,
        }
    }
}

/// Persisted role, stored as JSON under `role/<name>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleEntry {
    pub role_id: String,
    pub policy: RolePolicy,
    #[serde(flatten)]
    pub token: TokenParams,
}

impl RoleEntry {
    pub fn validator(&self) -> &str {
        self.policy.validator()
    }
}

/// Any role entry shape found in storage.
///
/// The shape is picked from marker keys: `policy` for current entries, a
/// top-level `validator` or any `instance_*` key for legacy ones. An entry
/// matching none of them, or failing to parse as the shape it claims, is a
/// deserialization error and is never rewritten.
#[derive(Debug)]
pub(crate) enum StoredRole {
    Current(RoleEntry),
    BareExpression(BareExpressionEntry),
    Constraints(ConstraintEntry),
}

const LEGACY_CONSTRAINT_PREFIX: &str = "instance_";

impl<'de> Deserialize<'de> for StoredRole {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        use serde::de::Error;

        let value = serde_json::Value::deserialize(deserializer)?;
        let Some(fields) = value.as_object() else {
            return Err(D::Error::custom("role entry is not an object"));
        };

        if fields.contains_key("policy") {
            serde_json::from_value(value)
                .map(Self::Current)
                .map_err(|e| D::Error::custom(format!("role entry: {e}")))
        } else if fields.contains_key("validator") {
            serde_json::from_value(value)
                .map(Self::BareExpression)
                .map_err(|e| D::Error::custom(format!("legacy expression entry: {e}")))
        } else if fields
            .keys()
            .any(|k| k.starts_with(LEGACY_CONSTRAINT_PREFIX))
        {
            serde_json::from_value(value)
                .map(Self::Constraints)
                .map_err(|e| D::Error::custom(format!("legacy constraint entry: {e}")))
        } else {
            Err(D::Error::custom("unrecognized role entry schema"))
        }
    }
}

impl StoredRole {
    pub(crate) fn role_id(&self) -> &str {
        match self {
            Self::Current(entry) => &entry.role_id,
            Self::BareExpression(entry) => &entry.role_id,
            Self::Constraints(entry) => &entry.role_id,
        }
    }
}

/// Token durations written by older releases, in nanoseconds.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct LegacyTokenParams {
    #[serde(default)]
    token_ttl: i64,
    #[serde(default)]
    token_max_ttl: i64,
    #[serde(default)]
    token_period: i64,
    #[serde(default)]
    token_num_uses: i64,
    #[serde(default)]
    token_bound_cidrs: Option<Vec<String>>,
    #[serde(default)]
    token_policies: Option<Vec<String>>,
}

const NANOS_PER_SECOND: i64 = 1_000_000_000;

impl From<LegacyTokenParams> for TokenParams {
    fn from(legacy: LegacyTokenParams) -> Self {
        let secs = |ns: i64| (ns.max(0) / NANOS_PER_SECOND) as u64;
        Self {
            token_ttl: secs(legacy.token_ttl),
            token_max_ttl: secs(legacy.token_max_ttl),
            token_period: secs(legacy.token_period),
            token_num_uses: u32::try_from(legacy.token_num_uses.max(0)).unwrap_or(u32::MAX),
            token_bound_cidrs: legacy.token_bound_cidrs.unwrap_or_default(),
            token_policies: legacy.token_policies.unwrap_or_default(),
        }
    }
}

/// Expression stored as a top-level `validator` field.
#[derive(Debug, Deserialize)]
pub(crate) struct BareExpressionEntry {
    validator: String,
    #[serde(default)]
    role_id: String,
    #[serde(flatten)]
    token: LegacyTokenParams,
}

/// Structured constraint schema, predating expressions.
#[derive(Debug, Deserialize)]
pub(crate) struct ConstraintEntry {
    #[serde(default)]
    role_id: String,
    #[serde(default)]
    instance_match_ip: bool,
    #[serde(default)]
    instance_bound_cidrs: Option<Vec<String>>,
    #[serde(default)]
    instance_max_age: i64,
    #[serde(default)]
    instance_allowed_tags: Option<Vec<String>>,
    #[serde(default)]
    instance_allowed_pool_ids: Option<Vec<String>>,
    #[serde(flatten)]
    token: LegacyTokenParams,
}

fn any_of(terms: Vec<String>) -> String {
    match terms.len() {
        1 => terms.into_iter().next().unwrap_or_default(),
        _ => format!("({})", terms.join(" || ")),
    }
}

impl ConstraintEntry {
    /// Equivalent expression. A constraint set with no constraint at all
    /// never matched anything, so it becomes `false`.
    pub(crate) fn to_expression(&self) -> String {
        let mut clauses = Vec::new();

        if self.instance_match_ip {
            clauses.push("client_ip == instance_public_ip".to_string());
        }

        let cidrs = self.instance_bound_cidrs.as_deref().unwrap_or_default();
        if !cidrs.is_empty() {
            clauses.push(any_of(
                cidrs
                    .iter()
                    .map(|c| format!("in_cidr(client_ip, {})", quote(c)))
                    .collect(),
            ));
        }

        if self.instance_max_age > 0 {
            let max_age = chrono::TimeDelta::nanoseconds(self.instance_max_age);
            clauses.push(format!(
                "instance_created + duration({}) >= now",
                quote(&format_duration(max_age))
            ));
        }

        let tags = self.instance_allowed_tags.as_deref().unwrap_or_default();
        if !tags.is_empty() {
            clauses.push(any_of(
                tags.iter()
                    .map(|tag| match tag.split_once('=') {
                        Some((k, v)) => format!(
                            "({k} in instance_labels && instance_labels[{k}] == {v})",
                            k = quote(k),
                            v = quote(v)
                        ),
                        None => format!("{} in instance_labels", quote(tag)),
                    })
                    .collect(),
            ));
        }

        let pools = self.instance_allowed_pool_ids.as_deref().unwrap_or_default();
        if !pools.is_empty() {
            let ids: Vec<String> = pools.iter().map(|p| quote(p)).collect();
            clauses.push(format!(
                "(instance_manager_type == \"instance-pool\" && instance_manager_id in [{}])",
                ids.join(", ")
            ));
        }

        if clauses.is_empty() {
            "false".to_string()
        } else {
            clauses.join(" && ")
        }
    }
}

impl StoredRole {
    /// Canonical form of the stored entry and whether it had to be converted.
    pub(crate) fn into_canonical(self) -> (RoleEntry, bool) {
        match self {
            Self::Current(entry) => (entry, false),
            Self::BareExpression(entry) => (
                RoleEntry {
                    role_id: entry.role_id,
                    policy: RolePolicy::Expression {
                        validator: entry.validator,
                    },
                    token: entry.token.into(),
                },
                true,
            ),
            Self::Constraints(entry) => {
                let validator = entry.to_expression();
                (
                    RoleEntry {
                        role_id: entry.role_id,
                        policy: RolePolicy::Expression { validator },
                        token: entry.token.into(),
                    },
                    true,
                )
            }
        }
    }
}

/// Admin create/update request. Absent fields keep their current value.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RoleWriteRequest {
    #[serde(default)]
    pub name: String,
    pub validator: Option<String>,
    pub role_id: Option<String>,
    pub token_ttl: Option<u64>,
    pub token_max_ttl: Option<u64>,
    pub token_period: Option<u64>,
    pub token_num_uses: Option<u32>,
    pub token_bound_cidrs: Option<Vec<String>>,
    pub token_policies: Option<Vec<String>>,
}

impl RoleWriteRequest {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn validator(mut self, validator: impl Into<String>) -> Self {
        self.validator = Some(validator.into());
        self
    }

    /// Merges the request into `token`.
    pub(crate) fn apply_token_params(&self, token: &mut TokenParams) {
        if let Some(v) = self.token_ttl {
            token.token_ttl = v;
        }
        if let Some(v) = self.token_max_ttl {
            token.token_max_ttl = v;
        }
        if let Some(v) = self.token_period {
            token.token_period = v;
        }
        if let Some(v) = self.token_num_uses {
            token.token_num_uses = v;
        }
        if let Some(v) = &self.token_bound_cidrs {
            token.token_bound_cidrs = v.iter().map(|c| c.trim().to_string()).collect();
        }
        if let Some(v) = &self.token_policies {
            token.token_policies = normalize_policies(v);
        }
    }
}

fn normalize_policies(policies: &[String]) -> Vec<String> {
    let mut out: Vec<String> = policies
        .iter()
        .map(|p| p.trim().to_lowercase())
        .filter(|p| !p.is_empty())
        .collect();
    out.sort();
    out.dedup();
    out
}

/// Checks token parameters against the lease ceiling. Returns warnings for
/// values that will only be truncated at issuance.
pub fn validate_token_params(
    token: &TokenParams,
    max_lease_ttl: Duration,
) -> Result<Vec<String>, AuthError> {
    let ceiling = max_lease_ttl.as_secs();
    let mut warnings = Vec::new();

    if token.token_ttl > 0 && token.token_max_ttl > 0 && token.token_ttl > token.token_max_ttl {
        return Err(AuthError::invalid(
            "token_ttl",
            "token_ttl should not be greater than token_max_ttl",
        ));
    }

    if token.token_period > ceiling {
        return Err(AuthError::invalid(
            "token_period",
            format!(
                "period of \"{}s\" is greater than the backend's maximum lease TTL of \"{ceiling}s\"",
                token.token_period
            ),
        ));
    }

    if token.token_ttl > ceiling {
        warnings.push(
            "token_ttl is greater than the backend mount's maximum TTL value; issued tokens' TTL value will be truncated"
                .to_string(),
        );
    }
    if token.token_max_ttl > ceiling {
        warnings.push(
            "token_max_ttl is greater than the backend mount's maximum TTL value; issued tokens' max TTL value will be truncated"
                .to_string(),
        );
    }

    for cidr in &token.token_bound_cidrs {
        if utils::Cidr::parse(cidr).is_none() {
            return Err(AuthError::invalid(
                "token_bound_cidrs",
                format!("invalid CIDR block {cidr:?}"),
            ));
        }
    }

    Ok(warnings)
}

/// Individually addressable role fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum RoleField {
    Validator,
    RoleId,
    TokenTtl,
    TokenMaxTtl,
    TokenPeriod,
    TokenNumUses,
    TokenBoundCidrs,
    TokenPolicies,
}

/// Role as returned by reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoleView {
    pub name: String,
    pub role_id: String,
    pub validator: String,
    #[serde(flatten)]
    pub token: TokenParams,
}

impl RoleView {
    pub(crate) fn new(name: &str, entry: &RoleEntry) -> Self {
        Self {
            name: name.to_string(),
            role_id: entry.role_id.clone(),
            validator: entry.validator().to_string(),
            token: entry.token.clone(),
        }
    }

    pub fn field(&self, field: RoleField) -> serde_json::Value {
        use serde_json::json;
        match field {
            RoleField::Validator => json!(self.validator),
            RoleField::RoleId => json!(self.role_id),
            RoleField::TokenTtl => json!(self.token.token_ttl),
            RoleField::TokenMaxTtl => json!(self.token.token_max_ttl),
            RoleField::TokenPeriod => json!(self.token.token_period),
            RoleField::TokenNumUses => json!(self.token.token_num_uses),
            RoleField::TokenBoundCidrs => json!(self.token.token_bound_cidrs),
            RoleField::TokenPolicies => json!(self.token.token_policies),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_normalize_name() {
        assert_eq!(normalize_name("Edge-Nodes").unwrap(), "edge-nodes");
        assert!(matches!(
            normalize_name("   "),
            Err(AuthError::MissingField { .. })
        ));
        assert!(matches!(
            normalize_name("a/b"),
            Err(AuthError::InvalidFieldValue { .. })
        ));
    }

    #[test]
    fn test_normalize_name_enforces_length() {
        let longest = "a".repeat(MAX_ROLE_NAME_LEN);
        assert_eq!(normalize_name(&longest).unwrap(), longest);
        assert!(matches!(
            normalize_name(&"a".repeat(MAX_ROLE_NAME_LEN + 1)),
            Err(AuthError::InvalidFieldValue { ref field, .. }) if field == "role_name"
        ));
    }

    #[test]
    fn test_entry_is_tagged() {
        let entry = RoleEntry {
            role_id: "id-1".to_string(),
            policy: RolePolicy::Expression {
                validator: "true".to_string(),
            },
            token: TokenParams {
                token_ttl: 60,
                ..Default::default()
            },
        };
        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["policy"]["kind"], "expression");
        assert_eq!(value["policy"]["validator"], "true");
        assert_eq!(value["token_ttl"], 60);
    }

    #[test]
    fn test_stored_shapes_are_detected() {
        let current: StoredRole = serde_json::from_value(json!({
            "role_id": "id-1",
            "policy": {"kind": "expression", "validator": "true"},
            "token_ttl": 60
        }))
        .unwrap();
        assert!(matches!(current, StoredRole::Current(_)));

        let bare: StoredRole = serde_json::from_value(json!({
            "validator": "client_ip == instance_public_ip",
            "token_ttl": 3_600_000_000_000i64
        }))
        .unwrap();
        let (entry, migrated) = bare.into_canonical();
        assert!(migrated);
        assert_eq!(entry.token.token_ttl, 3600);
        assert_eq!(entry.validator(), "client_ip == instance_public_ip");

        let constraints: StoredRole = serde_json::from_value(json!({
            "role_id": "id-2",
            "instance_match_ip": true,
            "instance_bound_cidrs": null,
            "token_policies": ["dev"]
        }))
        .unwrap();
        assert_eq!(constraints.role_id(), "id-2");
        assert!(matches!(constraints, StoredRole::Constraints(_)));
    }

    #[test]
    fn test_malformed_current_entry_is_not_treated_as_legacy() {
        for value in [
            json!({
                "role_id": "id-1",
                "policy": {"kind": "cel", "validator": "true"},
                "token_ttl": 600
            }),
            json!({
                "role_id": "id-1",
                "policy": {"kind": "expression", "validator": "true"},
                "token_num_uses": -1
            }),
            json!({"role_id": "id-1", "token_ttl": 600}),
            json!("true"),
        ] {
            assert!(serde_json::from_value::<StoredRole>(value.clone()).is_err(), "{value}");
        }
    }

    #[test]
    fn test_constraints_become_expression() {
        let entry: ConstraintEntry = serde_json::from_value(json!({
            "instance_match_ip": true,
            "instance_bound_cidrs": ["10.0.0.0/8", "192.168.1.0/24"],
            "instance_max_age": 600_000_000_000i64,
            "instance_allowed_tags": ["env=prod", "canary"],
            "instance_allowed_pool_ids": ["pool-1"]
        }))
        .unwrap();
        let expr = entry.to_expression();
        assert_eq!(
            expr,
            concat!(
                "client_ip == instance_public_ip",
                r#" && (in_cidr(client_ip, "10.0.0.0/8") || in_cidr(client_ip, "192.168.1.0/24"))"#,
                r#" && instance_created + duration("600s") >= now"#,
                r#" && (("env" in instance_labels && instance_labels["env"] == "prod") || "canary" in instance_labels)"#,
                r#" && (instance_manager_type == "instance-pool" && instance_manager_id in ["pool-1"])"#,
            )
        );
        assert!(policy::compile(&expr).is_ok());
    }

    #[test]
    fn test_empty_constraints_deny() {
        let entry: ConstraintEntry = serde_json::from_value(json!({})).unwrap();
        assert_eq!(entry.to_expression(), "false");
    }

    #[test]
    fn test_token_param_validation() {
        let ceiling = Duration::from_secs(3600);
        let ok = TokenParams {
            token_ttl: 60,
            token_max_ttl: 120,
            ..Default::default()
        };
        assert!(validate_token_params(&ok, ceiling).unwrap().is_empty());

        let inverted = TokenParams {
            token_ttl: 120,
            token_max_ttl: 60,
            ..Default::default()
        };
        assert!(validate_token_params(&inverted, ceiling).is_err());

        let long_period = TokenParams {
            token_period: 7200,
            ..Default::default()
        };
        let err = validate_token_params(&long_period, ceiling).unwrap_err();
        assert!(err.to_string().contains("maximum lease TTL"));

        let long_max = TokenParams {
            token_max_ttl: 7200,
            ..Default::default()
        };
        let warnings = validate_token_params(&long_max, ceiling).unwrap();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("will be truncated"));

        let bad_cidr = TokenParams {
            token_bound_cidrs: vec!["10.0.0.0/33".to_string()],
            ..Default::default()
        };
        assert!(validate_token_params(&bad_cidr, ceiling).is_err());
    }

    #[test]
    fn test_apply_token_params_normalizes_policies() {
        let mut token = TokenParams::default();
        let req = RoleWriteRequest {
            token_policies: Some(vec![" Dev ".to_string(), "ops".to_string(), "dev".to_string()]),
            token_ttl: Some(30),
            ..Default::default()
        };
        req.apply_token_params(&mut token);
        assert_eq!(token.token_policies, vec!["dev", "ops"]);
        assert_eq!(token.token_ttl, 30);
    }

    #[test]
    fn test_role_field_names() {
        assert_eq!("token_max_ttl".parse::<RoleField>().unwrap(), RoleField::TokenMaxTtl);
        assert_eq!(RoleField::RoleId.as_ref(), "role_id");
        assert!("zone".parse::<RoleField>().is_err());
    }
}
