//! Login and renewal.
//!
//! ```text
//! request -> role resolved -> instance resolved -> policy evaluated -> granted | denied
//! ```

use crate::backend::Backend;
use crate::resolver::{ResolveError, resolve_instance};
use crate::role::{RoleEntry, normalize_name};
use chrono::Utc;
use errors::AuthError;
use exo_core::{RenewalState, RequestContext};
use policy::EvaluationContext;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, error, warn};

/// Login parameters. `role` and `instance` are used by default; with the
/// AppRole toggle on, `role_id` and `secret_id` (or `instance_id`) are.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoginRequest {
    pub role: Option<String>,
    pub instance: Option<String>,
    pub role_id: Option<String>,
    pub secret_id: Option<String>,
    pub instance_id: Option<String>,
}

impl LoginRequest {
    pub fn new(role: impl Into<String>, instance: impl Into<String>) -> Self {
        Self {
            role: Some(role.into()),
            instance: Some(instance.into()),
            ..Default::default()
        }
    }

    pub fn approle(role_id: impl Into<String>, secret_id: impl Into<String>) -> Self {
        Self {
            role_id: Some(role_id.into()),
            secret_id: Some(secret_id.into()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConnectionInfo {
    pub remote_addr: Option<String>,
}

impl ConnectionInfo {
    pub fn from_addr(addr: impl Into<String>) -> Self {
        Self {
            remote_addr: Some(addr.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Alias {
    pub name: String,
    pub metadata: BTreeMap<String, String>,
}

/// Issued session parameters. Durations are in seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Auth {
    pub policies: Vec<String>,
    pub ttl: u64,
    pub max_ttl: u64,
    pub period: u64,
    pub num_uses: u32,
    pub bound_cidrs: Vec<String>,
    pub metadata: BTreeMap<String, String>,
    pub alias: Alias,
    pub display_name: String,
    pub renewal_state: RenewalState,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenewResponse {
    pub ttl: u64,
    pub max_ttl: u64,
    pub period: u64,
}

fn required(value: Option<&str>, field: &str) -> Result<String, AuthError> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| AuthError::missing(field))
}

struct Credentials {
    role: Role,
    instance_id: String,
}

enum Role {
    Name(String),
    Id(String),
}

impl Backend {
    fn credentials(req: &LoginRequest, approle_mode: bool) -> Result<Credentials, AuthError> {
        if approle_mode {
            let role_id = required(req.role_id.as_deref(), "role_id")?;
            let instance_id = required(
                req.secret_id.as_deref().or(req.instance_id.as_deref()),
                "instance_id",
            )?;
            Ok(Credentials {
                role: Role::Id(role_id),
                instance_id,
            })
        } else {
            Ok(Credentials {
                role: Role::Name(required(req.role.as_deref(), "role")?),
                instance_id: required(req.instance.as_deref(), "instance")?,
            })
        }
    }

    /// Loads the role a login names. Never repairs or migrates storage.
    async fn resolve_role(&self, role: &Role) -> Result<(String, RoleEntry), AuthError> {
        let roles = self.roles();
        match role {
            Role::Name(name) => {
                let name = normalize_name(name).map_err(|_| AuthError::InvalidRole)?;
                let entry = roles.peek(&name).await?.ok_or(AuthError::InvalidRole)?;
                Ok((name, entry))
            }
            Role::Id(role_id) => {
                let name = roles
                    .index()
                    .lookup(role_id)
                    .await?
                    .ok_or(AuthError::InvalidRole)?;
                let entry = roles.peek(&name).await?.ok_or(AuthError::InvalidRole)?;
                if entry.role_id != *role_id {
                    return Err(AuthError::InvalidRole);
                }
                Ok((name, entry))
            }
        }
    }

    /// Authenticates an instance.
    ///
    /// # Errors
    ///
    /// Denials are [`AuthError::InvalidRole`] or [`AuthError::AuthFailed`]
    /// and share one public message per class. Directory, storage and
    /// evaluation faults are [`AuthError::InternalError`].
    pub async fn login(
        &self,
        ctx: &RequestContext,
        req: &LoginRequest,
        conn: &ConnectionInfo,
    ) -> Result<Auth, AuthError> {
        let config = self.api_config().await?.ok_or_else(|| {
            error!("Login attempted before the backend was configured");
            AuthError::internal("unable to retrieve backend configuration")
        })?;
        let creds = Self::credentials(req, config.approle_mode)?;
        let remote_addr = conn
            .remote_addr
            .as_deref()
            .filter(|a| !a.is_empty())
            .ok_or_else(|| AuthError::internal("failed to get connection information"))?;

        let (name, role) = self.resolve_role(&creds.role).await.inspect_err(|e| {
            if e.is_denial() {
                warn!(remote_addr = %remote_addr, "Login with unknown role");
            }
        })?;
        debug!(role = %name, instance_id = %creds.instance_id, "Role resolved");

        let policy = self.roles().compiled(&name, &role)?;
        let directory = self.directory(&config).await?;

        let instance = match resolve_instance(
            directory.as_ref(),
            ctx,
            &config.zone,
            &creds.instance_id,
        )
        .await
        {
            Ok(instance) => instance,
            Err(e @ ResolveError::NotFound { .. }) => {
                warn!(role = %name, remote_addr = %remote_addr, error = %e, "Login denied");
                return Err(e.into());
            }
            Err(e) => {
                error!(role = %name, remote_addr = %remote_addr, error = %e, "Instance resolution failed");
                return Err(e.into());
            }
        };
        debug!(role = %name, instance_id = %instance.id, "Instance resolved");

        let eval_ctx = EvaluationContext::for_instance(&instance, remote_addr, Utc::now());
        match policy.evaluate(eval_ctx) {
            Ok(true) => {}
            Ok(false) => {
                warn!(
                    role = %name,
                    instance_id = %instance.id,
                    remote_addr = %remote_addr,
                    "Login denied by role policy"
                );
                return Err(AuthError::denied("policy evaluated to false"));
            }
            Err(e) => {
                error!(role = %name, remote_addr = %remote_addr, error = %e, "Policy evaluation failed");
                return Err(e.into());
            }
        }
        debug!(role = %name, instance_id = %instance.id, "Policy evaluated");

        let metadata = BTreeMap::from([
            ("role".to_string(), name.clone()),
            ("instance_id".to_string(), instance.id.clone()),
            ("zone".to_string(), instance.zone.clone()),
        ]);
        Ok(Auth {
            policies: role.token.token_policies.clone(),
            ttl: role.token.token_ttl,
            max_ttl: role.token.token_max_ttl,
            period: role.token.token_period,
            num_uses: role.token.token_num_uses,
            bound_cidrs: role.token.token_bound_cidrs.clone(),
            alias: Alias {
                name: instance.id.clone(),
                metadata: metadata.clone(),
            },
            metadata,
            display_name: instance.name,
            renewal_state: RenewalState {
                role: name,
                instance_id: instance.id,
                zone: instance.zone,
            },
        })
    }

    /// Alias name a login would produce, without resolving anything.
    pub async fn alias_lookahead(&self, req: &LoginRequest) -> Result<String, AuthError> {
        let approle_mode = self
            .api_config()
            .await?
            .is_some_and(|config| config.approle_mode);
        Ok(Self::credentials(req, approle_mode)?.instance_id)
    }

    /// Re-applies the role's current token parameters. Never calls the
    /// directory or re-evaluates the policy.
    pub async fn renew(&self, state: &RenewalState) -> Result<RenewResponse, AuthError> {
        let Some(role) = self.roles().peek(&state.role).await? else {
            warn!(role = %state.role, instance_id = %state.instance_id, "Renewal for deleted role");
            return Err(AuthError::RenewalDenied {
                role: state.role.clone(),
            });
        };
        debug!(role = %state.role, instance_id = %state.instance_id, "Session renewed");
        Ok(RenewResponse {
            ttl: role.token.token_ttl,
            max_ttl: role.token.token_max_ttl,
            period: role.token.token_period,
        })
    }
}
