//! Role persistence with identifier rotation and read repair.
//!
//! Lock order is always role name first, then identifier. Role locks and
//! identifier locks come from separate pools.

use crate::Response;
use crate::identity::IdentityIndex;
use crate::role::{
    ROLE_PREFIX, RoleEntry, RolePolicy, RoleView, RoleWriteRequest, StoredRole, normalize_name,
    role_key, validate_token_params,
};
use dashmap::DashMap;
use errors::AuthError;
use exo_core::Storage;
use policy::CompiledPolicy;
use std::sync::Arc;
use std::time::Duration;
use storage::{LockPool, get_json, put_json};
use tracing::{debug, error, info, warn};

pub const MISSING_INDEX_WARNING: &str = "Role identifier was missing an index back to role name. \
     A new index has been added. Please report this observation.";

pub struct RoleStore {
    storage: Arc<dyn Storage>,
    locks: LockPool,
    index: IdentityIndex,
    policies: DashMap<String, Arc<CompiledPolicy>>,
}

impl RoleStore {
    pub fn new(storage: Arc<dyn Storage>, lock_pool_size: usize) -> Self {
        Self {
            index: IdentityIndex::new(storage.clone(), lock_pool_size),
            locks: LockPool::new(lock_pool_size),
            policies: DashMap::new(),
            storage,
        }
    }

    pub fn index(&self) -> &IdentityIndex {
        &self.index
    }

    async fn read_stored(&self, name: &str) -> Result<Option<StoredRole>, AuthError> {
        Ok(get_json(self.storage.as_ref(), &role_key(name)).await?)
    }

    /// Loads a role without repairing or migrating anything in storage.
    pub async fn peek(&self, name: &str) -> Result<Option<RoleEntry>, AuthError> {
        let _guard = self.locks.read(name).await;
        Ok(self
            .read_stored(name)
            .await?
            .map(|stored| stored.into_canonical().0))
    }

    /// Loads a role, repairing a missing index entry and migrating legacy
    /// entries under the role write lock.
    pub async fn get(&self, name: &str) -> Result<Option<Response<RoleEntry>>, AuthError> {
        {
            let _guard = self.locks.read(name).await;
            match self.read_stored(name).await? {
                None => return Ok(None),
                Some(StoredRole::Current(entry)) if !entry.role_id.is_empty() => {
                    if self.index.lookup(&entry.role_id).await?.is_some() {
                        return Ok(Some(Response::new(entry)));
                    }
                }
                Some(_) => {}
            }
        }

        let _guard = self.locks.write(name).await;
        self.repair_locked(name).await
    }

    async fn repair_locked(&self, name: &str) -> Result<Option<Response<RoleEntry>>, AuthError> {
        let Some(stored) = self.read_stored(name).await? else {
            return Ok(None);
        };
        let (mut entry, migrated) = stored.into_canonical();
        let mut warnings = Vec::new();

        if migrated {
            if let Err(e) = policy::compile(entry.validator()) {
                error!(role = %name, error = %e, "Legacy role entry cannot be migrated");
                return Err(AuthError::internal(format!(
                    "role {name} could not be migrated: {e}"
                )));
            }
        }

        let generated = entry.role_id.is_empty();
        if generated {
            entry.role_id = utils::generate_uuid();
        }

        {
            let _id_guard = self.index.locks().write(&entry.role_id).await;
            if self.index.lookup_locked(&entry.role_id).await?.is_none() {
                self.index.store_mapping_locked(&entry.role_id, name).await?;
                if !generated {
                    warn!(role = %name, "{MISSING_INDEX_WARNING}");
                    warnings.push(MISSING_INDEX_WARNING.to_string());
                }
            }
        }

        if migrated || generated {
            put_json(self.storage.as_ref(), &role_key(name), &entry).await?;
            info!(role = %name, validator = %entry.validator(), "Migrated legacy role entry");
        }
        self.policies.remove(name);

        Ok(Some(Response { data: entry, warnings }))
    }

    /// Creates or updates a role. With `create = false` the role must exist.
    pub async fn put(
        &self,
        req: RoleWriteRequest,
        create: bool,
        max_lease_ttl: Duration,
    ) -> Result<Response<RoleView>, AuthError> {
        let name = normalize_name(&req.name)?;
        let _guard = self.locks.write(&name).await;

        let existing = self
            .read_stored(&name)
            .await?
            .map(|stored| stored.into_canonical().0);
        let is_new = existing.is_none();
        if is_new && !create {
            return Err(AuthError::invalid(
                "role_name",
                format!("role name {name:?} doesn't exist"),
            ));
        }

        let mut entry = existing.unwrap_or_else(|| RoleEntry {
            role_id: String::new(),
            policy: RolePolicy::Expression {
                validator: String::new(),
            },
            token: Default::default(),
        });
        let old_id = (!entry.role_id.is_empty()).then(|| entry.role_id.clone());

        match req.validator.as_deref().map(str::trim) {
            Some("") => return Err(AuthError::missing("validator")),
            Some(validator) => {
                entry.policy = RolePolicy::Expression {
                    validator: validator.to_string(),
                }
            }
            None if is_new => return Err(AuthError::missing("validator")),
            None => {}
        }
        let compiled = Arc::new(policy::compile(entry.validator())?);

        if let Some(role_id) = req.role_id.as_deref().map(str::trim) {
            if role_id.is_empty() {
                return Err(AuthError::invalid("role_id", "must not be empty"));
            }
            entry.role_id = role_id.to_string();
        }
        if entry.role_id.is_empty() {
            entry.role_id = utils::generate_uuid();
        }

        req.apply_token_params(&mut entry.token);
        let warnings = validate_token_params(&entry.token, max_lease_ttl)?;

        let mut ids = vec![entry.role_id.as_str()];
        ids.extend(old_id.as_deref());
        let _id_guards = self.index.locks().write_many(&ids).await;

        self.index
            .ensure_available_locked(&entry.role_id, &name)
            .await?;
        self.index
            .store_mapping_locked(&entry.role_id, &name)
            .await?;
        if let Err(e) = put_json(self.storage.as_ref(), &role_key(&name), &entry).await {
            if old_id.as_deref() != Some(entry.role_id.as_str()) {
                if let Err(cleanup) = self.index.delete_mapping_locked(&entry.role_id).await {
                    warn!(role = %name, error = %cleanup, "Failed to drop unused role identifier mapping");
                }
            }
            return Err(e.into());
        }
        self.index
            .retire_locked(&name, old_id.as_deref(), &entry.role_id)
            .await?;

        self.policies.insert(name.clone(), compiled);
        info!(role = %name, created = is_new, "Stored role");

        Ok(Response {
            data: RoleView::new(&name, &entry),
            warnings,
        })
    }

    /// Removes the index entry, then the role. Deleting a missing role is
    /// not an error. An unreadable entry is removed without touching the
    /// index.
    pub async fn delete(&self, name: &str) -> Result<(), AuthError> {
        let name = normalize_name(name)?;
        let _guard = self.locks.write(&name).await;

        let role_id = match self.read_stored(&name).await {
            Ok(None) => return Ok(()),
            Ok(Some(stored)) => stored.role_id().to_string(),
            Err(e) => {
                warn!(role = %name, error = %e, "Deleting unreadable role entry");
                String::new()
            }
        };
        let role_id = role_id.as_str();
        if !role_id.is_empty() {
            let _id_guard = self.index.locks().write(role_id).await;
            if self.index.lookup_locked(role_id).await?.as_deref() == Some(name.as_str()) {
                self.index.delete_mapping_locked(role_id).await?;
            }
        }
        self.storage.delete(&role_key(&name)).await?;
        self.policies.remove(&name);

        info!(role = %name, "Deleted role");
        Ok(())
    }

    /// Role names in lexical order.
    pub async fn list(&self) -> Result<Vec<String>, AuthError> {
        let mut names: Vec<String> = self
            .storage
            .list(ROLE_PREFIX)
            .await?
            .into_iter()
            .filter(|k| !k.ends_with('/'))
            .collect();
        names.sort();
        Ok(names)
    }

    /// Compiled policy of `entry`, reusing the cached program while the
    /// expression text is unchanged.
    pub fn compiled(&self, name: &str, entry: &RoleEntry) -> Result<Arc<CompiledPolicy>, AuthError> {
        if let Some(cached) = self.policies.get(name) {
            if cached.source() == entry.validator() {
                return Ok(cached.clone());
            }
        }

        let compiled = policy::compile(entry.validator()).map(Arc::new).map_err(|e| {
            error!(role = %name, error = %e, "Stored role policy does not compile");
            AuthError::internal(format!("stored policy of role {name} does not compile: {e}"))
        })?;
        self.policies.insert(name.to_string(), compiled.clone());
        debug!(role = %name, "Compiled role policy");
        Ok(compiled)
    }

    /// Drops cached programs. `None` clears the whole cache.
    pub fn evict(&self, name: Option<&str>) {
        match name {
            Some(name) => {
                self.policies.remove(name);
            }
            None => self.policies.clear(),
        }
    }

    #[cfg(test)]
    pub(crate) fn cached_policies(&self) -> usize {
        self.policies.len()
    }
}
