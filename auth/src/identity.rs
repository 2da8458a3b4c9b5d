//! Salted index from public role identifiers to role names.

use crate::cell::ResettableCell;
use errors::AuthError;
use exo_core::Storage;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use storage::{LockPool, Salt, get_json, put_json};
use tracing::debug;

pub const INDEX_PREFIX: &str = "role_id/";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub name: String,
}

/// Maps `salted-hash(role_id)` to a role name.
///
/// Every mutation holds the identifier's shard write lock. The `*_locked`
/// variants expect the caller to hold it already.
pub struct IdentityIndex {
    storage: Arc<dyn Storage>,
    locks: LockPool,
    salt: ResettableCell<Salt>,
}

impl IdentityIndex {
    pub fn new(storage: Arc<dyn Storage>, lock_pool_size: usize) -> Self {
        Self {
            storage,
            locks: LockPool::new(lock_pool_size),
            salt: ResettableCell::new(),
        }
    }

    pub fn locks(&self) -> &LockPool {
        &self.locks
    }

    pub async fn reset_salt(&self) {
        self.salt.reset().await;
    }

    async fn key(&self, role_id: &str) -> Result<String, AuthError> {
        let salt = self
            .salt
            .get_or_try_init(|| async move {
                Salt::load_or_create(self.storage.as_ref()).await.map(Arc::new)
            })
            .await?;
        Ok(format!("{INDEX_PREFIX}{}", salt.salt_id(role_id)))
    }

    pub async fn lookup(&self, role_id: &str) -> Result<Option<String>, AuthError> {
        let _guard = self.locks.read(role_id).await;
        self.lookup_locked(role_id).await
    }

    pub(crate) async fn lookup_locked(&self, role_id: &str) -> Result<Option<String>, AuthError> {
        let key = self.key(role_id).await?;
        Ok(get_json::<IndexEntry>(self.storage.as_ref(), &key)
            .await?
            .map(|entry| entry.name))
    }

    /// Idempotent for an unchanged mapping.
    pub async fn store_mapping(&self, role_id: &str, name: &str) -> Result<(), AuthError> {
        let _guard = self.locks.write(role_id).await;
        self.store_mapping_locked(role_id, name).await
    }

    pub(crate) async fn store_mapping_locked(
        &self,
        role_id: &str,
        name: &str,
    ) -> Result<(), AuthError> {
        let key = self.key(role_id).await?;
        put_json(
            self.storage.as_ref(),
            &key,
            &IndexEntry {
                name: name.to_string(),
            },
        )
        .await?;
        debug!(role = %name, "Stored role identifier mapping");
        Ok(())
    }

    /// Deleting a missing mapping is not an error.
    pub async fn delete_mapping(&self, role_id: &str) -> Result<(), AuthError> {
        let _guard = self.locks.write(role_id).await;
        self.delete_mapping_locked(role_id).await
    }

    pub(crate) async fn delete_mapping_locked(&self, role_id: &str) -> Result<(), AuthError> {
        let key = self.key(role_id).await?;
        self.storage.delete(&key).await?;
        Ok(())
    }

    /// Fails when `role_id` already maps to a role other than `name`.
    pub(crate) async fn ensure_available_locked(
        &self,
        role_id: &str,
        name: &str,
    ) -> Result<(), AuthError> {
        match self.lookup_locked(role_id).await? {
            Some(owner) if owner != name => Err(AuthError::invalid(
                "role_id",
                "role_id already in use",
            )),
            _ => Ok(()),
        }
    }

    /// Removes the mapping of a replaced identifier once `new` is stored.
    /// Skipped when the identifier did not change.
    pub(crate) async fn retire_locked(
        &self,
        name: &str,
        old: Option<&str>,
        new: &str,
    ) -> Result<(), AuthError> {
        if let Some(old) = old.filter(|old| *old != new) {
            self.delete_mapping_locked(old).await?;
            debug!(role = %name, "Rotated role identifier");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storage::InmemStorage;

    fn index() -> (Arc<InmemStorage>, IdentityIndex) {
        let storage = Arc::new(InmemStorage::new());
        let index = IdentityIndex::new(storage.clone(), 16);
        (storage, index)
    }

    fn index_keys(storage: &InmemStorage) -> Vec<String> {
        storage
            .keys()
            .into_iter()
            .filter(|k| k.starts_with(INDEX_PREFIX))
            .collect()
    }

    #[tokio::test]
    async fn test_store_lookup_delete() {
        let (storage, index) = index();
        index.store_mapping("id-1", "web").await.unwrap();
        index.store_mapping("id-1", "web").await.unwrap();

        assert_eq!(index.lookup("id-1").await.unwrap().as_deref(), Some("web"));
        assert_eq!(index.lookup("id-2").await.unwrap(), None);
        assert_eq!(index_keys(&storage).len(), 1);
        assert!(!index_keys(&storage)[0].contains("id-1"));

        index.delete_mapping("id-1").await.unwrap();
        index.delete_mapping("id-1").await.unwrap();
        assert_eq!(index.lookup("id-1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_rotation_replaces_old_mapping() {
        let (storage, index) = index();
        index.store_mapping("old", "web").await.unwrap();

        let guards = index.locks().write_many(&["old", "new"]).await;
        index.store_mapping_locked("new", "web").await.unwrap();
        assert_eq!(index.lookup_locked("old").await.unwrap().as_deref(), Some("web"));
        index.retire_locked("web", Some("old"), "new").await.unwrap();
        drop(guards);

        assert_eq!(index.lookup("old").await.unwrap(), None);
        assert_eq!(index.lookup("new").await.unwrap().as_deref(), Some("web"));
        assert_eq!(index_keys(&storage).len(), 1);
    }

    #[tokio::test]
    async fn test_rotation_to_same_id_keeps_mapping() {
        let (_, index) = index();
        index.store_mapping("same", "web").await.unwrap();
        index.retire_locked("web", Some("same"), "same").await.unwrap();
        assert_eq!(index.lookup("same").await.unwrap().as_deref(), Some("web"));
    }

    #[tokio::test]
    async fn test_id_owned_by_other_role_is_rejected() {
        let (_, index) = index();
        index.store_mapping("shared", "db").await.unwrap();

        let err = index.ensure_available_locked("shared", "web").await.unwrap_err();
        assert_eq!(err.to_string(), "invalid role_id: role_id already in use");
        index.ensure_available_locked("shared", "db").await.unwrap();
        index.ensure_available_locked("fresh", "web").await.unwrap();
    }

    #[tokio::test]
    async fn test_salt_reset_reloads_persisted_salt() {
        let (_, index) = index();
        index.store_mapping("id-1", "web").await.unwrap();
        index.reset_salt().await;
        assert_eq!(index.lookup("id-1").await.unwrap().as_deref(), Some("web"));
    }
}
