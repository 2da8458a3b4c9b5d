//! # Storage Layer
//!
//! Key-value backends (in-memory, Redis) for role, identity-index, salt and
//! config entries, plus the sharded lock pool guarding them.

pub mod entry;
pub mod inmem;
pub mod lock;
pub mod redis;
pub mod salt;

pub use entry::{get_json, put_json};
pub use inmem::InmemStorage;
pub use lock::LockPool;
pub use redis::RedisStorage;
pub use salt::Salt;

use config::StorageSettings;
use errors::StorageError;
use exo_core::Storage;
use std::sync::Arc;

/// Opens the backend selected by `settings`.
pub async fn connect(settings: &StorageSettings) -> Result<Arc<dyn Storage>, StorageError> {
    match settings.backend.as_str() {
        "redis" => {
            let url = settings
                .redis_url
                .as_deref()
                .ok_or_else(|| StorageError::ConnectionError {
                    backend: "Redis".to_string(),
                    reason: "redis_url is not set".to_string(),
                })?;
            Ok(Arc::new(RedisStorage::new(url).await?))
        }
        "inmem" => Ok(Arc::new(InmemStorage::new())),
        other => Err(StorageError::ConnectionError {
            backend: other.to_string(),
            reason: "unsupported storage backend".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_inmem() {
        let storage = connect(&StorageSettings::default()).await.unwrap();
        storage.put("k", b"v".to_vec()).await.unwrap();
        assert_eq!(storage.get("k").await.unwrap(), Some(b"v".to_vec()));
    }

    #[tokio::test]
    async fn test_connect_rejects_unknown_backend() {
        let settings = StorageSettings {
            backend: "etcd".to_string(),
            redis_url: None,
        };
        assert!(connect(&settings).await.is_err());
    }
}
