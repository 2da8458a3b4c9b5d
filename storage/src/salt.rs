use errors::StorageError;
use exo_core::Storage;
use tracing::info;

pub const SALT_KEY: &str = "salt";

/// Persisted random salt used to hash identity-index keys.
#[derive(Clone)]
pub struct Salt {
    value: String,
}

impl std::fmt::Debug for Salt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Salt").field("value", &"[REDACTED]").finish()
    }
}

impl Salt {
    /// Reads the salt, generating and persisting a new one on first use.
    pub async fn load_or_create(storage: &dyn Storage) -> Result<Self, StorageError> {
        if let Some(raw) = storage.get(SALT_KEY).await? {
            let value = String::from_utf8(raw).map_err(|e| StorageError::DeserializationError {
                key: SALT_KEY.to_string(),
                reason: e.to_string(),
            })?;
            if !value.is_empty() {
                return Ok(Self { value });
            }
        }

        let value = utils::generate_uuid();
        storage.put(SALT_KEY, value.clone().into_bytes()).await?;
        info!("Generated identity index salt");
        Ok(Self { value })
    }

    /// Hex SHA-256 of the salt followed by `id`.
    pub fn salt_id(&self, id: &str) -> String {
        utils::salted_id(&self.value, id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InmemStorage;

    #[tokio::test]
    async fn test_salt_is_persisted_once() {
        let storage = InmemStorage::new();
        let first = Salt::load_or_create(&storage).await.unwrap();
        let second = Salt::load_or_create(&storage).await.unwrap();

        assert_eq!(first.salt_id("abc"), second.salt_id("abc"));
        assert_eq!(first.salt_id("abc").len(), 64);
        assert_ne!(first.salt_id("abc"), first.salt_id("abd"));
        assert_eq!(storage.keys(), vec![SALT_KEY.to_string()]);
    }

    #[tokio::test]
    async fn test_existing_salt_is_used() {
        let storage = InmemStorage::new();
        storage.put(SALT_KEY, b"fixed".to_vec()).await.unwrap();
        let salt = Salt::load_or_create(&storage).await.unwrap();
        assert_eq!(salt.salt_id("id"), utils::salted_id("fixed", "id"));
        assert!(!format!("{salt:?}").contains("fixed"));
    }
}
