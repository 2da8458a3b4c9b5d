//! JSON encoding of stored entries.

use errors::StorageError;
use exo_core::Storage;
use serde::Serialize;
use serde::de::DeserializeOwned;

pub async fn get_json<T: DeserializeOwned>(
    storage: &dyn Storage,
    key: &str,
) -> Result<Option<T>, StorageError> {
    match storage.get(key).await? {
        Some(raw) => serde_json::from_slice(&raw)
            .map(Some)
            .map_err(|e| StorageError::DeserializationError {
                key: key.to_string(),
                reason: e.to_string(),
            }),
        None => Ok(None),
    }
}

pub async fn put_json<T: Serialize + ?Sized>(
    storage: &dyn Storage,
    key: &str,
    value: &T,
) -> Result<(), StorageError> {
    let raw = serde_json::to_vec(value).map_err(|e| StorageError::SerializationError {
        key: key.to_string(),
        reason: e.to_string(),
    })?;
    storage.put(key, raw).await
}
