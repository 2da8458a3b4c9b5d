use crate::inmem::children;
use async_trait::async_trait;
use errors::StorageError;
use exo_core::Storage;
use redis::AsyncCommands;
use tracing::debug;

fn connection_error(e: redis::RedisError) -> StorageError {
    StorageError::ConnectionError {
        backend: "Redis".to_string(),
        reason: e.to_string(),
    }
}

fn query_error(e: redis::RedisError) -> StorageError {
    StorageError::QueryError {
        backend: "Redis".to_string(),
        reason: e.to_string(),
    }
}

/// Escapes glob metacharacters so a prefix matches literally in `SCAN MATCH`.
fn escape_pattern(prefix: &str) -> String {
    let mut out = String::with_capacity(prefix.len() + 1);
    for c in prefix.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('*');
    out
}

const SCAN_BATCH: usize = 500;

/// Storage shared between backend replicas through a Redis server.
///
/// Every key is stored under an optional namespace so several backends can
/// share one server.
pub struct RedisStorage {
    connection_manager: redis::aio::ConnectionManager,
    namespace: String,
}

impl RedisStorage {
    pub async fn new(connection_string: &str) -> Result<Self, StorageError> {
        let client = redis::Client::open(connection_string).map_err(connection_error)?;

        let connection_manager = client
            .get_connection_manager()
            .await
            .map_err(connection_error)?;

        Ok(Self {
            connection_manager,
            namespace: String::new(),
        })
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    fn scoped_key(&self, key: &str) -> String {
        format!("{}{}", self.namespace, key)
    }
}

#[async_trait]
impl Storage for RedisStorage {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let mut conn = self.connection_manager.clone();
        conn.get(self.scoped_key(key)).await.map_err(query_error)
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError> {
        let mut conn = self.connection_manager.clone();
        conn.set(self.scoped_key(key), value)
            .await
            .map_err(query_error)
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let mut conn = self.connection_manager.clone();
        conn.del(self.scoped_key(key)).await.map_err(query_error)
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let mut conn = self.connection_manager.clone();
        let scoped = self.scoped_key(prefix);
        let pattern = escape_pattern(&scoped);

        let mut keys = Vec::new();
        let mut cursor: u64 = 0;
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await
                .map_err(query_error)?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        debug!(prefix = %prefix, count = keys.len(), "Listed Redis keys");
        Ok(children(&scoped, keys.iter().map(String::as_str)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_pattern() {
        assert_eq!(escape_pattern("role/"), "role/*");
        assert_eq!(escape_pattern("a*b?[c]"), "a\\*b\\?\\[c\\]*");
    }
}
