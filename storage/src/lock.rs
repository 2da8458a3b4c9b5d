//! Fixed-size pool of async locks sharded by key hash.

use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use xxhash_rust::xxh64::xxh64;

/// Hash-sharded locks.
///
/// Two keys landing on the same shard contend even though they are
/// unrelated. Memory stays bounded regardless of how many entities exist.
#[derive(Debug)]
pub struct LockPool {
    shards: Vec<RwLock<()>>,
}

impl LockPool {
    /// `size` is clamped to at least one shard.
    pub fn new(size: usize) -> Self {
        Self {
            shards: (0..size.max(1)).map(|_| RwLock::new(())).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.shards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }

    pub fn shard(&self, key: &str) -> usize {
        (xxh64(key.as_bytes(), 0) % self.shards.len() as u64) as usize
    }

    pub async fn read(&self, key: &str) -> RwLockReadGuard<'_, ()> {
        self.shards[self.shard(key)].read().await
    }

    pub async fn write(&self, key: &str) -> RwLockWriteGuard<'_, ()> {
        self.shards[self.shard(key)].write().await
    }

    /// Write-locks every shard covering `keys`. Each shard is taken once and
    /// shards are acquired in ascending index order.
    pub async fn write_many(&self, keys: &[&str]) -> Vec<RwLockWriteGuard<'_, ()>> {
        let mut indexes: Vec<usize> = keys.iter().map(|k| self.shard(k)).collect();
        indexes.sort_unstable();
        indexes.dedup();

        let mut guards = Vec::with_capacity(indexes.len());
        for i in indexes {
            guards.push(self.shards[i].write().await);
        }
        guards
    }
}

impl Default for LockPool {
    fn default() -> Self {
        Self::new(256)
    }
}
