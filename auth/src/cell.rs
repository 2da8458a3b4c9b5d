//! Lazily initialized value that can be dropped and rebuilt on demand.

use std::future::Future;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Initialize-once accessor with explicit [`reset`](Self::reset).
///
/// Readers share the lock while the value exists. On a miss the first
/// writer builds the value and later writers reuse it.
pub struct ResettableCell<T: ?Sized> {
    inner: RwLock<Option<Arc<T>>>,
}

impl<T: ?Sized> Default for ResettableCell<T> {
    fn default() -> Self {
        Self {
            inner: RwLock::new(None),
        }
    }
}

impl<T: ?Sized> ResettableCell<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self) -> Option<Arc<T>> {
        self.inner.read().await.clone()
    }

    pub async fn get_or_try_init<F, Fut, E>(&self, init: F) -> Result<Arc<T>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Arc<T>, E>>,
    {
        {
            let cached = self.inner.read().await;
            if let Some(value) = cached.as_ref() {
                return Ok(value.clone());
            }
        }

        let mut slot = self.inner.write().await;
        if let Some(value) = slot.as_ref() {
            return Ok(value.clone());
        }
        let value = init().await?;
        *slot = Some(value.clone());
        Ok(value)
    }

    pub async fn reset(&self) {
        *self.inner.write().await = None;
    }
}
