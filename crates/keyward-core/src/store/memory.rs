use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
};

use async_trait::async_trait;

use super::{KeyStore, StoreError};

/// In-memory store for tests and ephemeral clients.
///
/// Clones share the same map, so a test can hand one clone to a key manager
/// and later build a second manager over another clone to simulate a restart.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl MemoryStore {
    /// Create a new empty `MemoryStore`
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether the store holds no records.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a record exists under `key`.
    pub fn contains_key(&self, key: &str) -> bool {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).contains_key(key)
    }
}

#[async_trait]
impl KeyStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.inner.lock().unwrap_or_else(PoisonError::into_inner).get(key).cloned())
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_get() {
        let store = MemoryStore::new();
        assert!(store.get("a").await.unwrap().is_none());

        store.put("a", b"one").await.unwrap();
        assert_eq!(store.get("a").await.unwrap().as_deref(), Some(&b"one"[..]));

        store.put("a", b"two").await.unwrap();
        assert_eq!(store.get("a").await.unwrap().as_deref(), Some(&b"two"[..]));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn clones_share_state() {
        let store = MemoryStore::new();
        let clone = store.clone();

        store.put("shared", b"value").await.unwrap();
        assert!(clone.contains_key("shared"));
    }
}
