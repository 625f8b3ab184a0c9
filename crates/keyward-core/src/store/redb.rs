//! Redb-backed durable storage implementation.
//!
//! Uses Redb's ACID transactions with Copy-on-Write for crash safety. Every
//! `put` commits its own write transaction before returning, so key material
//! survives a crash right after the call.

use std::{path::Path, sync::Arc};

use async_trait::async_trait;
use redb::{Database, TableDefinition};

use super::{KeyStore, StoreError};

/// Table: records
/// Key: namespaced store key (UTF-8)
/// Value: CBOR-encoded record
const RECORDS: TableDefinition<&str, &[u8]> = TableDefinition::new("records");

/// Durable store backed by Redb.
///
/// Thread-safe through Redb's internal locking. Clone is cheap (Arc).
/// Database calls are blocking and run on Tokio's blocking pool.
#[derive(Clone)]
pub struct RedbStore {
    db: Arc<Database>,
}

impl RedbStore {
    /// Open or create a Redb database at the given path.
    ///
    /// Creates the records table if it doesn't exist.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Io` if the database cannot be opened or created.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db = Database::create(path.as_ref()).map_err(|e| StoreError::Io(e.to_string()))?;

        let txn = db.begin_write().map_err(|e| StoreError::Io(e.to_string()))?;
        {
            let _ = txn.open_table(RECORDS).map_err(|e| StoreError::Io(e.to_string()))?;
        }
        txn.commit().map_err(|e| StoreError::Io(e.to_string()))?;

        Ok(Self { db: Arc::new(db) })
    }

    fn get_blocking(db: &Database, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let txn = db.begin_read().map_err(|e| StoreError::Io(e.to_string()))?;
        let table = txn.open_table(RECORDS).map_err(|e| StoreError::Io(e.to_string()))?;

        let value = table.get(key).map_err(|e| StoreError::Io(e.to_string()))?;
        Ok(value.map(|guard| guard.value().to_vec()))
    }

    fn put_blocking(db: &Database, key: &str, value: &[u8]) -> Result<(), StoreError> {
        let txn = db.begin_write().map_err(|e| StoreError::Io(e.to_string()))?;

        {
            let mut table = txn.open_table(RECORDS).map_err(|e| StoreError::Io(e.to_string()))?;
            table.insert(key, value).map_err(|e| StoreError::Io(e.to_string()))?;
        }

        txn.commit().map_err(|e| StoreError::Io(e.to_string()))?;

        Ok(())
    }
}

#[async_trait]
impl KeyStore for RedbStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let db = Arc::clone(&self.db);
        let key = key.to_string();

        tokio::task::spawn_blocking(move || Self::get_blocking(&db, &key))
            .await
            .map_err(|e| StoreError::Io(format!("storage task failed: {e}")))?
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        let db = Arc::clone(&self.db);
        let key = key.to_string();
        let value = value.to_vec();

        tokio::task::spawn_blocking(move || Self::put_blocking(&db, &key, &value))
            .await
            .map_err(|e| StoreError::Io(format!("storage task failed: {e}")))?
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[tokio::test]
    async fn put_get_roundtrip() {
        let dir = tempdir().unwrap();
        let store = RedbStore::open(dir.path().join("keys.redb")).unwrap();

        assert!(store.get("missing").await.unwrap().is_none());

        store.put("k", &[1, 2, 3]).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(vec![1, 2, 3]));

        store.put("k", &[4]).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(vec![4]));
    }

    #[test]
    fn open_rejects_directory_path() {
        let dir = tempdir().unwrap();
        assert!(matches!(RedbStore::open(dir.path()), Err(StoreError::Io(_))));
    }
}
