//! Persistence abstraction for key material.
//!
//! The key manager mirrors every mutation into a [`KeyStore`]: an opaque
//! key/value map with string keys and byte values. The store is a durable
//! mirror, never a second writer; all writes go through
//! [`crate::KeyManager`].

mod chaotic;
mod error;
mod memory;
mod redb;

use async_trait::async_trait;
pub use chaotic::ChaoticStore;
pub use error::StoreError;
pub use memory::MemoryStore;

pub use self::redb::RedbStore;

/// Key/value persistence capability.
///
/// Send + Sync so a single store can back a manager shared across tasks.
/// Implementations typically share internal state via Arc, so clones access
/// the same underlying data.
///
/// # Invariants
///
/// - `put` is durable once it returns `Ok` (no deferred or batched writes)
/// - `put` overwrites any existing value for the key
/// - `get` after a successful `put` returns exactly the bytes written
#[async_trait]
pub trait KeyStore: Send + Sync + 'static {
    /// Load the value stored under `key`. `None` if absent.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Store `value` under `key`, replacing any previous value.
    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError>;
}
