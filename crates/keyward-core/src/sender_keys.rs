//! Epoch-indexed sender keys.
//!
//! Each peer rotates its sender key per room. Keys are indexed by activation
//! timestamp; a message sent at time `t` was encrypted with the newest key
//! whose activation is at or before `t`. Lookups are floor queries over an
//! ordered map.

use std::{collections::BTreeMap, fmt};

use keyward_crypto::{CryptoProvider, IdentityId, SymmetricKey};
use serde::{Deserialize, Serialize};

use crate::{
    records::{StoredSenderKey, StoredSenderKeys},
    store::StoreError,
};

/// Room identifier. Opaque to the key manager.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(String);

impl RoomId {
    /// Wrap a room identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RoomId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for RoomId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// A sender key together with its scope and activation time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SenderKeyEntry {
    /// Peer that owns the key
    pub peer_id: IdentityId,
    /// Room the key encrypts for
    pub room_id: RoomId,
    /// Key material
    pub key: SymmetricKey,
    /// Milliseconds since the Unix epoch
    pub activates_at: u64,
}

/// Result of checking a key against the log before inserting it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Admission {
    /// Activation time is free
    Append,
    /// Identical key already recorded at this activation time
    AlreadyPresent,
    /// A different key already owns this activation time
    Conflict,
}

/// Sender keys of a single (peer, room) scope, ordered by activation time.
#[derive(Debug, Clone, Default)]
pub(crate) struct SenderKeyLog {
    entries: BTreeMap<u64, SymmetricKey>,
}

impl SenderKeyLog {
    pub(crate) fn admission(&self, activates_at: u64, key: &SymmetricKey) -> Admission {
        match self.entries.get(&activates_at) {
            None => Admission::Append,
            Some(existing) if existing == key => Admission::AlreadyPresent,
            Some(_) => Admission::Conflict,
        }
    }

    pub(crate) fn insert(&mut self, activates_at: u64, key: SymmetricKey) {
        self.entries.insert(activates_at, key);
    }

    /// Newest key with `activates_at <= timestamp`.
    pub(crate) fn key_at(&self, timestamp: u64) -> Option<(u64, &SymmetricKey)> {
        self.entries.range(..=timestamp).next_back().map(|(at, key)| (*at, key))
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Record form of this log with one extra entry, leaving `self` untouched
    /// until the write has succeeded.
    pub(crate) fn to_stored_with(
        &self,
        crypto: &impl CryptoProvider,
        activates_at: u64,
        key: &SymmetricKey,
    ) -> StoredSenderKeys {
        let mut entries: Vec<StoredSenderKey> = self
            .entries
            .iter()
            .map(|(at, key)| StoredSenderKey {
                activates_at: *at,
                key: crypto.export_symmetric_key(key).to_vec(),
            })
            .collect();

        let position = entries.partition_point(|entry| entry.activates_at < activates_at);
        entries.insert(position, StoredSenderKey {
            activates_at,
            key: crypto.export_symmetric_key(key).to_vec(),
        });

        StoredSenderKeys { entries }
    }

    pub(crate) fn from_stored(
        crypto: &impl CryptoProvider,
        store_key: &str,
        stored: &StoredSenderKeys,
    ) -> Result<Self, StoreError> {
        let mut entries = BTreeMap::new();

        for entry in &stored.entries {
            let key = crypto.import_symmetric_key(&entry.key).map_err(|e| StoreError::Corrupt {
                key: store_key.to_string(),
                reason: format!("sender key at {}: {e}", entry.activates_at),
            })?;

            if entries.insert(entry.activates_at, key).is_some() {
                return Err(StoreError::Corrupt {
                    key: store_key.to_string(),
                    reason: format!("duplicate activation time {}", entry.activates_at),
                });
            }
        }

        Ok(Self { entries })
    }
}

#[cfg(test)]
mod tests {
    use keyward_crypto::Ed25519Provider;

    use super::*;

    fn key(byte: u8) -> SymmetricKey {
        SymmetricKey::new([byte; 32])
    }

    fn log(entries: &[(u64, u8)]) -> SenderKeyLog {
        let mut log = SenderKeyLog::default();
        for (at, byte) in entries {
            log.insert(*at, key(*byte));
        }
        log
    }

    #[test]
    fn floor_lookup() {
        let log = log(&[(100, 1), (200, 2)]);

        assert!(log.key_at(50).is_none());
        assert_eq!(log.key_at(100), Some((100, &key(1))));
        assert_eq!(log.key_at(150), Some((100, &key(1))));
        assert_eq!(log.key_at(200), Some((200, &key(2))));
        assert_eq!(log.key_at(u64::MAX), Some((200, &key(2))));
    }

    #[test]
    fn insertion_order_does_not_matter() {
        let forward = log(&[(100, 1), (200, 2), (300, 3)]);
        let backward = log(&[(300, 3), (200, 2), (100, 1)]);

        for t in [0, 100, 199, 250, 300, 1_000] {
            assert_eq!(forward.key_at(t), backward.key_at(t));
        }
    }

    #[test]
    fn admission_rules() {
        let log = log(&[(100, 1)]);

        assert_eq!(log.admission(200, &key(2)), Admission::Append);
        assert_eq!(log.admission(100, &key(1)), Admission::AlreadyPresent);
        assert_eq!(log.admission(100, &key(9)), Admission::Conflict);
    }

    #[test]
    fn stored_form_is_sorted_and_roundtrips() {
        let crypto = Ed25519Provider::new();
        let log = log(&[(300, 3), (100, 1)]);

        let stored = log.to_stored_with(&crypto, 200, &key(2));
        let order: Vec<u64> = stored.entries.iter().map(|e| e.activates_at).collect();
        assert_eq!(order, vec![100, 200, 300]);

        let restored = SenderKeyLog::from_stored(&crypto, "sk", &stored).unwrap();
        assert_eq!(restored.len(), 3);
        assert_eq!(restored.key_at(250), Some((200, &key(2))));
        // Source log is untouched.
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn duplicate_activation_in_record_is_corrupt() {
        let crypto = Ed25519Provider::new();
        let stored = StoredSenderKeys {
            entries: vec![
                StoredSenderKey { activates_at: 5, key: vec![1; 32] },
                StoredSenderKey { activates_at: 5, key: vec![2; 32] },
            ],
        };

        let result = SenderKeyLog::from_stored(&crypto, "sk", &stored);
        assert!(matches!(result, Err(StoreError::Corrupt { .. })));
    }

    #[test]
    fn short_key_in_record_is_corrupt() {
        let crypto = Ed25519Provider::new();
        let stored = StoredSenderKeys {
            entries: vec![StoredSenderKey { activates_at: 5, key: vec![1; 16] }],
        };

        let result = SenderKeyLog::from_stored(&crypto, "sk", &stored);
        assert!(matches!(result, Err(StoreError::Corrupt { .. })));
    }
}
