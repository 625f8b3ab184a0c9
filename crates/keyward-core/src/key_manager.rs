//! Key manager: identity lifecycle, TOFU peer registry, sender-key store.
//!
//! # Consistency
//!
//! All state lives behind one async lock that is held across persistence.
//! Every mutation writes the store first and updates memory only after the
//! write succeeded, so a failed write leaves both untouched and concurrent
//! callers can never interleave a check with someone else's write.
//!
//! Peers and sender-key logs are loaded from the store lazily on first
//! access and cached for the lifetime of the manager.

use std::collections::HashMap;

use keyward_crypto::{CryptoProvider, IdentityId, PublicKey, SymmetricKey};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::{
    Identity, KeyError, Peer, RoomId, SenderKeyEntry, TrustStatus,
    records::{self, StoredIdentity, StoredPeer, StoredSenderKeys},
    sender_keys::{Admission, SenderKeyLog},
    store::KeyStore,
};

/// Default prefix for every store key written by the manager.
pub const DEFAULT_NAMESPACE: &str = "keyward";

/// Key manager configuration.
#[derive(Debug, Clone)]
pub struct KeyManagerConfig {
    /// Prefix for store keys, so several managers can share one store
    pub namespace: String,
}

impl Default for KeyManagerConfig {
    fn default() -> Self {
        Self { namespace: DEFAULT_NAMESPACE.to_string() }
    }
}

/// Store key layout.
#[derive(Debug, Clone)]
struct StoreKeys {
    namespace: String,
}

impl StoreKeys {
    fn identity(&self) -> String {
        format!("{}/identity", self.namespace)
    }

    fn peer(&self, peer_id: &IdentityId) -> String {
        format!("{}/peer/{peer_id}", self.namespace)
    }

    fn sender_keys(&self, peer_id: &IdentityId, room_id: &RoomId) -> String {
        format!("{}/sender-keys/{peer_id}/{room_id}", self.namespace)
    }
}

#[derive(Default)]
struct KeyState {
    initialized: bool,
    identity: Option<Identity>,
    peers: HashMap<IdentityId, Peer>,
    sender_keys: HashMap<(IdentityId, RoomId), SenderKeyLog>,
}

/// Client-side key manager.
///
/// Generic over the crypto provider and the durable store so tests can run
/// against seeded entropy and in-memory or fault-injecting stores.
pub struct KeyManager<C: CryptoProvider, S: KeyStore> {
    crypto: C,
    store: S,
    keys: StoreKeys,
    state: Mutex<KeyState>,
}

impl<C: CryptoProvider, S: KeyStore> KeyManager<C, S> {
    /// Create a manager with the default namespace.
    pub fn new(crypto: C, store: S) -> Self {
        Self::with_config(crypto, store, KeyManagerConfig::default())
    }

    /// Create a manager with explicit configuration.
    pub fn with_config(crypto: C, store: S, config: KeyManagerConfig) -> Self {
        Self {
            crypto,
            store,
            keys: StoreKeys { namespace: config.namespace },
            state: Mutex::new(KeyState::default()),
        }
    }

    /// Crypto provider in use.
    pub fn crypto(&self) -> &C {
        &self.crypto
    }

    /// Underlying durable store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Load the persisted identity.
    ///
    /// Idempotent: only the first successful call touches the store. An
    /// identity already present in memory (generated or saved before `init`)
    /// takes precedence over the persisted one.
    ///
    /// # Errors
    ///
    /// - `KeyError::Store` if the store fails or the record is corrupt
    pub async fn init(&self) -> Result<(), KeyError> {
        let mut state = self.state.lock().await;
        if state.initialized {
            return Ok(());
        }

        let store_key = self.keys.identity();
        match self.store.get(&store_key).await? {
            Some(bytes) => {
                let stored: StoredIdentity = records::decode(&bytes)?;
                let loaded = Identity::from_stored(&self.crypto, &store_key, &stored)?;

                match &state.identity {
                    Some(current) if current.id() != loaded.id() => {
                        warn!(
                            in_memory = %current.id(),
                            persisted = %loaded.id(),
                            "keeping in-memory identity over persisted one"
                        );
                    },
                    Some(_) => {},
                    None => {
                        info!(identity = %loaded.id(), "loaded identity");
                        state.identity = Some(loaded);
                    },
                }
            },
            None => debug!("no persisted identity"),
        }

        state.initialized = true;
        Ok(())
    }

    /// Generate a fresh identity and make it the current in-memory identity.
    ///
    /// Not persisted; call [`save_my_identity`](Self::save_my_identity) to
    /// keep it across restarts.
    ///
    /// # Errors
    ///
    /// - `KeyError::Crypto` if key generation fails
    pub async fn generate_new_identity(
        &self,
        username: impl Into<String>,
    ) -> Result<Identity, KeyError> {
        let key_pair = self.crypto.generate_identity_key_pair()?;
        let id = self.crypto.compute_identity_id(&key_pair.public_key());
        let identity = Identity::new(id, username.into(), key_pair);

        let mut state = self.state.lock().await;
        if let Some(previous) = state.identity.replace(identity.clone()) {
            warn!(previous = %previous.id(), "replacing in-memory identity");
        }

        info!(identity = %identity.id(), "generated identity");
        Ok(identity)
    }

    /// Persist `identity`, overwriting any saved one, and make it current.
    ///
    /// # Errors
    ///
    /// - `KeyError::Store` if the write fails; memory is left unchanged
    pub async fn save_my_identity(&self, identity: &Identity) -> Result<(), KeyError> {
        let bytes = records::encode(&identity.to_stored(&self.crypto))?;

        let mut state = self.state.lock().await;
        self.store.put(&self.keys.identity(), &bytes).await?;
        state.identity = Some(identity.clone());

        info!(identity = %identity.id(), "saved identity");
        Ok(())
    }

    /// Current identity, or `None` if none has been generated or saved.
    ///
    /// # Errors
    ///
    /// - `KeyError::NotInitialized` if `init` has not run and no identity is
    ///   held in memory
    pub async fn get_my_identity(&self) -> Result<Option<Identity>, KeyError> {
        let state = self.state.lock().await;
        match (&state.identity, state.initialized) {
            (Some(identity), _) => Ok(Some(identity.clone())),
            (None, true) => Ok(None),
            (None, false) => Err(KeyError::NotInitialized),
        }
    }

    /// Register a peer on first contact or refresh its display name.
    ///
    /// Trust on first use: the first key seen for an id is pinned, and any
    /// later call with a different key fails without modifying the record.
    ///
    /// # Errors
    ///
    /// - `KeyError::SecurityViolation` if the id is pinned to another key
    /// - `KeyError::InvalidPeerId` if a new peer's id is not derived from its
    ///   key
    /// - `KeyError::Store` if the read or write fails
    pub async fn ensure_peer(
        &self,
        peer_id: &IdentityId,
        public_key: &PublicKey,
        username: Option<&str>,
    ) -> Result<Peer, KeyError> {
        let mut state = self.state.lock().await;

        let Some(existing) = self.load_peer(&mut state, peer_id).await? else {
            let expected = self.crypto.compute_identity_id(public_key);
            if &expected != peer_id {
                return Err(KeyError::InvalidPeerId { peer_id: peer_id.clone(), expected });
            }

            let peer = Peer::new(peer_id.clone(), *public_key, username.map(str::to_string));
            self.persist_peer(&peer).await?;
            state.peers.insert(peer_id.clone(), peer.clone());

            info!(peer = %peer_id, fingerprint = %public_key.fingerprint(), "pinned new peer");
            return Ok(peer);
        };

        if existing.public_key() != public_key {
            warn!(
                peer = %peer_id,
                pinned = %existing.public_key().fingerprint(),
                presented = %public_key.fingerprint(),
                "identity key mismatch"
            );
            return Err(KeyError::SecurityViolation {
                peer_id: peer_id.clone(),
                pinned: existing.public_key().fingerprint(),
                presented: public_key.fingerprint(),
            });
        }

        match username {
            Some(username)
                if !username.is_empty() && existing.username() != Some(username) =>
            {
                let updated = existing.with_username(username);
                self.persist_peer(&updated).await?;
                state.peers.insert(peer_id.clone(), updated.clone());

                debug!(peer = %peer_id, "updated peer username");
                Ok(updated)
            },
            _ => Ok(existing),
        }
    }

    /// Registered peer by id.
    ///
    /// # Errors
    ///
    /// - `KeyError::Store` if the read fails or the record is corrupt
    pub async fn get_peer(&self, peer_id: &IdentityId) -> Result<Option<Peer>, KeyError> {
        let mut state = self.state.lock().await;
        self.load_peer(&mut state, peer_id).await
    }

    /// Mark a registered peer's pinned key as verified by the user.
    ///
    /// # Errors
    ///
    /// - `KeyError::UnknownPeer` if the peer is not registered
    /// - `KeyError::Store` if the write fails
    pub async fn trust_peer(&self, peer_id: &IdentityId) -> Result<Peer, KeyError> {
        let mut state = self.state.lock().await;
        let existing = self
            .load_peer(&mut state, peer_id)
            .await?
            .ok_or_else(|| KeyError::UnknownPeer { peer_id: peer_id.clone() })?;

        if existing.is_trusted() {
            return Ok(existing);
        }

        let trusted = existing.with_trust(TrustStatus::Trusted);
        self.persist_peer(&trusted).await?;
        state.peers.insert(peer_id.clone(), trusted.clone());

        info!(peer = %peer_id, "peer marked trusted");
        Ok(trusted)
    }

    /// Peers seen by this manager instance, sorted by id.
    pub async fn peers(&self) -> Vec<Peer> {
        let state = self.state.lock().await;
        let mut peers: Vec<Peer> = state.peers.values().cloned().collect();
        peers.sort_by(|a, b| a.id().as_str().cmp(b.id().as_str()));
        peers
    }

    /// Record a registered peer's sender key for a room.
    ///
    /// Saving the identical key at the same activation time again is a
    /// no-op.
    ///
    /// # Errors
    ///
    /// - `KeyError::UnknownPeer` if the peer is not registered
    /// - `KeyError::SenderKeyConflict` if a different key already activates
    ///   at `activates_at`
    /// - `KeyError::Store` if the read or write fails
    pub async fn save_peer_sender_key(
        &self,
        peer_id: &IdentityId,
        room_id: &RoomId,
        key: &SymmetricKey,
        activates_at: u64,
    ) -> Result<(), KeyError> {
        let mut state = self.state.lock().await;

        if self.load_peer(&mut state, peer_id).await?.is_none() {
            return Err(KeyError::UnknownPeer { peer_id: peer_id.clone() });
        }

        self.load_sender_keys(&mut state, peer_id, room_id).await?;
        let log = state.sender_keys.entry((peer_id.clone(), room_id.clone())).or_default();

        match log.admission(activates_at, key) {
            Admission::Append => {},
            Admission::AlreadyPresent => return Ok(()),
            Admission::Conflict => {
                warn!(peer = %peer_id, room = %room_id, activates_at, "conflicting sender key");
                return Err(KeyError::SenderKeyConflict {
                    peer_id: peer_id.clone(),
                    room_id: room_id.clone(),
                    activates_at,
                });
            },
        }

        let bytes = records::encode(&log.to_stored_with(&self.crypto, activates_at, key))?;
        self.store.put(&self.keys.sender_keys(peer_id, room_id), &bytes).await?;
        log.insert(activates_at, key.clone());

        debug!(peer = %peer_id, room = %room_id, activates_at, "saved sender key");
        Ok(())
    }

    /// Sender key in effect for a message sent at `timestamp`: the newest
    /// key activated at or before it. Unregistered peers have none.
    ///
    /// # Errors
    ///
    /// - `KeyError::Store` if the read fails or the record is corrupt
    pub async fn get_peer_sender_key(
        &self,
        peer_id: &IdentityId,
        room_id: &RoomId,
        timestamp: u64,
    ) -> Result<Option<SymmetricKey>, KeyError> {
        Ok(self
            .get_peer_sender_key_entry(peer_id, room_id, timestamp)
            .await?
            .map(|entry| entry.key))
    }

    /// Like [`get_peer_sender_key`](Self::get_peer_sender_key), also
    /// returning the key's activation time.
    ///
    /// # Errors
    ///
    /// - `KeyError::Store` if the read fails or the record is corrupt
    pub async fn get_peer_sender_key_entry(
        &self,
        peer_id: &IdentityId,
        room_id: &RoomId,
        timestamp: u64,
    ) -> Result<Option<SenderKeyEntry>, KeyError> {
        let mut state = self.state.lock().await;
        if self.load_peer(&mut state, peer_id).await?.is_none() {
            return Ok(None);
        }
        self.load_sender_keys(&mut state, peer_id, room_id).await?;

        let scope = (peer_id.clone(), room_id.clone());
        Ok(state.sender_keys.get(&scope).and_then(|log| log.key_at(timestamp)).map(
            |(activates_at, key)| SenderKeyEntry {
                peer_id: peer_id.clone(),
                room_id: room_id.clone(),
                key: key.clone(),
                activates_at,
            },
        ))
    }

    /// Number of sender keys recorded for a (peer, room) scope, zero for an
    /// unregistered peer.
    ///
    /// # Errors
    ///
    /// - `KeyError::Store` if the read fails or the record is corrupt
    pub async fn sender_key_count(
        &self,
        peer_id: &IdentityId,
        room_id: &RoomId,
    ) -> Result<usize, KeyError> {
        let mut state = self.state.lock().await;
        if self.load_peer(&mut state, peer_id).await?.is_none() {
            return Ok(0);
        }
        self.load_sender_keys(&mut state, peer_id, room_id).await?;

        let scope = (peer_id.clone(), room_id.clone());
        Ok(state.sender_keys.get(&scope).map_or(0, SenderKeyLog::len))
    }

    /// Cached peer, falling back to the store.
    async fn load_peer(
        &self,
        state: &mut KeyState,
        peer_id: &IdentityId,
    ) -> Result<Option<Peer>, KeyError> {
        if let Some(peer) = state.peers.get(peer_id) {
            return Ok(Some(peer.clone()));
        }

        let store_key = self.keys.peer(peer_id);
        let Some(bytes) = self.store.get(&store_key).await? else {
            return Ok(None);
        };

        let stored: StoredPeer = records::decode(&bytes)?;
        let peer = Peer::from_stored(&self.crypto, &store_key, peer_id, stored)?;
        state.peers.insert(peer_id.clone(), peer.clone());

        Ok(Some(peer))
    }

    async fn persist_peer(&self, peer: &Peer) -> Result<(), KeyError> {
        let bytes = records::encode(&peer.to_stored(&self.crypto))?;
        self.store.put(&self.keys.peer(peer.id()), &bytes).await?;
        Ok(())
    }

    /// Populate the cache for a scope if the store has a log for it. Empty
    /// scopes are not cached.
    async fn load_sender_keys(
        &self,
        state: &mut KeyState,
        peer_id: &IdentityId,
        room_id: &RoomId,
    ) -> Result<(), KeyError> {
        let scope = (peer_id.clone(), room_id.clone());
        if state.sender_keys.contains_key(&scope) {
            return Ok(());
        }

        let store_key = self.keys.sender_keys(peer_id, room_id);
        let Some(bytes) = self.store.get(&store_key).await? else {
            return Ok(());
        };

        let stored: StoredSenderKeys = records::decode(&bytes)?;
        let log = SenderKeyLog::from_stored(&self.crypto, &store_key, &stored)?;
        state.sender_keys.insert(scope, log);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use keyward_crypto::{Ed25519Provider, SeededEntropy};

    use super::*;
    use crate::store::{ChaoticStore, MemoryStore};

    type TestManager = KeyManager<Ed25519Provider<SeededEntropy>, MemoryStore>;

    fn manager(store: MemoryStore) -> TestManager {
        KeyManager::new(Ed25519Provider::with_entropy(SeededEntropy::new(42)), store)
    }

    fn remote(seed: u64) -> (IdentityId, PublicKey) {
        let crypto = Ed25519Provider::with_entropy(SeededEntropy::new(seed));
        let key = crypto.generate_identity_key_pair().unwrap().public_key();
        (crypto.compute_identity_id(&key), key)
    }

    fn key(byte: u8) -> SymmetricKey {
        SymmetricKey::new([byte; 32])
    }

    #[tokio::test]
    async fn identity_requires_init() {
        let km = manager(MemoryStore::new());
        assert_eq!(km.get_my_identity().await.unwrap_err(), KeyError::NotInitialized);

        km.init().await.unwrap();
        assert!(km.get_my_identity().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn generated_identity_is_not_persisted() {
        let store = MemoryStore::new();
        let km = manager(store.clone());

        let identity = km.generate_new_identity("alice").await.unwrap();
        assert_eq!(km.get_my_identity().await.unwrap().unwrap().id(), identity.id());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn saved_identity_survives_restart() {
        let store = MemoryStore::new();
        let km = manager(store.clone());
        let identity = km.generate_new_identity("alice").await.unwrap();
        km.save_my_identity(&identity).await.unwrap();
        assert!(store.contains_key("keyward/identity"));

        let restarted = manager(store);
        restarted.init().await.unwrap();
        let loaded = restarted.get_my_identity().await.unwrap().unwrap();

        assert_eq!(loaded.id(), identity.id());
        assert_eq!(loaded.username(), "alice");
        assert_eq!(loaded.public_key(), identity.public_key());
    }

    #[tokio::test]
    async fn init_keeps_in_memory_identity() {
        let store = MemoryStore::new();
        let first = manager(store.clone());
        let saved = first.generate_new_identity("saved").await.unwrap();
        first.save_my_identity(&saved).await.unwrap();

        let second = KeyManager::new(
            Ed25519Provider::with_entropy(SeededEntropy::new(99)),
            store,
        );
        let fresh = second.generate_new_identity("fresh").await.unwrap();
        second.init().await.unwrap();

        let current = second.get_my_identity().await.unwrap().unwrap();
        assert_eq!(current.id(), fresh.id());
        assert_ne!(current.id(), saved.id());
    }

    #[tokio::test]
    async fn save_overwrites_previous_identity() {
        let store = MemoryStore::new();
        let km = manager(store.clone());
        let first = km.generate_new_identity("one").await.unwrap();
        km.save_my_identity(&first).await.unwrap();
        let second = km.generate_new_identity("two").await.unwrap();
        km.save_my_identity(&second).await.unwrap();

        let restarted = manager(store);
        restarted.init().await.unwrap();
        assert_eq!(restarted.get_my_identity().await.unwrap().unwrap().id(), second.id());
    }

    #[tokio::test]
    async fn ensure_peer_pins_first_key() {
        let km = manager(MemoryStore::new());
        let (id, pk) = remote(1);
        let (_, other_pk) = remote(2);

        let peer = km.ensure_peer(&id, &pk, Some("bob")).await.unwrap();
        assert_eq!(peer.trust(), TrustStatus::New);

        let err = km.ensure_peer(&id, &other_pk, Some("mallory")).await.unwrap_err();
        assert!(err.is_security_violation());

        let stored = km.get_peer(&id).await.unwrap().unwrap();
        assert_eq!(stored.public_key(), &pk);
        assert_eq!(stored.username(), Some("bob"));
    }

    #[tokio::test]
    async fn ensure_peer_updates_username_only() {
        let km = manager(MemoryStore::new());
        let (id, pk) = remote(1);

        km.ensure_peer(&id, &pk, Some("bob")).await.unwrap();
        let renamed = km.ensure_peer(&id, &pk, Some("robert")).await.unwrap();
        assert_eq!(renamed.username(), Some("robert"));

        let unchanged = km.ensure_peer(&id, &pk, None).await.unwrap();
        assert_eq!(unchanged.username(), Some("robert"));
        assert_eq!(unchanged.public_key(), &pk);
    }

    #[tokio::test]
    async fn empty_username_keeps_existing_name() {
        let store = MemoryStore::new();
        let km = manager(store.clone());
        let (id, pk) = remote(1);
        km.ensure_peer(&id, &pk, Some("bob")).await.unwrap();

        let peer = km.ensure_peer(&id, &pk, Some("")).await.unwrap();
        assert_eq!(peer.username(), Some("bob"));

        let restarted = manager(store);
        assert_eq!(restarted.get_peer(&id).await.unwrap().unwrap().username(), Some("bob"));
    }

    #[tokio::test]
    async fn ensure_peer_rejects_underived_id() {
        let km = manager(MemoryStore::new());
        let (_, pk) = remote(1);
        let bogus = IdentityId::new("ab".repeat(32));

        let err = km.ensure_peer(&bogus, &pk, None).await.unwrap_err();
        assert!(matches!(err, KeyError::InvalidPeerId { .. }));
        assert!(km.get_peer(&bogus).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn pinned_key_survives_restart() {
        let store = MemoryStore::new();
        let (id, pk) = remote(1);
        let (_, other_pk) = remote(2);
        manager(store.clone()).ensure_peer(&id, &pk, None).await.unwrap();

        let restarted = manager(store);
        let err = restarted.ensure_peer(&id, &other_pk, None).await.unwrap_err();
        assert!(err.is_security_violation());
    }

    #[tokio::test]
    async fn trust_peer_requires_registration() {
        let km = manager(MemoryStore::new());
        let (id, pk) = remote(1);

        assert!(matches!(km.trust_peer(&id).await, Err(KeyError::UnknownPeer { .. })));

        km.ensure_peer(&id, &pk, None).await.unwrap();
        let trusted = km.trust_peer(&id).await.unwrap();
        assert!(trusted.is_trusted());

        // Re-announcing keeps the trust decision.
        let again = km.ensure_peer(&id, &pk, Some("bob")).await.unwrap();
        assert!(again.is_trusted());
    }

    #[tokio::test]
    async fn sender_key_requires_known_peer() {
        let store = MemoryStore::new();
        let km = manager(store.clone());
        let (id, _) = remote(1);
        let room = RoomId::from("room");

        let err = km.save_peer_sender_key(&id, &room, &key(1), 100).await.unwrap_err();
        assert_eq!(err, KeyError::UnknownPeer { peer_id: id.clone() });

        assert!(store.is_empty());
        assert_eq!(km.sender_key_count(&id, &room).await.unwrap(), 0);
        assert!(km.get_peer_sender_key(&id, &room, 100).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unregistered_peer_cannot_alias_another_scope() {
        let store = MemoryStore::new();
        let km = manager(store.clone());
        let (id, pk) = remote(1);
        km.ensure_peer(&id, &pk, None).await.unwrap();
        km.save_peer_sender_key(&id, &"secret/x".into(), &key(7), 10).await.unwrap();

        let alias = IdentityId::from(format!("{id}/secret"));
        let room = RoomId::from("x");
        assert!(km.get_peer_sender_key_entry(&alias, &room, 100).await.unwrap().is_none());
        assert_eq!(km.sender_key_count(&alias, &room).await.unwrap(), 0);

        // The real scope is untouched, also after a restart.
        let restarted = manager(store);
        assert!(restarted.get_peer_sender_key(&alias, &room, 100).await.unwrap().is_none());
        assert_eq!(
            restarted.get_peer_sender_key(&id, &"secret/x".into(), 100).await.unwrap(),
            Some(key(7))
        );
    }

    #[tokio::test]
    async fn sender_key_floor_lookup() {
        let km = manager(MemoryStore::new());
        let (id, pk) = remote(1);
        let room = RoomId::from("room");
        km.ensure_peer(&id, &pk, None).await.unwrap();

        km.save_peer_sender_key(&id, &room, &key(2), 200).await.unwrap();
        km.save_peer_sender_key(&id, &room, &key(1), 100).await.unwrap();

        assert!(km.get_peer_sender_key(&id, &room, 99).await.unwrap().is_none());
        assert_eq!(km.get_peer_sender_key(&id, &room, 150).await.unwrap(), Some(key(1)));
        assert_eq!(km.get_peer_sender_key(&id, &room, 200).await.unwrap(), Some(key(2)));

        let entry = km.get_peer_sender_key_entry(&id, &room, 10_000).await.unwrap().unwrap();
        assert_eq!(entry.activates_at, 200);
        assert_eq!(entry.room_id, room);
    }

    #[tokio::test]
    async fn sender_keys_are_scoped_per_room() {
        let km = manager(MemoryStore::new());
        let (id, pk) = remote(1);
        km.ensure_peer(&id, &pk, None).await.unwrap();

        km.save_peer_sender_key(&id, &"a".into(), &key(1), 100).await.unwrap();

        assert!(km.get_peer_sender_key(&id, &"b".into(), 500).await.unwrap().is_none());
        assert_eq!(km.sender_key_count(&id, &"a".into()).await.unwrap(), 1);
        assert_eq!(km.sender_key_count(&id, &"b".into()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn duplicate_sender_key_is_noop_and_conflict_is_rejected() {
        let km = manager(MemoryStore::new());
        let (id, pk) = remote(1);
        let room = RoomId::from("room");
        km.ensure_peer(&id, &pk, None).await.unwrap();

        km.save_peer_sender_key(&id, &room, &key(1), 100).await.unwrap();
        km.save_peer_sender_key(&id, &room, &key(1), 100).await.unwrap();
        assert_eq!(km.sender_key_count(&id, &room).await.unwrap(), 1);

        let err = km.save_peer_sender_key(&id, &room, &key(2), 100).await.unwrap_err();
        assert!(matches!(err, KeyError::SenderKeyConflict { activates_at: 100, .. }));
        assert_eq!(km.get_peer_sender_key(&id, &room, 100).await.unwrap(), Some(key(1)));
    }

    #[tokio::test]
    async fn namespace_prefixes_store_keys() {
        let store = MemoryStore::new();
        let km = KeyManager::with_config(
            Ed25519Provider::with_entropy(SeededEntropy::new(1)),
            store.clone(),
            KeyManagerConfig { namespace: "device-2".to_string() },
        );
        let (id, pk) = remote(1);
        km.ensure_peer(&id, &pk, None).await.unwrap();

        assert!(store.contains_key(&format!("device-2/peer/{id}")));
        assert!(!store.contains_key(&format!("keyward/peer/{id}")));
    }

    #[tokio::test]
    async fn failed_write_leaves_state_unchanged() {
        let store = ChaoticStore::new(MemoryStore::new(), 0.0);
        let km = KeyManager::new(Ed25519Provider::with_entropy(SeededEntropy::new(5)), store);
        let (id, pk) = remote(1);

        km.store().set_failure_rate(1.0);
        assert!(matches!(km.ensure_peer(&id, &pk, None).await, Err(KeyError::Store(_))));
        assert!(km.peers().await.is_empty());

        km.store().set_failure_rate(0.0);
        assert!(km.get_peer(&id).await.unwrap().is_none());
    }
}
