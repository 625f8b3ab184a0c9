//! Remote peers pinned on first use.

use keyward_crypto::{CryptoProvider, IdentityId, PublicKey};
use serde::{Deserialize, Serialize};

use crate::{records::StoredPeer, store::StoreError};

/// How much the local user vouches for a peer's key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrustStatus {
    /// Key pinned on first contact, not verified out of band
    New,
    /// User explicitly confirmed the key
    Trusted,
}

/// A remote identity whose public key has been pinned.
///
/// Once pinned, the key never changes; a different key presented under the
/// same id is a security violation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    id: IdentityId,
    public_key: PublicKey,
    username: Option<String>,
    trust: TrustStatus,
}

impl Peer {
    pub(crate) fn new(id: IdentityId, public_key: PublicKey, username: Option<String>) -> Self {
        Self { id, public_key, username, trust: TrustStatus::New }
    }

    /// Peer id, the digest of the pinned key.
    pub fn id(&self) -> &IdentityId {
        &self.id
    }

    /// Pinned identity key.
    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    /// Last display name the peer announced, if any.
    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    /// Current trust level.
    pub fn trust(&self) -> TrustStatus {
        self.trust
    }

    /// Whether the user verified this peer's key.
    pub fn is_trusted(&self) -> bool {
        self.trust == TrustStatus::Trusted
    }

    pub(crate) fn with_username(&self, username: &str) -> Self {
        Self { username: Some(username.to_string()), ..self.clone() }
    }

    pub(crate) fn with_trust(&self, trust: TrustStatus) -> Self {
        Self { trust, ..self.clone() }
    }

    pub(crate) fn to_stored(&self, crypto: &impl CryptoProvider) -> StoredPeer {
        StoredPeer {
            id: self.id.as_str().to_string(),
            username: self.username.clone(),
            public_key: crypto.export_public_key(&self.public_key),
            trust: self.trust,
        }
    }

    /// Rebuild from a record fetched for `expected_id`.
    ///
    /// Both the record's own id and the requested id must be the digest of
    /// the stored key.
    pub(crate) fn from_stored(
        crypto: &impl CryptoProvider,
        store_key: &str,
        expected_id: &IdentityId,
        stored: StoredPeer,
    ) -> Result<Self, StoreError> {
        let corrupt =
            |reason: String| StoreError::Corrupt { key: store_key.to_string(), reason };

        let public_key = crypto
            .import_public_key(&stored.public_key)
            .map_err(|e| corrupt(format!("public key: {e}")))?;

        let derived = crypto.compute_identity_id(&public_key);
        if derived.as_str() != stored.id || &derived != expected_id {
            return Err(corrupt(format!("id {} does not match pinned key", stored.id)));
        }

        Ok(Self { id: derived, public_key, username: stored.username, trust: stored.trust })
    }
}

#[cfg(test)]
mod tests {
    use keyward_crypto::{Ed25519Provider, SeededEntropy};

    use super::*;

    #[test]
    fn stored_form_roundtrips() {
        let crypto = Ed25519Provider::with_entropy(SeededEntropy::new(3));
        let key = crypto.generate_identity_key_pair().unwrap().public_key();
        let id = crypto.compute_identity_id(&key);

        let peer = Peer::new(id.clone(), key, Some("bob".to_string())).with_trust(TrustStatus::Trusted);
        let restored = Peer::from_stored(&crypto, "peer", &id, peer.to_stored(&crypto)).unwrap();

        assert_eq!(restored, peer);
        assert!(restored.is_trusted());
    }

    #[test]
    fn record_under_wrong_id_is_corrupt() {
        let crypto = Ed25519Provider::with_entropy(SeededEntropy::new(3));
        let key = crypto.generate_identity_key_pair().unwrap().public_key();
        let id = crypto.compute_identity_id(&key);
        let peer = Peer::new(id, key, None);

        let other = IdentityId::new("ff".repeat(32));
        let result = Peer::from_stored(&crypto, "peer", &other, peer.to_stored(&crypto));

        assert!(matches!(result, Err(StoreError::Corrupt { .. })));
    }

    #[test]
    fn new_peers_start_untrusted() {
        let crypto = Ed25519Provider::with_entropy(SeededEntropy::new(3));
        let key = crypto.generate_identity_key_pair().unwrap().public_key();
        let peer = Peer::new(crypto.compute_identity_id(&key), key, None);

        assert_eq!(peer.trust(), TrustStatus::New);
        assert_eq!(peer.username(), None);
    }
}
