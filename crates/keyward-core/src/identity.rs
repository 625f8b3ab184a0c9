//! Local identity.

use keyward_crypto::{CryptoProvider, IdentityId, IdentityKeyPair, PublicKey, Signature};

use crate::{records::StoredIdentity, store::StoreError};

/// This device's long-term identity.
///
/// The id is always the digest of the key pair's public half. An identity is
/// created in memory by
/// [`KeyManager::generate_new_identity`](crate::KeyManager::generate_new_identity)
/// and becomes durable only once it is saved.
#[derive(Clone, Debug)]
pub struct Identity {
    id: IdentityId,
    username: String,
    key_pair: IdentityKeyPair,
}

impl Identity {
    pub(crate) fn new(id: IdentityId, username: String, key_pair: IdentityKeyPair) -> Self {
        Self { id, username, key_pair }
    }

    /// Stable identifier derived from the public key.
    pub fn id(&self) -> &IdentityId {
        &self.id
    }

    /// Display name. Not unique and not authenticated.
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Public half of the identity key.
    pub fn public_key(&self) -> PublicKey {
        self.key_pair.public_key()
    }

    /// Identity signing key pair.
    pub fn key_pair(&self) -> &IdentityKeyPair {
        &self.key_pair
    }

    /// Sign a message with the identity key.
    pub fn sign(&self, message: &[u8]) -> Signature {
        self.key_pair.sign(message)
    }

    /// Same identity under a different display name.
    ///
    /// The id and keys are unchanged; persist the result with
    /// [`KeyManager::save_my_identity`](crate::KeyManager::save_my_identity).
    #[must_use]
    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = username.into();
        self
    }

    pub(crate) fn to_stored(&self, crypto: &impl CryptoProvider) -> StoredIdentity {
        StoredIdentity {
            id: self.id.as_str().to_string(),
            username: self.username.clone(),
            public_key: crypto.export_public_key(&self.public_key()),
            secret_key: crypto.export_key_pair(&self.key_pair).to_vec(),
        }
    }

    /// Rebuild from a record, checking that the secret, public key and id
    /// all agree.
    pub(crate) fn from_stored(
        crypto: &impl CryptoProvider,
        store_key: &str,
        stored: &StoredIdentity,
    ) -> Result<Self, StoreError> {
        let corrupt =
            |reason: String| StoreError::Corrupt { key: store_key.to_string(), reason };

        let key_pair = crypto
            .import_key_pair(&stored.secret_key)
            .map_err(|e| corrupt(format!("secret key: {e}")))?;
        let public_key = key_pair.public_key();

        if crypto.export_public_key(&public_key) != stored.public_key {
            return Err(corrupt("public key does not match secret key".to_string()));
        }

        let id = crypto.compute_identity_id(&public_key);
        if id.as_str() != stored.id {
            return Err(corrupt(format!("id {} does not match public key", stored.id)));
        }

        Ok(Self::new(id, stored.username.clone(), key_pair))
    }
}
