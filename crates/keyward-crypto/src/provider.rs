//! Crypto capability consumed by the key manager.

use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use crate::{
    CryptoError, Entropy, IdentityId, IdentityKeyPair, OsEntropy, PublicKey, SECRET_KEY_SIZE,
    SYMMETRIC_KEY_SIZE, SymmetricKey,
};

/// Derive the identity id for a public key.
///
/// Lowercase hex SHA-256 of the canonical 32-byte encoding. Deterministic
/// across processes and platforms.
pub fn derive_identity_id(public_key: &PublicKey) -> IdentityId {
    let digest = Sha256::digest(public_key.as_bytes());
    IdentityId::new(hex::encode(digest))
}

/// Primitive operations the key manager needs.
///
/// Implementations hold no key-manager state. Generation draws on an entropy
/// source; everything else is a pure function of its inputs.
///
/// # Invariants
///
/// - `compute_identity_id` is the sole authority for mapping a key to an id
/// - Import of an exported value yields a functionally identical key
/// - No method returns a partially initialized key
pub trait CryptoProvider: Send + Sync + 'static {
    /// Fresh identity key pair for identification and signatures.
    fn generate_identity_key_pair(&self) -> Result<IdentityKeyPair, CryptoError>;

    /// Fresh sender key.
    fn generate_symmetric_key(&self) -> Result<SymmetricKey, CryptoError>;

    /// Identity id for a public key.
    fn compute_identity_id(&self, public_key: &PublicKey) -> IdentityId {
        derive_identity_id(public_key)
    }

    /// Canonical encoding of a public key.
    fn export_public_key(&self, public_key: &PublicKey) -> Vec<u8> {
        public_key.to_bytes().to_vec()
    }

    /// Rebuild a public key from its canonical encoding.
    fn import_public_key(&self, bytes: &[u8]) -> Result<PublicKey, CryptoError> {
        PublicKey::from_bytes(bytes)
    }

    /// Secret seed of an identity key pair, for persistence.
    fn export_key_pair(&self, key_pair: &IdentityKeyPair) -> Zeroizing<Vec<u8>> {
        key_pair.to_secret_bytes()
    }

    /// Rebuild an identity key pair from its exported seed.
    fn import_key_pair(&self, bytes: &[u8]) -> Result<IdentityKeyPair, CryptoError> {
        IdentityKeyPair::from_secret_bytes(bytes)
    }

    /// Raw bytes of a sender key, for persistence.
    fn export_symmetric_key(&self, key: &SymmetricKey) -> Zeroizing<Vec<u8>> {
        Zeroizing::new(key.as_bytes().to_vec())
    }

    /// Rebuild a sender key from its exported bytes.
    fn import_symmetric_key(&self, bytes: &[u8]) -> Result<SymmetricKey, CryptoError> {
        SymmetricKey::from_bytes(bytes)
    }
}

/// Ed25519 identities and random 32-byte sender keys.
#[derive(Debug, Clone, Default)]
pub struct Ed25519Provider<E = OsEntropy> {
    entropy: E,
}

impl Ed25519Provider<OsEntropy> {
    /// Provider backed by the operating system RNG.
    pub fn new() -> Self {
        Self { entropy: OsEntropy }
    }
}

impl<E: Entropy> Ed25519Provider<E> {
    /// Provider backed by a custom entropy source.
    pub fn with_entropy(entropy: E) -> Self {
        Self { entropy }
    }
}

impl<E: Entropy> CryptoProvider for Ed25519Provider<E> {
    fn generate_identity_key_pair(&self) -> Result<IdentityKeyPair, CryptoError> {
        let mut seed = Zeroizing::new([0u8; SECRET_KEY_SIZE]);
        self.entropy.fill(&mut seed[..])?;
        Ok(IdentityKeyPair::from_seed(&seed))
    }

    fn generate_symmetric_key(&self) -> Result<SymmetricKey, CryptoError> {
        let mut key = Zeroizing::new([0u8; SYMMETRIC_KEY_SIZE]);
        self.entropy.fill(&mut key[..])?;
        Ok(SymmetricKey::new(*key))
    }
}
