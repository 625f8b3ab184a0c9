//! Key types.
//!
//! Thin wrappers over the Ed25519 implementation that fix the canonical byte
//! encodings used for persistence and identity derivation.

use std::fmt;

use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, Zeroizing};

use crate::CryptoError;

/// Size of a compressed Ed25519 public key.
pub const PUBLIC_KEY_SIZE: usize = 32;

/// Size of an exported Ed25519 secret seed.
pub const SECRET_KEY_SIZE: usize = 32;

/// Size of a sender key.
pub const SYMMETRIC_KEY_SIZE: usize = 32;

/// Stable handle for an actor, derived from its public key.
///
/// Produced by [`crate::derive_identity_id`]: lowercase hex of SHA-256 over
/// the 32-byte public key. Ids received from the network are wrapped with
/// [`IdentityId::new`] and checked against the key they arrive with.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdentityId(String);

impl IdentityId {
    /// Wrap an id string without validating it.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume into the owned string.
    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for IdentityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for IdentityId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for IdentityId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Ed25519 public key.
///
/// Equality is byte equality of the compressed encoding, which is what TOFU
/// pinning compares.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey(VerifyingKey);

impl PublicKey {
    /// Import from the canonical 32-byte encoding.
    ///
    /// # Errors
    ///
    /// `CryptoError::InvalidPublicKey` if the length is wrong or the bytes do
    /// not decompress to a curve point.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let array = <&[u8; PUBLIC_KEY_SIZE]>::try_from(bytes).map_err(|_| {
            CryptoError::InvalidPublicKey {
                reason: format!("expected {PUBLIC_KEY_SIZE} bytes, got {}", bytes.len()),
            }
        })?;

        VerifyingKey::from_bytes(array)
            .map(Self)
            .map_err(|e| CryptoError::InvalidPublicKey { reason: e.to_string() })
    }

    /// Canonical 32-byte encoding.
    pub fn to_bytes(&self) -> [u8; PUBLIC_KEY_SIZE] {
        self.0.to_bytes()
    }

    /// Borrow the canonical encoding.
    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_SIZE] {
        self.0.as_bytes()
    }

    /// Verify a signature made by the matching [`IdentityKeyPair`].
    ///
    /// Uses strict verification (rejects small-order keys and malleable
    /// signatures).
    pub fn verify(&self, message: &[u8], signature: &Signature) -> Result<(), CryptoError> {
        self.0.verify_strict(message, signature).map_err(|_| CryptoError::InvalidSignature)
    }

    /// Short hex prefix of the key for logs and error messages.
    pub fn fingerprint(&self) -> String {
        hex::encode(&self.as_bytes()[..8])
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self.fingerprint())
    }
}

/// Long-term identity key pair.
///
/// The secret half is zeroized when the pair is dropped. It only leaves the
/// process through [`IdentityKeyPair::to_secret_bytes`], which hands out a
/// zeroizing buffer for persistence.
#[derive(Clone)]
pub struct IdentityKeyPair {
    signing: SigningKey,
}

impl IdentityKeyPair {
    /// Build a key pair from a 32-byte secret seed.
    pub fn from_seed(seed: &[u8; SECRET_KEY_SIZE]) -> Self {
        Self { signing: SigningKey::from_bytes(seed) }
    }

    /// Import from the exported secret seed.
    ///
    /// # Errors
    ///
    /// `CryptoError::InvalidSecretKey` if `bytes` is not exactly 32 bytes.
    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let seed = <&[u8; SECRET_KEY_SIZE]>::try_from(bytes).map_err(|_| {
            CryptoError::InvalidSecretKey { expected: SECRET_KEY_SIZE, actual: bytes.len() }
        })?;

        Ok(Self::from_seed(seed))
    }

    /// Export the secret seed.
    pub fn to_secret_bytes(&self) -> Zeroizing<Vec<u8>> {
        Zeroizing::new(self.signing.as_bytes().to_vec())
    }

    /// Public half of the pair.
    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.signing.verifying_key())
    }

    /// Sign a message with the identity key.
    pub fn sign(&self, message: &[u8]) -> Signature {
        self.signing.sign(message)
    }
}

impl fmt::Debug for IdentityKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityKeyPair").field("public", &self.public_key()).finish_non_exhaustive()
    }
}

/// Symmetric sender key.
///
/// Zeroized on drop. Comparison is constant-time.
#[derive(Clone)]
pub struct SymmetricKey {
    key: [u8; SYMMETRIC_KEY_SIZE],
}

impl SymmetricKey {
    /// Wrap raw key bytes.
    pub fn new(key: [u8; SYMMETRIC_KEY_SIZE]) -> Self {
        Self { key }
    }

    /// Import from the exported form.
    ///
    /// # Errors
    ///
    /// `CryptoError::InvalidSymmetricKey` if `bytes` is not exactly 32 bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let key = <[u8; SYMMETRIC_KEY_SIZE]>::try_from(bytes).map_err(|_| {
            CryptoError::InvalidSymmetricKey { expected: SYMMETRIC_KEY_SIZE, actual: bytes.len() }
        })?;

        Ok(Self { key })
    }

    /// 32-byte key material.
    pub fn as_bytes(&self) -> &[u8; SYMMETRIC_KEY_SIZE] {
        &self.key
    }
}

impl PartialEq for SymmetricKey {
    fn eq(&self, other: &Self) -> bool {
        self.key.ct_eq(&other.key).into()
    }
}

impl Eq for SymmetricKey {}

impl fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SymmetricKey(<redacted>)")
    }
}

impl Drop for SymmetricKey {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}
