//! Keyward Cryptographic Primitives
//!
//! Key material for the Keyward key manager. The [`CryptoProvider`] trait is
//! the capability the key manager consumes; [`Ed25519Provider`] is the
//! production implementation.
//!
//! # Key Types
//!
//! ```text
//! Entropy ──► IdentityKeyPair (Ed25519) ──► PublicKey ──► IdentityId
//!    │                                         (SHA-256, hex)
//!    └──────► SymmetricKey (32 bytes, sender keys)
//! ```
//!
//! An [`IdentityId`] is the lowercase hex SHA-256 digest of the 32-byte
//! compressed Ed25519 public key. It is the only way a peer's id is derived
//! from its key, so the same key yields the same id in every process.
//!
//! # Security
//!
//! - Secret seeds and symmetric keys are zeroized on drop
//! - [`SymmetricKey`] comparison is constant-time
//! - `Debug` output never contains secret bytes
//! - Import rejects malformed encodings; no partially initialized key is ever
//!   returned

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod entropy;
mod error;
mod keys;
mod provider;

pub use ed25519_dalek::Signature;
pub use entropy::{Entropy, OsEntropy, SeededEntropy};
pub use error::CryptoError;
pub use keys::{
    IdentityId, IdentityKeyPair, PUBLIC_KEY_SIZE, PublicKey, SECRET_KEY_SIZE, SYMMETRIC_KEY_SIZE,
    SymmetricKey,
};
pub use provider::{CryptoProvider, Ed25519Provider, derive_identity_id};
