//! Crypto error types.

use thiserror::Error;

/// Errors from key generation, import, and verification.
///
/// Every variant is fatal to the operation that produced it. Callers never
/// retry automatically: a malformed key stays malformed, and an entropy
/// failure means the platform cannot produce keys safely.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// Entropy source failed to produce random bytes
    #[error("entropy source unavailable: {0}")]
    Entropy(String),

    /// Public key bytes are not a valid Ed25519 point encoding
    #[error("invalid public key: {reason}")]
    InvalidPublicKey {
        /// Why the encoding was rejected
        reason: String,
    },

    /// Exported secret key has the wrong length
    #[error("invalid secret key: expected {expected} bytes, got {actual}")]
    InvalidSecretKey {
        /// Required length
        expected: usize,
        /// Length that was provided
        actual: usize,
    },

    /// Exported symmetric key has the wrong length
    #[error("invalid symmetric key: expected {expected} bytes, got {actual}")]
    InvalidSymmetricKey {
        /// Required length
        expected: usize,
        /// Length that was provided
        actual: usize,
    },

    /// Signature did not verify against the public key
    #[error("signature verification failed")]
    InvalidSignature,
}
