//! Key manager error types.
//!
//! Every failure surfaces as its own variant. Callers (notably UIs) must be
//! able to tell a [`KeyError::SecurityViolation`] apart from an ordinary
//! lookup or storage failure, so nothing is collapsed into a generic error.

use keyward_crypto::{CryptoError, IdentityId};
use thiserror::Error;

use crate::{RoomId, store::StoreError};

/// Errors returned by [`crate::KeyManager`] operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyError {
    /// `init()` has not completed and no identity is loaded
    #[error("key manager not initialized")]
    NotInitialized,

    /// Operation requires a registered peer
    #[error("unknown peer: {peer_id}")]
    UnknownPeer {
        /// Peer that is not registered
        peer_id: IdentityId,
    },

    /// A different public key was presented for a pinned peer id.
    ///
    /// Never retried or resolved automatically. Resolving it requires an
    /// explicit trust decision by the user or application.
    #[error("identity key mismatch for peer {peer_id}: pinned {pinned}, presented {presented}")]
    SecurityViolation {
        /// Peer whose key changed
        peer_id: IdentityId,
        /// Fingerprint of the pinned key
        pinned: String,
        /// Fingerprint of the presented key
        presented: String,
    },

    /// Peer id is not the digest of the presented public key
    #[error("peer id {peer_id} does not match its public key (expected {expected})")]
    InvalidPeerId {
        /// Id that was presented
        peer_id: IdentityId,
        /// Id derived from the public key
        expected: IdentityId,
    },

    /// A different sender key already activates at this timestamp
    #[error("sender key conflict for peer {peer_id} in room {room_id} at {activates_at}")]
    SenderKeyConflict {
        /// Peer that owns the key
        peer_id: IdentityId,
        /// Room the key is scoped to
        room_id: RoomId,
        /// Activation timestamp already taken
        activates_at: u64,
    },

    /// Crypto primitive failed
    #[error("crypto failure: {0}")]
    Crypto(#[from] CryptoError),

    /// Persistence failed
    #[error("store failure: {0}")]
    Store(#[from] StoreError),
}

impl KeyError {
    /// Returns true if this error signals a possible impersonation or key
    /// compromise.
    pub fn is_security_violation(&self) -> bool {
        matches!(self, Self::SecurityViolation { .. })
    }

    /// Returns true if the caller can recover by changing its own call
    /// sequence (e.g. registering the peer first).
    ///
    /// Security violations, crypto failures, and corrupt records are never
    /// recoverable this way.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::NotInitialized | Self::UnknownPeer { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn security_violation_is_distinguishable() {
        let err = KeyError::SecurityViolation {
            peer_id: IdentityId::new("abc"),
            pinned: "0102".to_string(),
            presented: "0304".to_string(),
        };
        assert!(err.is_security_violation());
        assert!(!err.is_recoverable());

        let unknown = KeyError::UnknownPeer { peer_id: IdentityId::new("abc") };
        assert!(!unknown.is_security_violation());
        assert!(unknown.is_recoverable());
    }

    #[test]
    fn storage_and_crypto_failures_are_fatal() {
        assert!(!KeyError::Store(StoreError::Io("disk full".to_string())).is_recoverable());
        assert!(!KeyError::Crypto(CryptoError::InvalidSignature).is_recoverable());
    }
}
