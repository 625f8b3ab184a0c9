//! Keyward Key Manager
//!
//! Client-side key management: the local identity, a trust-on-first-use
//! registry of remote peers, and per-(peer, room) sender keys indexed by
//! activation time.
//!
//! # Architecture
//!
//! ```text
//! KeyManager<C: CryptoProvider, S: KeyStore>
//!   ├── Identity           generate, save, load (one per device)
//!   ├── Peer registry      id ──► pinned PublicKey, username, trust
//!   └── Sender keys        (peer, room) ──► BTreeMap<activates_at, SymmetricKey>
//! ```
//!
//! The manager owns no I/O of its own. Durability goes through [`KeyStore`]
//! (with [`MemoryStore`], [`RedbStore`] and the fault-injecting
//! [`ChaoticStore`] as backends); key generation and id derivation go
//! through [`keyward_crypto::CryptoProvider`].
//!
//! # Store Layout
//!
//! Records are CBOR-encoded under namespaced keys (default namespace
//! `keyward`):
//!
//! - `{ns}/identity`
//! - `{ns}/peer/{peer_id}`
//! - `{ns}/sender-keys/{peer_id}/{room_id}`
//!
//! # Security Invariants
//!
//! - A peer id always equals the digest of its pinned key
//! - A pinned key is never replaced; a mismatch is
//!   [`KeyError::SecurityViolation`]
//! - Key material never appears in logs or `Debug` output

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod error;
mod identity;
mod key_manager;
mod peer;
mod records;
mod sender_keys;
pub mod store;

pub use error::KeyError;
pub use identity::Identity;
pub use key_manager::{DEFAULT_NAMESPACE, KeyManager, KeyManagerConfig};
pub use peer::{Peer, TrustStatus};
pub use sender_keys::{RoomId, SenderKeyEntry};
pub use store::{ChaoticStore, KeyStore, MemoryStore, RedbStore, StoreError};
