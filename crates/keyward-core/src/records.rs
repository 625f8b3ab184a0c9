//! Persisted record layouts.
//!
//! Records are CBOR-encoded. Key material is stored in the exact exported
//! form produced by the crypto provider, so it round-trips byte for byte.

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use zeroize::{Zeroize, Zeroizing};

use crate::{TrustStatus, store::StoreError};

/// Local identity, including the exported secret seed.
#[derive(Serialize, Deserialize)]
pub(crate) struct StoredIdentity {
    pub(crate) id: String,
    pub(crate) username: String,
    #[serde(with = "serde_bytes")]
    pub(crate) public_key: Vec<u8>,
    #[serde(with = "serde_bytes")]
    pub(crate) secret_key: Vec<u8>,
}

impl Drop for StoredIdentity {
    fn drop(&mut self) {
        self.secret_key.zeroize();
    }
}

/// Pinned remote peer.
#[derive(Serialize, Deserialize)]
pub(crate) struct StoredPeer {
    pub(crate) id: String,
    pub(crate) username: Option<String>,
    #[serde(with = "serde_bytes")]
    pub(crate) public_key: Vec<u8>,
    pub(crate) trust: TrustStatus,
}

/// All sender keys of one (peer, room) scope, ordered by activation.
#[derive(Serialize, Deserialize, Default)]
pub(crate) struct StoredSenderKeys {
    pub(crate) entries: Vec<StoredSenderKey>,
}

#[derive(Serialize, Deserialize)]
pub(crate) struct StoredSenderKey {
    pub(crate) activates_at: u64,
    #[serde(with = "serde_bytes")]
    pub(crate) key: Vec<u8>,
}

impl Drop for StoredSenderKey {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

/// Encode a record. The buffer is zeroized on drop since records may carry
/// secrets.
pub(crate) fn encode<T: Serialize>(record: &T) -> Result<Zeroizing<Vec<u8>>, StoreError> {
    let mut bytes = Zeroizing::new(Vec::new());
    ciborium::into_writer(record, &mut *bytes)
        .map_err(|e| StoreError::Serialization(e.to_string()))?;
    Ok(bytes)
}

/// Decode a record.
pub(crate) fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StoreError> {
    ciborium::from_reader(bytes).map_err(|e| StoreError::Serialization(e.to_string()))
}
