//! Store error types.
//!
//! - `Io`: the backend failed to read or write
//! - `Serialization`: a record could not be encoded or decoded
//! - `Corrupt`: a record decoded but violates an invariant (e.g. the stored
//!   id does not match the stored key)

use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// I/O error (file system, database, etc.)
    #[error("I/O error: {0}")]
    Io(String),

    /// Serialization or deserialization failed
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Stored record is internally inconsistent
    #[error("corrupt record at '{key}': {reason}")]
    Corrupt {
        /// Store key of the record
        key: String,
        /// What was inconsistent
        reason: String,
    },
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
