//! Protocol error types.

use thiserror::Error;

/// Protocol-level failures: framing, encoding, and validation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Buffer too short to contain a header
    #[error("frame too short: expected {expected} bytes, got {actual}")]
    FrameTooShort {
        /// Required bytes
        expected: usize,
        /// Available bytes
        actual: usize,
    },

    /// Header magic is not "KWRD"
    #[error("invalid magic number")]
    InvalidMagic,

    /// Header version is not supported
    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    /// Body or application payload exceeds its limit
    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge {
        /// Actual size
        size: usize,
        /// Allowed size
        max: usize,
    },

    /// Body shorter than the header claims
    #[error("frame truncated: expected {expected} body bytes, got {actual}")]
    FrameTruncated {
        /// Claimed body size
        expected: usize,
        /// Received body size
        actual: usize,
    },

    /// CBOR encoding failed
    #[error("CBOR encode error: {0}")]
    CborEncode(String),

    /// CBOR decoding failed
    #[error("CBOR decode error: {0}")]
    CborDecode(String),

    /// Topic is not acceptable
    #[error("invalid topic '{topic}': {reason}")]
    InvalidTopic {
        /// Offending topic (possibly truncated)
        topic: String,
        /// Why it was rejected
        reason: &'static str,
    },

    /// Underlying stream failed
    #[error("stream error: {0}")]
    Io(String),
}

impl From<std::io::Error> for ProtocolError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// Result alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;
