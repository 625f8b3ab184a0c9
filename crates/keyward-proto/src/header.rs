//! Frame header with zero-copy parsing.
//!
//! The `FrameHeader` is a fixed 12-byte structure serialized as raw binary
//! (big endian). A reader validates it before allocating anything for the
//! body.

use std::fmt;

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::{
    MAX_PAYLOAD_SIZE,
    errors::{ProtocolError, Result},
};

/// Fixed 12-byte frame header (big endian network byte order)
///
/// Fields are raw byte arrays so the struct has no alignment requirements
/// and every 12-byte pattern is a valid value. Semantic validation (magic,
/// version, size limit) happens in [`FrameHeader::from_bytes`].
#[repr(C, packed)]
#[derive(Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct FrameHeader {
    magic: [u8; 4],        // "KWRD"
    version: u8,           // 0x01
    flags: u8,             // reserved for extensions, currently 0
    reserved: [u8; 2],     // must be ignored by readers
    payload_size: [u8; 4], // u32 body length
}

impl FrameHeader {
    /// Size of the serialized header
    pub const SIZE: usize = 12;

    /// Magic number: "KWRD" in ASCII
    pub const MAGIC: [u8; 4] = *b"KWRD";

    /// Current protocol version
    pub const VERSION: u8 = 0x01;

    /// Maximum body size: the largest application payload plus room for the
    /// topic and CBOR envelope.
    pub const MAX_BODY_SIZE: u32 = (MAX_PAYLOAD_SIZE + 4 * 1024) as u32;

    /// Header for a body of `payload_size` bytes.
    #[must_use]
    pub fn new(payload_size: u32) -> Self {
        Self {
            magic: Self::MAGIC,
            version: Self::VERSION,
            flags: 0,
            reserved: [0; 2],
            payload_size: payload_size.to_be_bytes(),
        }
    }

    /// Parse and validate a header from the front of `bytes`.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::FrameTooShort` if fewer than 12 bytes are given
    /// - `ProtocolError::InvalidMagic` if the magic is not "KWRD"
    /// - `ProtocolError::UnsupportedVersion` for any other version
    /// - `ProtocolError::PayloadTooLarge` if the body exceeds
    ///   [`Self::MAX_BODY_SIZE`]
    pub fn from_bytes(bytes: &[u8]) -> Result<&Self> {
        let header = Self::ref_from_prefix(bytes)
            .map_err(|_| ProtocolError::FrameTooShort { expected: Self::SIZE, actual: bytes.len() })?
            .0;

        if header.magic != Self::MAGIC {
            return Err(ProtocolError::InvalidMagic);
        }

        if header.version != Self::VERSION {
            return Err(ProtocolError::UnsupportedVersion(header.version));
        }

        let payload_size = u32::from_be_bytes(header.payload_size);
        if payload_size > Self::MAX_BODY_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                size: payload_size as usize,
                max: Self::MAX_BODY_SIZE as usize,
            });
        }

        Ok(header)
    }

    /// Serialize header to bytes.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut arr = [0u8; Self::SIZE];
        arr.copy_from_slice(IntoBytes::as_bytes(self));
        arr
    }

    /// Protocol version byte.
    #[must_use]
    pub fn version(&self) -> u8 {
        self.version
    }

    /// Flag byte. No flags are defined yet.
    #[must_use]
    pub fn flags(&self) -> u8 {
        self.flags
    }

    /// Length of the CBOR body that follows.
    #[must_use]
    pub fn payload_size(&self) -> u32 {
        u32::from_be_bytes(self.payload_size)
    }
}

impl fmt::Debug for FrameHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let flags = self.flags;
        f.debug_struct("FrameHeader")
            .field("version", &self.version())
            .field("flags", &flags)
            .field("payload_size", &self.payload_size())
            .finish()
    }
}
