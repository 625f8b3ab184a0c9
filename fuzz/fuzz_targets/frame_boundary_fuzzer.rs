//! Fuzz target for frame header boundary conditions
//!
//! # Strategy
//!
//! - Magic bytes: valid, off-by-one, all-zeros, random
//! - Version: valid, zero, random
//! - Body size: zero, at-max, just-over-max, u32::MAX, random
//! - Body: arbitrary bytes, possibly shorter than the header claims
//!
//! # Invariants
//!
//! - Body size over `FrameHeader::MAX_BODY_SIZE` MUST be `PayloadTooLarge`
//! - Wrong magic MUST be `InvalidMagic`
//! - A body shorter than claimed MUST be `FrameTruncated`
//! - NEVER panic

#![no_main]

use arbitrary::Arbitrary;
use keyward_proto::{BrokerFrame, FrameHeader, ProtocolError};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Clone, Arbitrary)]
struct BoundaryFrame {
    magic: MagicBytes,
    version: VersionByte,
    body_size: BodySize,
    body: Vec<u8>,
}

#[derive(Debug, Clone, Arbitrary)]
enum MagicBytes {
    Valid,
    OffByOne(u8),
    AllZeros,
    Random([u8; 4]),
}

#[derive(Debug, Clone, Arbitrary)]
enum VersionByte {
    Valid,
    Zero,
    Random(u8),
}

#[derive(Debug, Clone, Arbitrary)]
enum BodySize {
    Zero,
    Actual,
    AtMax,
    JustOverMax,
    MaxU32,
    Random(u32),
}

impl BoundaryFrame {
    fn magic(&self) -> [u8; 4] {
        match &self.magic {
            MagicBytes::Valid => FrameHeader::MAGIC,
            MagicBytes::OffByOne(i) => {
                let mut magic = FrameHeader::MAGIC;
                let idx = usize::from(*i) % 4;
                magic[idx] = magic[idx].wrapping_add(1);
                magic
            },
            MagicBytes::AllZeros => [0; 4],
            MagicBytes::Random(bytes) => *bytes,
        }
    }

    fn version(&self) -> u8 {
        match self.version {
            VersionByte::Valid => FrameHeader::VERSION,
            VersionByte::Zero => 0,
            VersionByte::Random(v) => v,
        }
    }

    fn body_size(&self) -> u32 {
        match self.body_size {
            BodySize::Zero => 0,
            BodySize::Actual => u32::try_from(self.body.len()).unwrap_or(u32::MAX),
            BodySize::AtMax => FrameHeader::MAX_BODY_SIZE,
            BodySize::JustOverMax => FrameHeader::MAX_BODY_SIZE + 1,
            BodySize::MaxU32 => u32::MAX,
            BodySize::Random(n) => n,
        }
    }

    fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(FrameHeader::SIZE + self.body.len());
        bytes.extend_from_slice(&self.magic());
        bytes.push(self.version());
        bytes.push(0);
        bytes.extend_from_slice(&[0, 0]);
        bytes.extend_from_slice(&self.body_size().to_be_bytes());
        bytes.extend_from_slice(&self.body);
        bytes
    }
}

fuzz_target!(|input: BoundaryFrame| {
    let bytes = input.to_bytes();
    let result = BrokerFrame::decode(&bytes);

    if input.magic() != FrameHeader::MAGIC {
        assert!(matches!(result, Err(ProtocolError::InvalidMagic)), "bad magic: {result:?}");
        return;
    }
    if input.version() != FrameHeader::VERSION {
        assert!(matches!(result, Err(ProtocolError::UnsupportedVersion(_))), "{result:?}");
        return;
    }

    let body_size = input.body_size();
    if body_size > FrameHeader::MAX_BODY_SIZE {
        assert!(matches!(result, Err(ProtocolError::PayloadTooLarge { .. })), "{result:?}");
    } else if body_size as usize > input.body.len() {
        assert!(matches!(result, Err(ProtocolError::FrameTruncated { .. })), "{result:?}");
    }
});
