//! Keyward Wire Protocol
//!
//! Framing between transport clients and the broker.
//!
//! # Frame Layout
//!
//! ```text
//! ┌────────────────────────────────────────┐
//! │ FrameHeader (12 bytes, big endian)     │
//! │   magic "KWRD" | version | flags |     │
//! │   reserved (2) | payload_size (u32)    │
//! ├────────────────────────────────────────┤
//! │ Body: CBOR-encoded BrokerFrame         │
//! └────────────────────────────────────────┘
//! ```
//!
//! The header is fixed-size raw binary so a reader knows how many body bytes
//! to wait for before deserializing anything. Bodies are CBOR for type
//! safety and forward compatibility.
//!
//! # Message Flow
//!
//! ```text
//! client                         broker
//!   │── Connect { client_id } ────►│
//!   │◄──────────────── ConnAck ────│
//!   │── Subscribe { id, topic } ──►│
//!   │◄──── SubAck { id, outcome } ─│
//!   │── Publish { topic, payload }►│ ──► Message to each subscriber
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod codec;
mod errors;
mod frame;
mod header;
mod topic;

pub use codec::{read_frame, write_frame};
pub use errors::{ProtocolError, Result};
pub use frame::{BrokerFrame, Outcome};
pub use header::FrameHeader;
pub use topic::{MAX_TOPIC_LEN, validate_topic};

/// ALPN protocol identifier negotiated on QUIC connections.
pub const ALPN_PROTOCOL: &[u8] = b"keyward/1";

/// Maximum application payload carried by `Publish` / `Message` (1 MiB).
pub const MAX_PAYLOAD_SIZE: usize = 1024 * 1024;
