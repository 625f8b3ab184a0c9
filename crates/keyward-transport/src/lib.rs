//! Keyward Transport
//!
//! Client side of a topic-based publish/subscribe broker. A [`Transport`]
//! owns the connection lifecycle: bounded connect attempts, subscription
//! requests that resolve on the broker's answer, fire-and-forget publishes,
//! and delivery of inbound messages to a single registered handler.
//!
//! # Architecture
//!
//! ```text
//! Transport<C: Connector>
//!   ├── connect()  ──► C::connect() ──► Session { link, inbound }
//!   ├── subscribe / unsubscribe / send ──► Link
//!   └── dispatch task: inbound ──► on_message handler
//! ```
//!
//! Two connectors ship with the crate:
//!
//! - [`QuicConnector`]: `quic://host:port`, one bidirectional stream per
//!   session carrying [`keyward_proto`] frames
//! - [`MemoryBroker`]: `memory://name`, an in-process broker with scripted
//!   connect behavior for tests
//!
//! # Connect Semantics
//!
//! `connect` uses the first candidate server only and reports exactly one
//! outcome. If the broker has not acknowledged within the timeout the attempt
//! is abandoned with [`TransportError::ConnectTimeout`]; a session completing
//! after that point is closed, never installed.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod connector;
mod error;
mod memory;
mod quic;
mod transport;

pub use connector::{Connector, InboundMessage, Link, Session};
pub use error::{LinkError, TransportError};
pub use memory::{ConnectBehavior, MEMORY_SCHEME, MemoryBroker};
pub use quic::{QUIC_SCHEME, QuicConfig, QuicConnector, ServerVerification};
pub use transport::{Transport, TransportConfig, TransportState};
