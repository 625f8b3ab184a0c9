//! Broker-client seam.
//!
//! [`crate::Transport`] owns connection lifecycle (timeouts, teardown,
//! dispatch); a [`Connector`] only knows how to reach one kind of broker
//! and speak its protocol. Swapping the connector swaps the broker.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::LinkError;

/// A message delivered by the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Topic the message was published on
    pub topic: String,
    /// Opaque payload
    pub payload: Bytes,
}

/// An established broker session.
pub struct Session {
    /// Outbound half: subscriptions and publishes
    pub link: Box<dyn Link>,
    /// Inbound messages; ends when the broker closes the session
    pub inbound: mpsc::Receiver<InboundMessage>,
}

/// Opens broker sessions.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Connect to `address` and complete the broker handshake.
    ///
    /// Returns only once the broker has acknowledged the session. Dropping
    /// the future abandons the attempt and releases everything it opened.
    async fn connect(&self, address: &str, client_id: &str) -> Result<Session, LinkError>;
}

/// Outbound half of a broker session.
///
/// # Invariants
///
/// - `subscribe`/`unsubscribe` resolve only after the broker answered
/// - `publish` never waits for the broker
/// - After `close`, every operation fails with [`LinkError::Closed`]
#[async_trait]
pub trait Link: Send + Sync + 'static {
    /// Subscribe to `topic`.
    async fn subscribe(&self, topic: &str) -> Result<(), LinkError>;

    /// Drop a subscription. Unsubscribing from an unknown topic succeeds.
    async fn unsubscribe(&self, topic: &str) -> Result<(), LinkError>;

    /// Queue a message for `topic` (fire-and-forget).
    fn publish(&self, topic: &str, payload: Bytes) -> Result<(), LinkError>;

    /// Close the session. Idempotent.
    fn close(&self);
}
