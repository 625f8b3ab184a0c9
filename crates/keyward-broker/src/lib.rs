//! Keyward reference broker.
//!
//! Topic-based publish/subscribe relay over QUIC. Each client opens one
//! bidirectional stream, announces itself with `Connect`, and then
//! subscribes, unsubscribes and publishes on that stream. Published messages
//! fan out to every subscriber of the topic, the publisher included.
//!
//! # Architecture
//!
//! ```text
//! Broker::run
//!   └── per connection task
//!         ├── reader: Subscribe / Unsubscribe / Publish ──► TopicRegistry
//!         └── writer: outbound queue ──► SendStream (acks, messages)
//! ```
//!
//! Every frame to a client goes through its single outbound queue, so acks
//! and messages reach the client in the order the broker produced them.
//! Nothing is persisted: subscriptions live as long as the connection.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod error;
mod registry;
mod tls;

use std::{net::SocketAddr, sync::Arc};

use keyward_proto::{BrokerFrame, Outcome, read_frame, validate_topic, write_frame};
use quinn::{Endpoint, RecvStream, SendStream};
use rustls::pki_types::CertificateDer;
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, info, warn};

pub use error::BrokerError;
pub use registry::TopicRegistry;

/// Broker configuration.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Address to bind to (e.g., "0.0.0.0:4433")
    pub bind_address: String,
    /// Path to TLS certificate (PEM format)
    pub cert_path: Option<String>,
    /// Path to TLS private key (PEM format)
    pub key_path: Option<String>,
    /// Per-client outbound queue depth; messages beyond it are dropped for
    /// that client
    pub outbound_buffer: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:4433".to_string(),
            cert_path: None,
            key_path: None,
            outbound_buffer: 1024,
        }
    }
}

struct Shared {
    registry: RwLock<TopicRegistry>,
    outbound_buffer: usize,
}

/// QUIC pub/sub broker.
pub struct Broker {
    endpoint: Endpoint,
    certificate: CertificateDer<'static>,
    shared: Arc<Shared>,
}

impl Broker {
    /// Bind the QUIC endpoint.
    ///
    /// Uses the configured PEM certificate and key when both are set, and a
    /// freshly generated self-signed certificate for `localhost` when
    /// neither is.
    ///
    /// # Errors
    ///
    /// - `BrokerError::Config` for an unparsable bind address, unreadable PEM
    ///   files, or when only one of certificate and key is set
    /// - `BrokerError::Transport` if the endpoint cannot be created
    pub fn bind(config: BrokerConfig) -> Result<Self, BrokerError> {
        let addr: SocketAddr = config.bind_address.parse().map_err(|e| {
            BrokerError::Config(format!("invalid bind address '{}': {e}", config.bind_address))
        })?;

        let setup = match (&config.cert_path, &config.key_path) {
            (Some(cert), Some(key)) => tls::load(cert, key)?,
            (None, None) => tls::self_signed()?,
            (Some(_), None) | (None, Some(_)) => {
                return Err(BrokerError::Config(
                    "TLS certificate and key must be given together".to_string(),
                ));
            },
        };

        let endpoint = Endpoint::server(setup.server_config, addr)
            .map_err(|e| BrokerError::Transport(format!("failed to create endpoint: {e}")))?;

        info!("QUIC broker bound to {addr}");

        Ok(Self {
            endpoint,
            certificate: setup.certificate,
            shared: Arc::new(Shared {
                registry: RwLock::new(TopicRegistry::new()),
                outbound_buffer: config.outbound_buffer.max(1),
            }),
        })
    }

    /// Local address the broker is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, BrokerError> {
        self.endpoint
            .local_addr()
            .map_err(|e| BrokerError::Transport(format!("failed to get local address: {e}")))
    }

    /// Leaf certificate presented to clients. Clients pin it to trust a
    /// self-signed broker.
    pub fn certificate(&self) -> &CertificateDer<'static> {
        &self.certificate
    }

    /// Accept and serve connections until the endpoint is closed.
    pub async fn run(self) -> Result<(), BrokerError> {
        info!("broker accepting connections on {}", self.local_addr()?);

        let mut next_session = 0u64;
        while let Some(incoming) = self.endpoint.accept().await {
            next_session += 1;
            let session_id = next_session;
            let shared = Arc::clone(&self.shared);

            tokio::spawn(async move {
                if let Err(e) = serve_connection(incoming, shared, session_id).await {
                    warn!(session_id, "connection ended with error: {e}");
                }
            });
        }

        info!("endpoint closed, broker stopping");
        Ok(())
    }
}

async fn serve_connection(
    incoming: quinn::Incoming,
    shared: Arc<Shared>,
    session_id: u64,
) -> Result<(), BrokerError> {
    let connection =
        incoming.await.map_err(|e| BrokerError::Transport(format!("handshake failed: {e}")))?;
    let remote = connection.remote_address();

    let (mut send, mut recv) = connection
        .accept_bi()
        .await
        .map_err(|e| BrokerError::Transport(format!("accept_bi failed: {e}")))?;

    let client_id = match read_frame(&mut recv).await? {
        Some(BrokerFrame::Connect { client_id }) => client_id,
        Some(other) => {
            connection.close(1u32.into(), b"expected connect");
            return Err(BrokerError::Protocol(format!("expected connect, got {}", other.kind())));
        },
        None => return Ok(()),
    };

    write_frame(&mut send, &BrokerFrame::ConnAck).await?;

    let (outbound_tx, outbound_rx) = mpsc::channel(shared.outbound_buffer);
    shared.registry.write().await.register_session(session_id, &client_id, outbound_tx.clone());
    info!(session_id, %remote, client = %client_id, "client connected");

    let writer = tokio::spawn(run_writer(send, outbound_rx));
    let result = serve_frames(&mut recv, &shared, session_id, &outbound_tx).await;

    let topics = shared.registry.write().await.unregister_session(session_id);
    drop(outbound_tx);
    // Writer drains what is already queued, then finishes the stream
    let _ = writer.await;

    info!(
        session_id,
        client = %client_id,
        subscriptions = topics.unwrap_or_default().len(),
        "client disconnected"
    );
    result
}

async fn serve_frames(
    recv: &mut RecvStream,
    shared: &Shared,
    session_id: u64,
    outbound: &mpsc::Sender<BrokerFrame>,
) -> Result<(), BrokerError> {
    while let Some(frame) = read_frame(recv).await? {
        match frame {
            BrokerFrame::Subscribe { request_id, topic } => {
                let outcome = match validate_topic(&topic) {
                    Ok(()) => {
                        shared.registry.write().await.subscribe(session_id, &topic);
                        debug!(session_id, %topic, "subscribed");
                        Outcome::Accepted
                    },
                    Err(e) => Outcome::Rejected { reason: e.to_string() },
                };
                reply(outbound, BrokerFrame::SubAck { request_id, outcome }).await?;
            },
            BrokerFrame::Unsubscribe { request_id, topic } => {
                shared.registry.write().await.unsubscribe(session_id, &topic);
                debug!(session_id, %topic, "unsubscribed");
                reply(outbound, BrokerFrame::UnsubAck { request_id, outcome: Outcome::Accepted })
                    .await?;
            },
            BrokerFrame::Publish { topic, payload } => {
                if validate_topic(&topic).is_err() {
                    debug!(session_id, "dropping publish to invalid topic");
                    continue;
                }
                let delivered = shared.registry.read().await.route(&topic, &payload);
                debug!(session_id, %topic, delivered, "published");
            },
            other => {
                return Err(BrokerError::Protocol(format!(
                    "unexpected {} frame from client",
                    other.kind()
                )));
            },
        }
    }

    Ok(())
}

/// Queue an ack. Acks wait for queue space rather than being dropped.
async fn reply(outbound: &mpsc::Sender<BrokerFrame>, frame: BrokerFrame) -> Result<(), BrokerError> {
    outbound
        .send(frame)
        .await
        .map_err(|_| BrokerError::Transport("outbound queue closed".to_string()))
}

async fn run_writer(mut send: SendStream, mut outbound: mpsc::Receiver<BrokerFrame>) {
    while let Some(frame) = outbound.recv().await {
        if let Err(e) = write_frame(&mut send, &frame).await {
            warn!("client write failed: {e}");
            return;
        }
    }

    let _ = send.finish();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(cert_path: Option<&str>, key_path: Option<&str>) -> BrokerConfig {
        BrokerConfig {
            bind_address: "127.0.0.1:0".to_string(),
            cert_path: cert_path.map(str::to_string),
            key_path: key_path.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn certificate_without_key_is_config_error() {
        let result = Broker::bind(config(Some("broker.crt"), None));
        assert!(matches!(result, Err(BrokerError::Config(ref msg)) if msg.contains("together")));
    }

    #[test]
    fn key_without_certificate_is_config_error() {
        let result = Broker::bind(config(None, Some("broker.key")));
        assert!(matches!(result, Err(BrokerError::Config(ref msg)) if msg.contains("together")));
    }

    #[test]
    fn invalid_bind_address_is_config_error() {
        let config = BrokerConfig { bind_address: "not-an-address".to_string(), ..Default::default() };
        assert!(matches!(Broker::bind(config), Err(BrokerError::Config(_))));
    }
}
