//! Connection lifecycle over a [`Connector`].

use std::{
    sync::{Arc, PoisonError, RwLock},
    time::Duration,
};

use bytes::Bytes;
use keyward_proto::{MAX_PAYLOAD_SIZE, validate_topic};
use tokio::{
    sync::{oneshot, watch},
    task::JoinHandle,
    time::Instant,
};
use tracing::{debug, info, trace, warn};

use crate::{Connector, Link, Session, TransportError};

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    /// No session
    Disconnected,
    /// A connect attempt is in flight
    Connecting,
    /// Session established and alive
    Connected,
}

/// Transport configuration.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Name announced to the broker, used only for broker-side logging
    pub client_id: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self { client_id: "keyward-client".to_string() }
    }
}

type MessageHandler = Arc<dyn Fn(&str, &[u8]) + Send + Sync>;

/// State tagged with the session it belongs to, so a stale session's
/// dispatch task can never mark a newer session as disconnected.
#[derive(Debug, Clone, Copy)]
struct Status {
    state: TransportState,
    session: u64,
}

struct ActiveSession {
    server: String,
    link: Arc<dyn Link>,
    dispatch: JoinHandle<()>,
}

/// Resets `Connecting` if the connect future is dropped midway.
struct ConnectingGuard {
    status: Arc<watch::Sender<Status>>,
    session: u64,
}

impl Drop for ConnectingGuard {
    fn drop(&mut self) {
        let session = self.session;
        self.status.send_if_modified(|status| {
            if status.session == session && status.state == TransportState::Connecting {
                status.state = TransportState::Disconnected;
                true
            } else {
                false
            }
        });
    }
}

/// Pub/sub client for one broker at a time.
///
/// ```text
///              connect()                   ack
/// Disconnected ─────────► Connecting ──────────────► Connected
///      ▲                      │ timeout / error          │
///      └──────────────────────┴──────────────────────────┘
///                               disconnect() / broker closed
/// ```
///
/// Lifecycle operations take `&mut self`, so at most one connect is in
/// flight per transport. Inbound messages are delivered by a background
/// task to the handler registered with [`on_message`](Self::on_message).
pub struct Transport<C: Connector> {
    connector: Arc<C>,
    config: TransportConfig,
    status: Arc<watch::Sender<Status>>,
    next_session: u64,
    session: Option<ActiveSession>,
    handler: Arc<RwLock<Option<MessageHandler>>>,
}

impl<C: Connector> Transport<C> {
    /// Create a disconnected transport.
    pub fn new(connector: C) -> Self {
        Self::with_config(connector, TransportConfig::default())
    }

    /// Create a disconnected transport with explicit configuration.
    pub fn with_config(connector: C, config: TransportConfig) -> Self {
        let (status, _) =
            watch::channel(Status { state: TransportState::Disconnected, session: 0 });

        Self {
            connector: Arc::new(connector),
            config,
            status: Arc::new(status),
            next_session: 0,
            session: None,
            handler: Arc::new(RwLock::new(None)),
        }
    }

    /// Current connection state.
    pub fn state(&self) -> TransportState {
        self.status.borrow().state
    }

    /// Address of the broker while connected.
    pub fn server(&self) -> Option<&str> {
        self.session
            .as_ref()
            .filter(|_| self.state() == TransportState::Connected)
            .map(|s| s.server.as_str())
    }

    /// The connector in use.
    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// Connect to the first of `candidate_servers`.
    ///
    /// Any existing session is torn down first. Exactly one outcome is
    /// reported per call: whichever of the broker ack, a connector error, or
    /// the timeout comes first. A session that completes after the timeout
    /// is closed and discarded.
    ///
    /// # Errors
    ///
    /// - `TransportError::ConnectTimeout` if the broker did not acknowledge
    ///   within `timeout`
    /// - `TransportError::ConnectError` if the candidate list is empty or the
    ///   connector failed
    pub async fn connect<S: AsRef<str>>(
        &mut self,
        candidate_servers: &[S],
        timeout: Duration,
    ) -> Result<(), TransportError> {
        self.disconnect();

        let server = candidate_servers
            .first()
            .map(|s| s.as_ref().to_string())
            .ok_or_else(|| TransportError::ConnectError("no candidate servers".to_string()))?;

        self.next_session += 1;
        let session_id = self.next_session;
        self.status.send_replace(Status { state: TransportState::Connecting, session: session_id });
        let _guard = ConnectingGuard { status: Arc::clone(&self.status), session: session_id };

        info!(%server, ?timeout, "connecting");

        let (result_tx, result_rx) = oneshot::channel();
        let connector = Arc::clone(&self.connector);
        let client_id = self.config.client_id.clone();
        let address = server.clone();
        let attempt = tokio::spawn(async move {
            let result = connector.connect(&address, &client_id).await;
            if let Err(Ok(late)) = result_tx.send(result) {
                debug!(server = %address, "discarding session established after connect gave up");
                late.link.close();
            }
        });

        let started = Instant::now();
        match tokio::time::timeout(timeout, result_rx).await {
            Ok(Ok(Ok(session))) => {
                self.install(session, server, session_id);
                Ok(())
            },
            Ok(Ok(Err(e))) => {
                warn!(%server, "connect failed: {e}");
                Err(TransportError::ConnectError(e.to_string()))
            },
            Ok(Err(_)) => Err(TransportError::ConnectError("connect attempt aborted".to_string())),
            Err(_) => {
                attempt.abort();
                let elapsed = started.elapsed();
                warn!(%server, ?elapsed, "connect timed out");
                Err(TransportError::ConnectTimeout { elapsed })
            },
        }
    }

    fn install(&mut self, session: Session, server: String, session_id: u64) {
        let Session { link, mut inbound } = session;

        self.status.send_replace(Status { state: TransportState::Connected, session: session_id });

        let handler = Arc::clone(&self.handler);
        let status = Arc::clone(&self.status);
        let broker = server.clone();
        let dispatch = tokio::spawn(async move {
            while let Some(message) = inbound.recv().await {
                let current = handler.read().unwrap_or_else(PoisonError::into_inner).clone();
                match current {
                    Some(handler) => handler(&message.topic, &message.payload),
                    None => trace!(topic = %message.topic, "no handler, dropping message"),
                }
            }

            let closed = status.send_if_modified(|status| {
                if status.session == session_id && status.state == TransportState::Connected {
                    status.state = TransportState::Disconnected;
                    true
                } else {
                    false
                }
            });
            if closed {
                info!(server = %broker, "session closed by broker");
            }
        });

        info!(%server, "connected");
        self.session = Some(ActiveSession { server, link: Arc::from(link), dispatch });
    }

    /// Subscribe to `topic`, resolving once the broker accepted.
    ///
    /// # Errors
    ///
    /// - `TransportError::NotConnected` without a live session
    /// - `TransportError::Protocol` if the topic is invalid or the broker
    ///   rejected it
    pub async fn subscribe(&self, topic: &str) -> Result<(), TransportError> {
        let link = self.live_link()?;
        validate_topic(topic).map_err(|e| TransportError::Protocol(e.to_string()))?;

        link.subscribe(topic).await.map_err(TransportError::from_link)?;
        debug!(topic, "subscribed");
        Ok(())
    }

    /// Drop a subscription.
    ///
    /// # Errors
    ///
    /// - `TransportError::NotConnected` without a live session
    /// - `TransportError::Protocol` if the broker rejected the request
    pub async fn unsubscribe(&self, topic: &str) -> Result<(), TransportError> {
        let link = self.live_link()?;

        link.unsubscribe(topic).await.map_err(TransportError::from_link)?;
        debug!(topic, "unsubscribed");
        Ok(())
    }

    /// Publish `payload` on `topic` without waiting for the broker.
    ///
    /// # Errors
    ///
    /// - `TransportError::NotConnected` without a live session
    /// - `TransportError::Protocol` for an invalid topic or oversized payload
    pub fn send(&self, topic: &str, payload: impl Into<Bytes>) -> Result<(), TransportError> {
        let link = self.live_link()?;
        let payload = payload.into();

        validate_topic(topic).map_err(|e| TransportError::Protocol(e.to_string()))?;
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(TransportError::Protocol(format!(
                "payload of {} bytes exceeds {MAX_PAYLOAD_SIZE}",
                payload.len()
            )));
        }

        trace!(topic, len = payload.len(), "publish");
        link.publish(topic, payload).map_err(TransportError::from_link)
    }

    /// Publish a UTF-8 string.
    ///
    /// # Errors
    ///
    /// Same as [`send`](Self::send).
    pub fn send_text(&self, topic: &str, text: &str) -> Result<(), TransportError> {
        self.send(topic, Bytes::copy_from_slice(text.as_bytes()))
    }

    /// Register the inbound message handler, replacing any previous one.
    ///
    /// The handler runs on the dispatch task; it must not block.
    pub fn on_message<F>(&self, handler: F)
    where
        F: Fn(&str, &[u8]) + Send + Sync + 'static,
    {
        *self.handler.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(handler));
    }

    /// Tear down the current session, if any. Idempotent.
    pub fn disconnect(&mut self) {
        if let Some(session) = self.session.take() {
            session.link.close();
            session.dispatch.abort();
            info!(server = %session.server, "disconnected");
        }

        self.status.send_if_modified(|status| {
            let changed = status.state != TransportState::Disconnected;
            status.state = TransportState::Disconnected;
            changed
        });
    }

    fn live_link(&self) -> Result<Arc<dyn Link>, TransportError> {
        match &self.session {
            Some(session) if self.state() == TransportState::Connected => {
                Ok(Arc::clone(&session.link))
            },
            _ => Err(TransportError::NotConnected),
        }
    }
}

impl<C: Connector> Drop for Transport<C> {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryBroker;

    #[tokio::test]
    async fn starts_disconnected() {
        let transport = Transport::new(MemoryBroker::new("b"));

        assert_eq!(transport.state(), TransportState::Disconnected);
        assert!(transport.server().is_none());
        assert_eq!(transport.send("t", &b"x"[..]), Err(TransportError::NotConnected));
        assert_eq!(transport.subscribe("t").await, Err(TransportError::NotConnected));
    }

    #[tokio::test]
    async fn empty_candidate_list_is_a_connect_error() {
        let mut transport = Transport::new(MemoryBroker::new("b"));
        let none: [&str; 0] = [];

        let err = transport.connect(&none, Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, TransportError::ConnectError(_)));
        assert_eq!(transport.state(), TransportState::Disconnected);
    }

    #[tokio::test]
    async fn disconnect_is_idempotent() {
        let broker = MemoryBroker::new("b");
        let mut transport = Transport::new(broker.clone());
        transport.connect(&[broker.address()], Duration::from_secs(1)).await.unwrap();

        transport.disconnect();
        transport.disconnect();

        assert_eq!(transport.state(), TransportState::Disconnected);
        assert_eq!(broker.session_count(), 0);
    }

    #[tokio::test]
    async fn drop_closes_session() {
        let broker = MemoryBroker::new("b");
        {
            let mut transport = Transport::new(broker.clone());
            transport.connect(&[broker.address()], Duration::from_secs(1)).await.unwrap();
            assert_eq!(broker.session_count(), 1);
        }
        assert_eq!(broker.session_count(), 0);
    }
}
