//! In-process broker.
//!
//! A [`MemoryBroker`] is both the broker and the [`Connector`] for
//! `memory://<name>` addresses. Connect behavior can be scripted to simulate
//! slow, silent, or refusing brokers, and individual topics can be rejected.

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use keyward_proto::validate_topic;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::{Connector, InboundMessage, Link, LinkError, Session};

/// Address scheme served by [`MemoryBroker`].
pub const MEMORY_SCHEME: &str = "memory://";

/// Inbound queue depth per session.
const INBOUND_BUFFER: usize = 256;

/// How the broker answers new connections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectBehavior {
    /// Acknowledge immediately
    Accept,
    /// Acknowledge after a delay
    Delay(Duration),
    /// Never acknowledge
    Unresponsive,
    /// Refuse with a reason
    Refuse(String),
}

struct MemorySession {
    client_id: String,
    topics: HashSet<String>,
    tx: mpsc::Sender<InboundMessage>,
}

struct BrokerState {
    behavior: ConnectBehavior,
    rejected_topics: HashSet<String>,
    sessions: HashMap<u64, MemorySession>,
    next_session: u64,
    connect_attempts: usize,
}

/// In-process pub/sub broker.
///
/// Clone is cheap; clones share the same broker.
#[derive(Clone)]
pub struct MemoryBroker {
    name: Arc<str>,
    state: Arc<Mutex<BrokerState>>,
}

impl MemoryBroker {
    /// Create a broker reachable at `memory://<name>`.
    pub fn new(name: &str) -> Self {
        Self {
            name: Arc::from(name),
            state: Arc::new(Mutex::new(BrokerState {
                behavior: ConnectBehavior::Accept,
                rejected_topics: HashSet::new(),
                sessions: HashMap::new(),
                next_session: 0,
                connect_attempts: 0,
            })),
        }
    }

    /// Address clients connect to.
    pub fn address(&self) -> String {
        format!("{MEMORY_SCHEME}{}", self.name)
    }

    /// Change how subsequent connects are answered.
    pub fn set_connect_behavior(&self, behavior: ConnectBehavior) {
        self.lock().behavior = behavior;
    }

    /// Reject every future subscribe to `topic`.
    pub fn reject_topic(&self, topic: &str) {
        self.lock().rejected_topics.insert(topic.to_string());
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.lock().sessions.len()
    }

    /// Number of connect calls received, including unanswered ones.
    pub fn connect_attempts(&self) -> usize {
        self.lock().connect_attempts
    }

    /// Number of sessions subscribed to `topic`.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.lock().sessions.values().filter(|s| s.topics.contains(topic)).count()
    }

    /// Publish as if from another client. Returns the number of sessions
    /// the message was queued for.
    pub fn publish(&self, topic: &str, payload: impl Into<Bytes>) -> usize {
        let state = self.lock();
        route(&state, topic, &payload.into())
    }

    /// Drop every session, as if the broker restarted.
    pub fn disconnect_all(&self) {
        let dropped = std::mem::take(&mut self.lock().sessions);
        debug!(broker = %self.name, sessions = dropped.len(), "dropping all sessions");
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn register(&self, client_id: &str) -> (u64, mpsc::Receiver<InboundMessage>) {
        let (tx, rx) = mpsc::channel(INBOUND_BUFFER);
        let mut state = self.lock();

        let session_id = state.next_session;
        state.next_session += 1;
        state.sessions.insert(session_id, MemorySession {
            client_id: client_id.to_string(),
            topics: HashSet::new(),
            tx,
        });

        (session_id, rx)
    }
}

/// Queue `payload` for every subscriber of `topic`. A full queue drops the
/// message for that subscriber only.
fn route(state: &BrokerState, topic: &str, payload: &Bytes) -> usize {
    let mut delivered = 0;

    for session in state.sessions.values().filter(|s| s.topics.contains(topic)) {
        let message = InboundMessage { topic: topic.to_string(), payload: payload.clone() };
        match session.tx.try_send(message) {
            Ok(()) => delivered += 1,
            Err(e) => warn!(client = %session.client_id, topic, "dropping message: {e}"),
        }
    }

    delivered
}

#[async_trait]
impl Connector for MemoryBroker {
    async fn connect(&self, address: &str, client_id: &str) -> Result<Session, LinkError> {
        let behavior = {
            let mut state = self.lock();
            state.connect_attempts += 1;
            state.behavior.clone()
        };

        let name = address
            .strip_prefix(MEMORY_SCHEME)
            .ok_or_else(|| LinkError::Refused(format!("unsupported address '{address}'")))?;
        if name != &*self.name {
            return Err(LinkError::Refused(format!("no broker named '{name}'")));
        }

        match behavior {
            ConnectBehavior::Accept => {},
            ConnectBehavior::Delay(delay) => tokio::time::sleep(delay).await,
            ConnectBehavior::Unresponsive => std::future::pending::<()>().await,
            ConnectBehavior::Refuse(reason) => return Err(LinkError::Refused(reason)),
        }

        let (session_id, inbound) = self.register(client_id);
        debug!(broker = %self.name, client = client_id, session_id, "session opened");

        Ok(Session { link: Box::new(MemoryLink { broker: self.clone(), session_id }), inbound })
    }
}

/// Link to a [`MemoryBroker`] session. Closing or dropping it ends the
/// session.
struct MemoryLink {
    broker: MemoryBroker,
    session_id: u64,
}

impl MemoryLink {
    fn with_session<T>(
        &self,
        f: impl FnOnce(&mut BrokerState, u64) -> Result<T, LinkError>,
    ) -> Result<T, LinkError> {
        let mut state = self.broker.lock();
        if !state.sessions.contains_key(&self.session_id) {
            return Err(LinkError::Closed);
        }
        f(&mut state, self.session_id)
    }
}

#[async_trait]
impl Link for MemoryLink {
    async fn subscribe(&self, topic: &str) -> Result<(), LinkError> {
        self.with_session(|state, id| {
            validate_topic(topic).map_err(|e| LinkError::Rejected(e.to_string()))?;
            if state.rejected_topics.contains(topic) {
                return Err(LinkError::Rejected(format!("subscription to '{topic}' refused")));
            }

            if let Some(session) = state.sessions.get_mut(&id) {
                session.topics.insert(topic.to_string());
            }
            Ok(())
        })
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), LinkError> {
        self.with_session(|state, id| {
            if let Some(session) = state.sessions.get_mut(&id) {
                session.topics.remove(topic);
            }
            Ok(())
        })
    }

    fn publish(&self, topic: &str, payload: Bytes) -> Result<(), LinkError> {
        self.with_session(|state, _| {
            // Invalid topics are dropped by the broker, as on the wire
            if validate_topic(topic).is_ok() {
                route(state, topic, &payload);
            }
            Ok(())
        })
    }

    fn close(&self) {
        if self.broker.lock().sessions.remove(&self.session_id).is_some() {
            debug!(broker = %self.broker.name, session_id = self.session_id, "session closed");
        }
    }
}

impl Drop for MemoryLink {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connect_registers_session() {
        let broker = MemoryBroker::new("test");
        let session = broker.connect(&broker.address(), "alice").await.unwrap();

        assert_eq!(broker.session_count(), 1);
        assert_eq!(broker.connect_attempts(), 1);

        session.link.close();
        assert_eq!(broker.session_count(), 0);
    }

    #[tokio::test]
    async fn wrong_name_is_refused() {
        let broker = MemoryBroker::new("test");

        let err = broker.connect("memory://other", "alice").await.err().unwrap();
        assert!(matches!(err, LinkError::Refused(_)));

        let err = broker.connect("quic://127.0.0.1:1", "alice").await.err().unwrap();
        assert!(matches!(err, LinkError::Refused(_)));
    }

    #[tokio::test]
    async fn publish_reaches_subscribers_only() {
        let broker = MemoryBroker::new("test");
        let mut a = broker.connect(&broker.address(), "a").await.unwrap();
        let mut b = broker.connect(&broker.address(), "b").await.unwrap();

        a.link.subscribe("news").await.unwrap();
        b.link.publish("news", Bytes::from_static(b"hi")).unwrap();

        let message = a.inbound.recv().await.unwrap();
        assert_eq!(message.topic, "news");
        assert_eq!(&message.payload[..], b"hi");
        assert!(b.inbound.try_recv().is_err());
    }

    #[tokio::test]
    async fn rejected_topic_fails_subscribe() {
        let broker = MemoryBroker::new("test");
        broker.reject_topic("secret");
        let session = broker.connect(&broker.address(), "a").await.unwrap();

        assert!(matches!(session.link.subscribe("secret").await, Err(LinkError::Rejected(_))));
        assert!(matches!(session.link.subscribe("a#b").await, Err(LinkError::Rejected(_))));
        assert_eq!(broker.subscriber_count("secret"), 0);
    }

    #[tokio::test]
    async fn dropped_link_ends_session() {
        let broker = MemoryBroker::new("test");
        let Session { link, mut inbound } = broker.connect(&broker.address(), "a").await.unwrap();

        drop(link);
        assert_eq!(broker.session_count(), 0);
        assert!(inbound.recv().await.is_none());
    }

    #[tokio::test]
    async fn operations_after_close_fail() {
        let broker = MemoryBroker::new("test");
        let session = broker.connect(&broker.address(), "a").await.unwrap();
        broker.disconnect_all();

        assert_eq!(session.link.subscribe("t").await, Err(LinkError::Closed));
        assert_eq!(session.link.publish("t", Bytes::new()), Err(LinkError::Closed));
    }
}
