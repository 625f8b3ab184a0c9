//! Topic registry for session and subscription tracking.
//!
//! Bidirectional mappings: topic → sessions (for fan-out) and session →
//! topics (for cleanup on disconnect). Unregistering a session removes all
//! of its subscriptions.

use std::collections::{HashMap, HashSet};

use bytes::Bytes;
use keyward_proto::BrokerFrame;
use tokio::sync::mpsc;
use tracing::warn;

struct SessionEntry {
    client_id: String,
    outbound: mpsc::Sender<BrokerFrame>,
}

/// Registry of connected sessions and their topic subscriptions.
#[derive(Default)]
pub struct TopicRegistry {
    /// Session ID → client name and outbound queue
    sessions: HashMap<u64, SessionEntry>,
    /// Topic → subscribed session IDs
    topic_subscriptions: HashMap<String, HashSet<u64>>,
    /// Session ID → subscribed topics
    session_topics: HashMap<u64, HashSet<String>>,
}

impl TopicRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session. Returns `false` if the ID is already taken.
    pub fn register_session(
        &mut self,
        session_id: u64,
        client_id: &str,
        outbound: mpsc::Sender<BrokerFrame>,
    ) -> bool {
        if self.sessions.contains_key(&session_id) {
            return false;
        }

        self.sessions
            .insert(session_id, SessionEntry { client_id: client_id.to_string(), outbound });
        self.session_topics.insert(session_id, HashSet::new());
        true
    }

    /// Unregister a session, returning the topics it was subscribed to.
    pub fn unregister_session(&mut self, session_id: u64) -> Option<HashSet<String>> {
        self.sessions.remove(&session_id)?;
        let topics = self.session_topics.remove(&session_id).unwrap_or_default();

        for topic in &topics {
            if let Some(subscribers) = self.topic_subscriptions.get_mut(topic) {
                subscribers.remove(&session_id);
                if subscribers.is_empty() {
                    self.topic_subscriptions.remove(topic);
                }
            }
        }

        Some(topics)
    }

    /// Subscribe a session to a topic. Returns `false` for unknown sessions.
    pub fn subscribe(&mut self, session_id: u64, topic: &str) -> bool {
        if !self.sessions.contains_key(&session_id) {
            return false;
        }

        self.topic_subscriptions.entry(topic.to_string()).or_default().insert(session_id);
        self.session_topics.entry(session_id).or_default().insert(topic.to_string());
        true
    }

    /// Unsubscribe a session from a topic.
    ///
    /// Returns `true` if the session was subscribed and is now unsubscribed.
    pub fn unsubscribe(&mut self, session_id: u64, topic: &str) -> bool {
        let removed_from_topic =
            self.topic_subscriptions.get_mut(topic).is_some_and(|s| s.remove(&session_id));
        let removed_from_session =
            self.session_topics.get_mut(&session_id).is_some_and(|t| t.remove(topic));

        if self.topic_subscriptions.get(topic).is_some_and(HashSet::is_empty) {
            self.topic_subscriptions.remove(topic);
        }

        removed_from_topic && removed_from_session
    }

    /// Check if a session is subscribed to a topic.
    pub fn is_subscribed(&self, session_id: u64, topic: &str) -> bool {
        self.topic_subscriptions.get(topic).is_some_and(|s| s.contains(&session_id))
    }

    /// Queue a `Message` for every subscriber of `topic`.
    ///
    /// A subscriber whose queue is full misses this message; the others are
    /// unaffected. Returns the number of sessions the message was queued for.
    pub fn route(&self, topic: &str, payload: &Bytes) -> usize {
        let Some(subscribers) = self.topic_subscriptions.get(topic) else {
            return 0;
        };

        let mut delivered = 0;
        for session in subscribers.iter().filter_map(|id| self.sessions.get(id)) {
            let frame = BrokerFrame::Message { topic: topic.to_string(), payload: payload.clone() };
            match session.outbound.try_send(frame) {
                Ok(()) => delivered += 1,
                Err(e) => warn!(client = %session.client_id, topic, "dropping message: {e}"),
            }
        }

        delivered
    }

    /// Number of registered sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Number of topics with at least one subscriber.
    pub fn topic_count(&self) -> usize {
        self.topic_subscriptions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(registry: &mut TopicRegistry, id: u64) -> mpsc::Receiver<BrokerFrame> {
        let (tx, rx) = mpsc::channel(8);
        assert!(registry.register_session(id, &format!("client-{id}"), tx));
        rx
    }

    #[test]
    fn duplicate_session_is_rejected() {
        let mut registry = TopicRegistry::new();
        let _rx = session(&mut registry, 1);

        let (tx, _rx2) = mpsc::channel(1);
        assert!(!registry.register_session(1, "again", tx));
        assert_eq!(registry.session_count(), 1);
    }

    #[test]
    fn subscribe_requires_registered_session() {
        let mut registry = TopicRegistry::new();
        assert!(!registry.subscribe(7, "t"));
        assert_eq!(registry.topic_count(), 0);
    }

    #[test]
    fn route_reaches_only_subscribers() {
        let mut registry = TopicRegistry::new();
        let mut a = session(&mut registry, 1);
        let mut b = session(&mut registry, 2);

        registry.subscribe(1, "news");
        assert_eq!(registry.route("news", &Bytes::from_static(b"hi")), 1);

        match a.try_recv().unwrap() {
            BrokerFrame::Message { topic, payload } => {
                assert_eq!(topic, "news");
                assert_eq!(&payload[..], b"hi");
            },
            other => panic!("unexpected frame {other:?}"),
        }
        assert!(b.try_recv().is_err());
    }

    #[test]
    fn full_queue_skips_only_that_subscriber() {
        let mut registry = TopicRegistry::new();
        let (tx, _slow) = mpsc::channel(1);
        registry.register_session(1, "slow", tx);
        let mut fast = session(&mut registry, 2);
        registry.subscribe(1, "t");
        registry.subscribe(2, "t");

        assert_eq!(registry.route("t", &Bytes::new()), 2);
        assert_eq!(registry.route("t", &Bytes::new()), 1);

        assert!(fast.try_recv().is_ok());
        assert!(fast.try_recv().is_ok());
    }

    #[test]
    fn unsubscribe_cleans_empty_topics() {
        let mut registry = TopicRegistry::new();
        let _rx = session(&mut registry, 1);

        registry.subscribe(1, "t");
        assert!(registry.is_subscribed(1, "t"));
        assert!(registry.unsubscribe(1, "t"));
        assert!(!registry.unsubscribe(1, "t"));
        assert_eq!(registry.topic_count(), 0);
    }

    #[test]
    fn unregister_removes_all_subscriptions() {
        let mut registry = TopicRegistry::new();
        let _a = session(&mut registry, 1);
        let _b = session(&mut registry, 2);
        registry.subscribe(1, "x");
        registry.subscribe(1, "y");
        registry.subscribe(2, "y");

        let topics = registry.unregister_session(1).unwrap();

        assert_eq!(topics.len(), 2);
        assert!(!registry.is_subscribed(1, "y"));
        assert!(registry.is_subscribed(2, "y"));
        assert_eq!(registry.topic_count(), 1);
        assert!(registry.unregister_session(1).is_none());
    }
}
