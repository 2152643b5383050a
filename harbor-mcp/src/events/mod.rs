//! Typed-topic event bus for change notifications and progress fan-out
//!
//! Topics are strings of the form `mcp:resources:<uri>`,
//! `mcp:tools:<name>` and `mcp:events:<event>`. Subscriptions are owned
//! (typically by a session) and released in bulk when the owner
//! terminates.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

/// Topic for changes to one resource
pub fn topic_resource(uri: &str) -> String {
    format!("mcp:resources:{}", uri)
}

/// Topic for changes to one tool
pub fn topic_tool(name: &str) -> String {
    format!("mcp:tools:{}", name)
}

/// Topic for a named event
pub fn topic_event(name: &str) -> String {
    format!("mcp:events:{}", name)
}

/// An event delivered to subscribers
#[derive(Debug, Clone)]
pub struct BusEvent {
    pub topic: String,
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
}

struct Subscriber {
    id: Uuid,
    owner: String,
    tx: mpsc::UnboundedSender<BusEvent>,
}

/// Publish/subscribe bus with per-owner subscription release
pub struct EventBus {
    topics: RwLock<HashMap<String, Vec<Subscriber>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            topics: RwLock::new(HashMap::new()),
        }
    }

    /// Subscribe an owner to a topic. Returns the subscription id and the
    /// event receiver.
    pub async fn subscribe(
        &self,
        topic: &str,
        owner: &str,
    ) -> (Uuid, mpsc::UnboundedReceiver<BusEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        self.topics
            .write()
            .await
            .entry(topic.to_string())
            .or_default()
            .push(Subscriber {
                id,
                owner: owner.to_string(),
                tx,
            });
        (id, rx)
    }

    /// Remove one subscription.
    pub async fn unsubscribe(&self, topic: &str, subscription: Uuid) {
        let mut topics = self.topics.write().await;
        if let Some(subscribers) = topics.get_mut(topic) {
            subscribers.retain(|s| s.id != subscription);
            if subscribers.is_empty() {
                topics.remove(topic);
            }
        }
    }

    /// Release every subscription held by an owner.
    pub async fn release_owner(&self, owner: &str) {
        let mut topics = self.topics.write().await;
        topics.retain(|_, subscribers| {
            subscribers.retain(|s| s.owner != owner);
            !subscribers.is_empty()
        });
    }

    /// Publish to a topic. Returns the number of subscribers reached.
    /// Closed receivers are pruned on the way.
    pub async fn publish(&self, topic: &str, payload: Value) -> usize {
        let event = BusEvent {
            topic: topic.to_string(),
            payload,
            timestamp: Utc::now(),
        };

        let mut topics = self.topics.write().await;
        let Some(subscribers) = topics.get_mut(topic) else {
            return 0;
        };

        subscribers.retain(|s| s.tx.send(event.clone()).is_ok());
        let reached = subscribers.len();
        if subscribers.is_empty() {
            topics.remove(topic);
        }
        reached
    }

    /// Number of live subscriptions across all topics.
    pub async fn subscription_count(&self) -> usize {
        self.topics.read().await.values().map(Vec::len).sum()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
