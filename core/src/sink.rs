// Outbound event delivery
//
// The store only knows an `EventSink`. The hub plugs in an `EventBroadcaster`,
// a tokio broadcast channel fanning messages out to every connected client.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;

/// Receives every topic/value pair the store publishes.
///
/// Delivery is fire-and-forget: implementations must not assume ordering
/// across subscribers and cannot make the store undo a mutation.
pub trait EventSink: Send + Sync {
    fn publish(&self, topic: &str, value: &Value);
}

impl<F> EventSink for F
where
    F: Fn(&str, &Value) + Send + Sync,
{
    fn publish(&self, topic: &str, value: &Value) {
        self(topic, value)
    }
}

/// Message sent to dashboard clients
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Outbound {
    /// Event name on the channel (`set`, `ctrl`)
    pub kind: String,
    pub topic: String,
    pub value: Value,
    /// Connection the message is meant for; `None` broadcasts
    pub target: Option<String>,
}

impl Outbound {
    pub fn set(topic: impl Into<String>, value: Value) -> Self {
        Self {
            kind: "set".to_string(),
            topic: topic.into(),
            value,
            target: None,
        }
    }

    pub fn unset(topic: impl Into<String>) -> Self {
        Self {
            kind: "unset".to_string(),
            topic: topic.into(),
            value: Value::Null,
            target: None,
        }
    }

    /// Whether a client on connection `conn_id` should receive this message
    pub fn is_for(&self, conn_id: &str) -> bool {
        self.target.as_deref().map_or(true, |t| t == conn_id)
    }
}

/// Fans outbound messages out to all subscribed client sessions
#[derive(Clone)]
pub struct EventBroadcaster {
    sender: broadcast::Sender<Outbound>,
}

impl EventBroadcaster {
    /// Create a new broadcaster with buffer size
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Broadcast a message to all subscribers
    pub fn broadcast(&self, message: Outbound) {
        // Ignore error if no subscribers
        let _ = self.sender.send(message);
    }

    /// Send a message meant for a single connection
    pub fn send_to(&self, conn_id: &str, kind: &str, topic: &str, value: Value) {
        self.broadcast(Outbound {
            kind: kind.to_string(),
            topic: topic.to_string(),
            value,
            target: Some(conn_id.to_string()),
        });
    }

    /// Subscribe to outbound messages
    pub fn subscribe(&self) -> broadcast::Receiver<Outbound> {
        self.sender.subscribe()
    }

    /// Get number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl EventSink for EventBroadcaster {
    fn publish(&self, topic: &str, value: &Value) {
        self.broadcast(Outbound::set(topic, value.clone()));
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new(1000) // Buffer last 1000 messages
    }
}
