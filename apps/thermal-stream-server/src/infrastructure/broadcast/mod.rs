//! Broadcast Channel Adapter
//!
//! Fan-out of client messages to every session of one data set, using a
//! tokio broadcast channel.
//!
//! # Delivery
//!
//! Every subscribed session receives each payload, the sender included.
//! Delivery is at-least-once per receiver and unordered across sessions.
//! A receiver that falls more than the channel capacity behind skips the
//! missed payloads with a warning instead of failing.

use std::sync::Arc;

use serde_json::{Map, Value};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Default channel capacity.
pub const DEFAULT_CAPACITY: usize = 1024;

// =============================================================================
// Broadcaster
// =============================================================================

/// Broadcast channel for one data set.
#[derive(Debug, Clone)]
pub struct Broadcaster {
    data_set: Arc<str>,
    tx: broadcast::Sender<Value>,
}

impl Broadcaster {
    /// Create a broadcaster with the given capacity (at least one).
    #[must_use]
    pub fn new(data_set: &str, capacity: usize) -> Self {
        Self {
            data_set: Arc::from(data_set),
            tx: broadcast::channel(capacity.max(1)).0,
        }
    }

    /// Subscribe a session.
    #[must_use]
    pub fn subscribe(&self, session_id: Uuid) -> BroadcastSubscription {
        tracing::debug!(data_set = %self.data_set, %session_id, "Session subscribed to broadcasts");
        BroadcastSubscription {
            session_id,
            rx: self.tx.subscribe(),
        }
    }

    /// Send `payload` with `internal: "broadcast"` added to every subscriber.
    ///
    /// Returns how many subscribers it was queued for.
    pub fn broadcast(&self, mut payload: Map<String, Value>) -> usize {
        payload.insert("internal".to_string(), Value::String("broadcast".to_string()));
        let delivered = self.tx.send(Value::Object(payload)).unwrap_or(0);
        tracing::debug!(data_set = %self.data_set, delivered, "Broadcast sent");
        delivered
    }

    /// Number of subscribed sessions.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

// =============================================================================
// Subscription
// =============================================================================

/// One session's receiving end. Dropping it unsubscribes.
#[derive(Debug)]
pub struct BroadcastSubscription {
    session_id: Uuid,
    rx: broadcast::Receiver<Value>,
}

impl BroadcastSubscription {
    /// Wait for the next payload.
    ///
    /// Returns `None` once the broadcaster is gone.
    pub async fn recv(&mut self) -> Option<Value> {
        loop {
            match self.rx.recv().await {
                Ok(payload) => return Some(payload),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(session_id = %self.session_id, lagged = n, "Broadcast receiver lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Stop receiving.
    pub fn unsubscribe(self) {
        tracing::debug!(session_id = %self.session_id, "Session unsubscribed from broadcasts");
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn payload(value: &Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn subscriber_count_follows_subscriptions() {
        let broadcaster = Broadcaster::new("thermal_ftse250", 8);
        assert_eq!(broadcaster.subscriber_count(), 0);

        let first = broadcaster.subscribe(Uuid::new_v4());
        let second = broadcaster.subscribe(Uuid::new_v4());
        assert_eq!(broadcaster.subscriber_count(), 2);

        first.unsubscribe();
        drop(second);
        assert_eq!(broadcaster.subscriber_count(), 0);
    }

    #[test]
    fn broadcast_without_subscribers_reaches_nobody() {
        let broadcaster = Broadcaster::new("thermal_ftse250", 8);
        assert_eq!(broadcaster.broadcast(Map::new()), 0);
    }

    #[tokio::test]
    async fn every_subscriber_gets_tagged_payload() {
        let broadcaster = Broadcaster::new("thermal_ftse250", 8);
        let mut a = broadcaster.subscribe(Uuid::new_v4());
        let mut b = broadcaster.subscribe(Uuid::new_v4());

        let sent = broadcaster.broadcast(payload(&json!({"type": "broadcast", "selection": ["VOD.L"]})));
        assert_eq!(sent, 2);

        let expected = json!({"type": "broadcast", "selection": ["VOD.L"], "internal": "broadcast"});
        assert_eq!(a.recv().await, Some(expected.clone()));
        assert_eq!(b.recv().await, Some(expected));
    }

    #[tokio::test]
    async fn lagging_subscriber_skips_to_newest() {
        let broadcaster = Broadcaster::new("thermal_ftse250", 2);
        let mut rx = broadcaster.subscribe(Uuid::new_v4());

        for i in 0..5 {
            broadcaster.broadcast(payload(&json!({"n": i})));
        }

        let first = rx.recv().await.unwrap();
        assert_eq!(first["n"], json!(3));
    }

    #[tokio::test]
    async fn recv_ends_when_broadcaster_dropped() {
        let broadcaster = Broadcaster::new("thermal_ftse250", 2);
        let mut rx = broadcaster.subscribe(Uuid::new_v4());
        drop(broadcaster);

        assert_eq!(rx.recv().await, None);
    }
}
