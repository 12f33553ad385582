//! Channel registry
//!
//! The central registry mapping channel names to their subscribers, and
//! the fan-out that forwards published events to every one of them.

use std::collections::HashMap;

use serde_json::Value;
use tokio::sync::{mpsc, RwLock};

use crate::wire::Message;

/// One subscribed connection, held by the registry.
///
/// The registry does not own the connection lifecycle; it keeps the
/// connection id for identity and a sender into the connection's outbound
/// queue.
#[derive(Debug, Clone)]
pub struct SubscriberHandle {
    conn_id: u64,
    sender: mpsc::Sender<Message>,
}

impl SubscriberHandle {
    /// Create a handle for the connection identified by `conn_id`.
    pub fn new(conn_id: u64, sender: mpsc::Sender<Message>) -> Self {
        Self { conn_id, sender }
    }

    /// Identity of the underlying connection
    pub fn conn_id(&self) -> u64 {
        self.conn_id
    }
}

/// Result of one broadcast
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastOutcome {
    /// Subscribers the event was handed to
    pub delivered: usize,
    /// Subscribers skipped because their queue was full
    pub dropped: usize,
}

/// Central registry for channel subscriptions
///
/// Thread-safe via `RwLock`. Broadcasts take the read lock, so fan-out to
/// many channels proceeds concurrently.
pub struct ChannelRegistry {
    /// Map of channel name to its subscribers, in registration order
    channels: RwLock<HashMap<String, Vec<SubscriberHandle>>>,
}

impl ChannelRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
        }
    }

    /// Register a subscriber for a channel.
    ///
    /// Appends without any existence check: registering the same
    /// connection twice for the same channel yields two entries, and every
    /// entry receives its own copy of each broadcast.
    pub async fn register_subscriber(&self, channel: &str, handle: SubscriberHandle) {
        let conn_id = handle.conn_id;
        let mut channels = self.channels.write().await;
        let subscribers = channels.entry(channel.to_string()).or_default();
        subscribers.push(handle);

        tracing::info!(
            channel = %channel,
            conn_id = conn_id,
            subscribers = subscribers.len(),
            "Subscriber registered"
        );
    }

    /// Remove every entry of `conn_id` from a channel.
    ///
    /// Silent no-op when the connection was never registered there.
    pub async fn unregister_subscriber(&self, channel: &str, conn_id: u64) {
        let mut channels = self.channels.write().await;
        if let Some(subscribers) = channels.get_mut(channel) {
            let before = subscribers.len();
            subscribers.retain(|s| s.conn_id != conn_id);

            if subscribers.len() != before {
                tracing::info!(
                    channel = %channel,
                    conn_id = conn_id,
                    removed = before - subscribers.len(),
                    subscribers = subscribers.len(),
                    "Subscriber unregistered"
                );
            }
            if subscribers.is_empty() {
                channels.remove(channel);
            }
        }
    }

    /// Remove a closed connection from every channel.
    pub async fn connection_closed(&self, conn_id: u64) {
        let mut channels = self.channels.write().await;
        let mut swept = 0usize;

        channels.retain(|_, subscribers| {
            let before = subscribers.len();
            subscribers.retain(|s| s.conn_id != conn_id);
            swept += before - subscribers.len();
            !subscribers.is_empty()
        });

        if swept > 0 {
            tracing::debug!(conn_id = conn_id, entries = swept, "Connection swept from registry");
        }
    }

    /// Forward `payload`, tagged with `channel`, to every current
    /// subscriber of the channel.
    ///
    /// Each subscriber is handled independently: a full queue drops that
    /// one delivery, a closed connection is pruned afterwards, and neither
    /// aborts delivery to the rest.
    pub async fn broadcast(&self, channel: &str, payload: Value) -> BroadcastOutcome {
        let mut outcome = BroadcastOutcome::default();
        let mut saw_closed = false;

        {
            let channels = self.channels.read().await;
            let subscribers = match channels.get(channel) {
                Some(subscribers) => subscribers,
                None => {
                    tracing::trace!(channel = %channel, "Broadcast on channel without subscribers");
                    return outcome;
                }
            };

            for subscriber in subscribers {
                let message = Message::event(channel, payload.clone());
                match subscriber.sender.try_send(message) {
                    Ok(()) => outcome.delivered += 1,
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        outcome.dropped += 1;
                        tracing::warn!(
                            channel = %channel,
                            conn_id = subscriber.conn_id,
                            "Subscriber queue full, delivery dropped"
                        );
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        saw_closed = true;
                    }
                }
            }
        }

        if saw_closed {
            self.prune_closed(channel).await;
        }

        tracing::debug!(
            channel = %channel,
            delivered = outcome.delivered,
            dropped = outcome.dropped,
            "Broadcast"
        );
        outcome
    }

    async fn prune_closed(&self, channel: &str) {
        let mut channels = self.channels.write().await;
        if let Some(subscribers) = channels.get_mut(channel) {
            let before = subscribers.len();
            subscribers.retain(|s| !s.sender.is_closed());

            if subscribers.len() != before {
                tracing::debug!(
                    channel = %channel,
                    pruned = before - subscribers.len(),
                    "Closed subscribers pruned"
                );
            }
            if subscribers.is_empty() {
                channels.remove(channel);
            }
        }
    }

    /// Number of channels with at least one subscriber
    pub async fn channel_count(&self) -> usize {
        self.channels.read().await.len()
    }

    /// Number of entries registered for a channel.
    ///
    /// Duplicates count separately.
    pub async fn subscriber_count(&self, channel: &str) -> usize {
        self.channels
            .read()
            .await
            .get(channel)
            .map(|s| s.len())
            .unwrap_or(0)
    }
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn subscriber(conn_id: u64, capacity: usize) -> (SubscriberHandle, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(capacity);
        (SubscriberHandle::new(conn_id, tx), rx)
    }

    #[tokio::test]
    async fn test_register_and_broadcast() {
        let registry = ChannelRegistry::new();
        let (handle, mut rx) = subscriber(1, 4);

        registry.register_subscriber("orders", handle).await;
        let outcome = registry.broadcast("orders", json!({"id": 1})).await;

        assert_eq!(outcome.delivered, 1);
        assert_eq!(outcome.dropped, 0);
        assert_eq!(
            rx.recv().await,
            Some(Message::event("orders", json!({"id": 1})))
        );
    }

    #[tokio::test]
    async fn test_duplicate_registration_delivers_twice() {
        let registry = ChannelRegistry::new();
        let (handle, mut rx) = subscriber(1, 4);

        registry.register_subscriber("orders", handle.clone()).await;
        registry.register_subscriber("orders", handle).await;
        assert_eq!(registry.subscriber_count("orders").await, 2);

        let outcome = registry.broadcast("orders", json!("v")).await;
        assert_eq!(outcome.delivered, 2);

        assert_eq!(rx.recv().await, Some(Message::event("orders", json!("v"))));
        assert_eq!(rx.recv().await, Some(Message::event("orders", json!("v"))));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unregister_removes_all_matching_entries() {
        let registry = ChannelRegistry::new();
        let (first, _rx1) = subscriber(1, 4);
        let (second, mut rx2) = subscriber(2, 4);

        registry.register_subscriber("orders", first.clone()).await;
        registry.register_subscriber("orders", first).await;
        registry.register_subscriber("orders", second).await;

        registry.unregister_subscriber("orders", 1).await;
        assert_eq!(registry.subscriber_count("orders").await, 1);

        let outcome = registry.broadcast("orders", json!(1)).await;
        assert_eq!(outcome.delivered, 1);
        assert_eq!(rx2.recv().await, Some(Message::event("orders", json!(1))));
    }

    #[tokio::test]
    async fn test_unregister_absent_is_noop() {
        let registry = ChannelRegistry::new();

        // Nothing registered at all
        registry.unregister_subscriber("orders", 42).await;
        assert_eq!(registry.subscriber_count("orders").await, 0);
    }

    #[tokio::test]
    async fn test_connection_closed_sweeps_every_channel() {
        let registry = ChannelRegistry::new();
        let (handle, _rx) = subscriber(7, 4);
        let (other, _rx2) = subscriber(8, 4);

        registry.register_subscriber("orders", handle.clone()).await;
        registry.register_subscriber("invoices", handle).await;
        registry.register_subscriber("orders", other).await;

        registry.connection_closed(7).await;

        assert_eq!(registry.subscriber_count("orders").await, 1);
        assert_eq!(registry.subscriber_count("invoices").await, 0);
        assert_eq!(registry.channel_count().await, 1);
    }

    #[tokio::test]
    async fn test_full_queue_drops_delivery() {
        let registry = ChannelRegistry::new();
        let (handle, mut rx) = subscriber(1, 1);

        registry.register_subscriber("orders", handle).await;

        let first = registry.broadcast("orders", json!(1)).await;
        let second = registry.broadcast("orders", json!(2)).await;

        assert_eq!(first.delivered, 1);
        assert_eq!(second.delivered, 0);
        assert_eq!(second.dropped, 1);

        // Only the first value ever arrives
        assert_eq!(rx.recv().await, Some(Message::event("orders", json!(1))));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_closed_subscriber_fails_silently_and_is_pruned() {
        let registry = ChannelRegistry::new();
        let (dead, dead_rx) = subscriber(1, 4);
        let (live, mut live_rx) = subscriber(2, 4);

        registry.register_subscriber("orders", dead).await;
        registry.register_subscriber("orders", live).await;
        drop(dead_rx);

        let outcome = registry.broadcast("orders", json!("v")).await;

        assert_eq!(outcome.delivered, 1);
        assert_eq!(registry.subscriber_count("orders").await, 1);
        assert_eq!(
            live_rx.recv().await,
            Some(Message::event("orders", json!("v")))
        );
    }
}
