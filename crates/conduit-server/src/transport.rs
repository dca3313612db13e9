//! The transport seam between the hub and whatever delivers frames.
//!
//! The hub only ever talks to a [`ClientSender`]: direct fan-out to a
//! set of connection ids, group fan-out to a topic, and topic
//! membership. The WebSocket gateway implements it for production;
//! [`LocalSender`] is an in-process implementation for tests and
//! embedded use.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use conduit_core::{ConnectionId, PushEnvelope};
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::warn;

use crate::error::TransportError;

/// Per-connection context handed to the hub on connect.
///
/// Carries whatever the transport knows about the connection (for the
/// gateway: selected request headers) so filter factories can derive an
/// initial value from it.
#[derive(Clone, Debug)]
pub struct ConnectionContext {
    /// The new connection's id.
    pub connection_id: ConnectionId,
    /// Transport-provided metadata, e.g. request headers.
    pub metadata: HashMap<String, String>,
}

impl ConnectionContext {
    /// Context with no metadata.
    #[must_use]
    pub fn new(connection_id: ConnectionId) -> Self {
        Self {
            connection_id,
            metadata: HashMap::new(),
        }
    }
}

/// Outbound delivery and topic membership, as provided by the transport.
///
/// Group membership is owned here: connections join via `add_to_group`
/// and all of a connection's memberships vanish with `remove_connection`.
#[async_trait]
pub trait ClientSender: Send + Sync {
    /// Deliver one frame to each listed connection. At most one send per
    /// target; the first failure is returned after all targets were
    /// attempted.
    async fn send_many(
        &self,
        ids: &[ConnectionId],
        method: &str,
        payload: Value,
    ) -> Result<(), TransportError>;

    /// Deliver one frame to every current member of a topic.
    async fn send_group(
        &self,
        topic: &str,
        method: &str,
        payload: Value,
    ) -> Result<(), TransportError>;

    /// Add a connection to a topic group.
    async fn add_to_group(&self, id: &ConnectionId, topic: &str);

    /// Drop a connection and all of its group memberships.
    async fn remove_connection(&self, id: &ConnectionId);
}

/// In-process [`ClientSender`] backed by per-connection mpsc channels.
pub struct LocalSender {
    connections: DashMap<ConnectionId, mpsc::Sender<PushEnvelope>>,
    groups: DashMap<String, HashSet<ConnectionId>>,
    queue_capacity: usize,
}

impl LocalSender {
    /// Create a sender whose per-connection queues hold `queue_capacity`
    /// frames.
    #[must_use]
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            connections: DashMap::new(),
            groups: DashMap::new(),
            queue_capacity,
        }
    }

    /// Register a connection and return the receiving end of its queue.
    pub fn register(&self, id: ConnectionId) -> mpsc::Receiver<PushEnvelope> {
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        let _ = self.connections.insert(id, tx);
        rx
    }

    /// Number of live connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Current members of a topic.
    #[must_use]
    pub fn group_members(&self, topic: &str) -> Vec<ConnectionId> {
        self.groups
            .get(topic)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn deliver(&self, id: &ConnectionId, envelope: PushEnvelope) -> Result<(), TransportError> {
        let Some(tx) = self.connections.get(id) else {
            return Err(TransportError::SendFailed {
                connection_id: id.to_string(),
            });
        };
        tx.try_send(envelope).map_err(|_| {
            warn!(connection_id = %id, "local send failed (queue full or closed)");
            TransportError::SendFailed {
                connection_id: id.to_string(),
            }
        })
    }
}

#[async_trait]
impl ClientSender for LocalSender {
    async fn send_many(
        &self,
        ids: &[ConnectionId],
        method: &str,
        payload: Value,
    ) -> Result<(), TransportError> {
        let mut first_error = None;
        for id in ids {
            let envelope = PushEnvelope {
                method: method.to_owned(),
                payload: payload.clone(),
            };
            if let Err(err) = self.deliver(id, envelope) {
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    async fn send_group(
        &self,
        topic: &str,
        method: &str,
        payload: Value,
    ) -> Result<(), TransportError> {
        let members = self.group_members(topic);
        self.send_many(&members, method, payload).await
    }

    async fn add_to_group(&self, id: &ConnectionId, topic: &str) {
        let _ = self
            .groups
            .entry(topic.to_owned())
            .or_default()
            .insert(id.clone());
    }

    async fn remove_connection(&self, id: &ConnectionId) {
        let _ = self.connections.remove(id);
        for mut members in self.groups.iter_mut() {
            let _ = members.remove(id);
        }
        self.groups.retain(|_, members| !members.is_empty());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn send_many_delivers_to_each_target() {
        let sender = LocalSender::new(8);
        let mut rx_a = sender.register(ConnectionId::from("a"));
        let mut rx_b = sender.register(ConnectionId::from("b"));

        sender
            .send_many(
                &[ConnectionId::from("a"), ConnectionId::from("b")],
                "conduit",
                json!({"eventKey": "k", "message": 1}),
            )
            .await
            .unwrap();

        assert_eq!(rx_a.recv().await.unwrap().method, "conduit");
        assert_eq!(rx_b.recv().await.unwrap().method, "conduit");
    }

    #[tokio::test]
    async fn send_to_unknown_connection_fails() {
        let sender = LocalSender::new(8);
        let err = sender
            .send_many(&[ConnectionId::from("ghost")], "m", json!(null))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            TransportError::SendFailed {
                connection_id: "ghost".into()
            }
        );
    }

    #[tokio::test]
    async fn send_many_attempts_all_targets_despite_failure() {
        let sender = LocalSender::new(8);
        let mut rx_b = sender.register(ConnectionId::from("b"));

        let result = sender
            .send_many(
                &[ConnectionId::from("missing"), ConnectionId::from("b")],
                "m",
                json!(1),
            )
            .await;

        assert!(result.is_err());
        // The healthy target still got its frame.
        assert!(rx_b.recv().await.is_some());
    }

    #[tokio::test]
    async fn group_send_reaches_only_members() {
        let sender = LocalSender::new(8);
        let mut rx_a = sender.register(ConnectionId::from("a"));
        let mut rx_b = sender.register(ConnectionId::from("b"));
        sender.add_to_group(&ConnectionId::from("a"), "orders").await;

        sender
            .send_group("orders", "conduit", json!({"eventKey": "orders", "message": "x"}))
            .await
            .unwrap();

        assert!(rx_a.recv().await.is_some());
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn group_send_to_empty_topic_is_ok() {
        let sender = LocalSender::new(8);
        sender
            .send_group("nobody", "conduit", json!(null))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn remove_connection_drops_memberships() {
        let sender = LocalSender::new(8);
        let _rx = sender.register(ConnectionId::from("a"));
        sender.add_to_group(&ConnectionId::from("a"), "t1").await;
        sender.add_to_group(&ConnectionId::from("a"), "t2").await;

        sender.remove_connection(&ConnectionId::from("a")).await;

        assert_eq!(sender.connection_count(), 0);
        assert!(sender.group_members("t1").is_empty());
        assert!(sender.group_members("t2").is_empty());
    }

    #[tokio::test]
    async fn full_queue_reports_send_failure() {
        let sender = LocalSender::new(1);
        let _rx = sender.register(ConnectionId::from("slow"));
        let id = [ConnectionId::from("slow")];
        sender.send_many(&id, "m", json!(1)).await.unwrap();
        let err = sender.send_many(&id, "m", json!(2)).await.unwrap_err();
        assert!(matches!(err, TransportError::SendFailed { .. }));
    }
}
