use std::collections::HashMap;

use axum::extract::ws::Utf8Bytes;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::config::WebSocketConfig;
use crate::metrics::HubMetrics;
use crate::models::ChatMessage;

pub type ConnectionId = Uuid;

/// Serialized chat frames queued for one connection
pub type OutboundReceiver = mpsc::Receiver<Utf8Bytes>;

const REGISTER_QUEUE_SIZE: usize = 64;
const BROADCAST_QUEUE_SIZE: usize = 1024;

#[derive(Debug, Error)]
pub enum HubError {
    #[error("chat hub is not running")]
    Closed,
}

/// Per-connection lifecycle, as seen by the connection's own tasks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Registered,
    Closing,
    Removed,
}

/// Why the hub dropped a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    SlowConsumer,
}

/// What a connection gets back from [`HubHandle::register`]
pub struct ClientLink {
    pub id: ConnectionId,
    pub outbound: OutboundReceiver,
    /// Resolves once the hub has removed this connection
    pub closed: oneshot::Receiver<CloseReason>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct HubStats {
    pub connections: usize,
    pub messages_broadcast: u64,
    pub frames_delivered: u64,
    pub evictions: u64,
}

struct Registration {
    id: ConnectionId,
    username: String,
    outbound: mpsc::Sender<Utf8Bytes>,
    closed: oneshot::Sender<CloseReason>,
}

struct InboundMessage {
    origin: Option<ConnectionId>,
    message: ChatMessage,
}

struct HubClient {
    username: String,
    outbound: mpsc::Sender<Utf8Bytes>,
    closed: oneshot::Sender<CloseReason>,
}

/// Cloneable front door to the hub's authority loop.
///
/// Connection tasks only ever talk to the loop through these queues; the
/// registry itself lives inside the loop.
#[derive(Clone)]
pub struct HubHandle {
    register_tx: mpsc::Sender<Registration>,
    unregister_tx: mpsc::UnboundedSender<ConnectionId>,
    broadcast_tx: mpsc::Sender<InboundMessage>,
    stats_tx: mpsc::Sender<oneshot::Sender<HubStats>>,
    outbound_buffer: usize,
}

impl HubHandle {
    /// Add a connection with a fresh bounded outbound queue
    pub async fn register(&self, username: impl Into<String>) -> Result<ClientLink, HubError> {
        let id = Uuid::new_v4();
        let (outbound_tx, outbound_rx) = mpsc::channel(self.outbound_buffer);
        let (closed_tx, closed_rx) = oneshot::channel();

        self.register_tx
            .send(Registration {
                id,
                username: username.into(),
                outbound: outbound_tx,
                closed: closed_tx,
            })
            .await
            .map_err(|_| HubError::Closed)?;

        Ok(ClientLink {
            id,
            outbound: outbound_rx,
            closed: closed_rx,
        })
    }

    /// Remove a connection. Unknown or already removed ids are ignored.
    pub fn unregister(&self, id: ConnectionId) {
        let _ = self.unregister_tx.send(id);
    }

    /// Hand a message to the hub for fan-out to every other connection.
    /// Returns false when the hub is gone.
    pub async fn broadcast(&self, origin: Option<ConnectionId>, message: ChatMessage) -> bool {
        let inbound = InboundMessage {
            origin,
            message: message.stamped(),
        };
        self.broadcast_tx.send(inbound).await.is_ok()
    }

    pub async fn stats(&self) -> Result<HubStats, HubError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.stats_tx
            .send(reply_tx)
            .await
            .map_err(|_| HubError::Closed)?;
        reply_rx.await.map_err(|_| HubError::Closed)
    }
}

/// Authority loop owning the connection registry
pub struct ChatHub {
    clients: HashMap<ConnectionId, HubClient>,
    echo_to_sender: bool,
    stats: HubStats,
    register_rx: mpsc::Receiver<Registration>,
    unregister_rx: mpsc::UnboundedReceiver<ConnectionId>,
    broadcast_rx: mpsc::Receiver<InboundMessage>,
    stats_rx: mpsc::Receiver<oneshot::Sender<HubStats>>,
}

impl ChatHub {
    /// Start the authority loop. It stops once every handle is dropped.
    pub fn spawn(config: &WebSocketConfig) -> HubHandle {
        let (register_tx, register_rx) = mpsc::channel(REGISTER_QUEUE_SIZE);
        let (unregister_tx, unregister_rx) = mpsc::unbounded_channel();
        let (broadcast_tx, broadcast_rx) = mpsc::channel(BROADCAST_QUEUE_SIZE);
        let (stats_tx, stats_rx) = mpsc::channel(16);

        let hub = ChatHub {
            clients: HashMap::new(),
            echo_to_sender: config.echo_to_sender,
            stats: HubStats::default(),
            register_rx,
            unregister_rx,
            broadcast_rx,
            stats_rx,
        };
        tokio::spawn(hub.run());

        HubHandle {
            register_tx,
            unregister_tx,
            broadcast_tx,
            stats_tx,
            outbound_buffer: config.outbound_buffer,
        }
    }

    async fn run(mut self) {
        tracing::info!("Chat hub started");

        loop {
            tokio::select! {
                biased;
                Some(registration) = self.register_rx.recv() => self.register(registration),
                Some(id) = self.unregister_rx.recv() => self.unregister(id),
                Some(inbound) = self.broadcast_rx.recv() => self.broadcast(inbound),
                Some(reply) = self.stats_rx.recv() => {
                    let _ = reply.send(self.snapshot());
                }
                else => break,
            }
        }

        tracing::info!("Chat hub stopped");
    }

    fn register(&mut self, registration: Registration) {
        let Registration {
            id,
            username,
            outbound,
            closed,
        } = registration;

        tracing::info!(connection_id = %id, username = %username, "Chat client connected");
        self.clients.insert(
            id,
            HubClient {
                username,
                outbound,
                closed,
            },
        );
        HubMetrics::set_active(self.clients.len());
    }

    fn unregister(&mut self, id: ConnectionId) {
        // Dropping the entry closes the outbound queue and fires `closed`
        if let Some(client) = self.clients.remove(&id) {
            tracing::info!(connection_id = %id, username = %client.username, "Chat client disconnected");
            HubMetrics::set_active(self.clients.len());
        }
    }

    fn evict(&mut self, id: ConnectionId) {
        if let Some(client) = self.clients.remove(&id) {
            tracing::warn!(
                connection_id = %id,
                username = %client.username,
                "Chat client send queue full, evicting slow consumer"
            );
            let _ = client.closed.send(CloseReason::SlowConsumer);
            self.stats.evictions += 1;
            HubMetrics::record_eviction();
            HubMetrics::set_active(self.clients.len());
        }
    }

    fn broadcast(&mut self, inbound: InboundMessage) {
        let InboundMessage { origin, message } = inbound;

        let payload: Utf8Bytes = match serde_json::to_string(&message) {
            Ok(json) => json.into(),
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize chat message");
                return;
            }
        };

        let mut delivered = 0u64;
        let mut slow = Vec::new();
        let mut gone = Vec::new();

        for (id, client) in &self.clients {
            if !self.echo_to_sender && origin == Some(*id) {
                continue;
            }
            match client.outbound.try_send(payload.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => slow.push(*id),
                Err(mpsc::error::TrySendError::Closed(_)) => gone.push(*id),
            }
        }

        for id in slow {
            self.evict(id);
        }
        for id in gone {
            self.unregister(id);
        }

        self.stats.messages_broadcast += 1;
        self.stats.frames_delivered += delivered;
        HubMetrics::record_delivered(delivered);

        tracing::debug!(
            username = %message.username,
            delivered = delivered,
            "Chat message broadcast"
        );
    }

    fn snapshot(&self) -> HubStats {
        HubStats {
            connections: self.clients.len(),
            ..self.stats.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    fn hub_with_buffer(outbound_buffer: usize) -> HubHandle {
        let config = WebSocketConfig {
            outbound_buffer,
            ..Default::default()
        };
        ChatHub::spawn(&config)
    }

    fn chat(text: &str) -> ChatMessage {
        ChatMessage {
            user_id: "u1".into(),
            username: "alice".into(),
            message: text.into(),
            timestamp: 0,
        }
    }

    async fn next_message(link: &mut ClientLink) -> ChatMessage {
        let frame = timeout(Duration::from_secs(1), link.outbound.recv())
            .await
            .expect("frame should arrive")
            .expect("queue should be open");
        serde_json::from_str(frame.as_str()).unwrap()
    }

    #[tokio::test]
    async fn test_broadcast_skips_origin_and_stamps_timestamp() {
        let hub = hub_with_buffer(8);
        let mut a = hub.register("alice").await.unwrap();
        let mut b = hub.register("bob").await.unwrap();

        assert!(hub.broadcast(Some(a.id), chat("hello")).await);

        let received = next_message(&mut b).await;
        assert_eq!(received.message, "hello");
        assert_eq!(received.username, "alice");
        assert!(received.timestamp > 0);

        // Stats go through the same loop, so the broadcast above is done
        let stats = hub.stats().await.unwrap();
        assert_eq!(stats.messages_broadcast, 1);
        assert_eq!(stats.frames_delivered, 1);
        assert!(a.outbound.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_echo_to_sender_when_enabled() {
        let config = WebSocketConfig {
            echo_to_sender: true,
            ..Default::default()
        };
        let hub = ChatHub::spawn(&config);
        let mut a = hub.register("alice").await.unwrap();

        hub.broadcast(Some(a.id), chat("echo")).await;
        assert_eq!(next_message(&mut a).await.message, "echo");
    }

    #[tokio::test]
    async fn test_slow_consumer_is_evicted_and_healthy_client_still_served() {
        let hub = hub_with_buffer(1);
        let author = hub.register("author").await.unwrap();
        let mut stalled = hub.register("stalled").await.unwrap();
        let mut healthy = hub.register("healthy").await.unwrap();

        hub.broadcast(Some(author.id), chat("first")).await;
        assert_eq!(next_message(&mut healthy).await.message, "first");

        // `stalled` never drains, so its single slot is still taken
        hub.broadcast(Some(author.id), chat("second")).await;
        assert_eq!(next_message(&mut healthy).await.message, "second");

        let reason = timeout(Duration::from_secs(1), &mut stalled.closed)
            .await
            .expect("eviction should signal")
            .expect("reason should be sent");
        assert_eq!(reason, CloseReason::SlowConsumer);

        let stats = hub.stats().await.unwrap();
        assert_eq!(stats.evictions, 1);
        assert_eq!(stats.connections, 2);

        // The buffered frame is still there, then the queue is closed
        assert!(stalled.outbound.recv().await.is_some());
        assert!(stalled.outbound.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_unregister_is_idempotent() {
        let hub = hub_with_buffer(4);
        let mut a = hub.register("alice").await.unwrap();
        let _b = hub.register("bob").await.unwrap();

        hub.unregister(a.id);
        hub.unregister(a.id);
        hub.unregister(Uuid::new_v4());

        let stats = hub.stats().await.unwrap();
        assert_eq!(stats.connections, 1);
        assert_eq!(stats.evictions, 0);

        assert!(a.outbound.recv().await.is_none());
        assert!((&mut a.closed).await.is_err());
    }

    #[tokio::test]
    async fn test_dropped_receiver_is_removed_on_next_broadcast() {
        let hub = hub_with_buffer(4);
        let a = hub.register("alice").await.unwrap();
        let b = hub.register("bob").await.unwrap();
        drop(b);

        hub.broadcast(Some(a.id), chat("anyone?")).await;

        let stats = hub.stats().await.unwrap();
        assert_eq!(stats.connections, 1);
        assert_eq!(stats.evictions, 0);
    }
}
