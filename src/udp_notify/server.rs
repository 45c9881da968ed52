use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Serialize;
use tokio::net::UdpSocket;

use crate::config::UdpConfig;
use crate::error::{AppError, Result};
use crate::metrics::NotifyMetrics;
use crate::models::Notification;

/// Control datagrams understood by the server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMessage {
    Subscribe,
    Unsubscribe,
}

impl ControlMessage {
    /// Trimmed, case-insensitive match. Anything else is `None`.
    pub fn parse(payload: &[u8]) -> Option<Self> {
        let text = String::from_utf8_lossy(payload);
        let text = text.trim();
        if text.eq_ignore_ascii_case("SUBSCRIBE") {
            Some(Self::Subscribe)
        } else if text.eq_ignore_ascii_case("UNSUBSCRIBE") {
            Some(Self::Unsubscribe)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone)]
struct Subscriber {
    addr: SocketAddr,
    subscribed_at: Instant,
}

/// Outcome of one notification broadcast
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub failed: usize,
}

/// UDP subscribe/notify server.
///
/// Membership is explicit: a subscriber stays registered until it sends
/// `UNSUBSCRIBE`, or until [`NotifyServer::purge_expired`] removes it when a
/// TTL is configured.
pub struct NotifyServer {
    socket: UdpSocket,
    /// "ip:port" -> subscriber
    subscribers: DashMap<String, Subscriber>,
    max_datagram_size: usize,
}

impl NotifyServer {
    pub async fn bind(config: &UdpConfig) -> Result<Arc<Self>> {
        let addr = config.addr();
        let socket = UdpSocket::bind(&addr)
            .await
            .map_err(|e| AppError::bind(&addr, e))?;

        Ok(Arc::new(Self {
            socket,
            subscribers: DashMap::new(),
            max_datagram_size: config.max_datagram_size,
        }))
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.socket
            .local_addr()
            .map_err(|e| AppError::Internal(format!("notify local address: {}", e)))
    }

    /// Receive loop; runs for the life of the process
    pub async fn run(self: Arc<Self>) {
        if let Ok(addr) = self.socket.local_addr() {
            tracing::info!(addr = %addr, "UDP notify listening");
        }

        let mut buf = vec![0u8; self.max_datagram_size];
        loop {
            match self.socket.recv_from(&mut buf).await {
                Ok((len, from)) => self.handle_datagram(&buf[..len], from),
                Err(e) => {
                    tracing::warn!(error = %e, "UDP receive failed");
                }
            }
        }
    }

    fn handle_datagram(&self, payload: &[u8], from: SocketAddr) {
        match ControlMessage::parse(payload) {
            Some(ControlMessage::Subscribe) => self.subscribe(from),
            Some(ControlMessage::Unsubscribe) => self.unsubscribe(from),
            None => {
                tracing::debug!(peer = %from, bytes = payload.len(), "Ignoring unknown UDP datagram");
            }
        }
    }

    fn subscribe(&self, addr: SocketAddr) {
        self.subscribers.insert(
            addr.to_string(),
            Subscriber {
                addr,
                subscribed_at: Instant::now(),
            },
        );
        let total = self.subscribers.len();
        NotifyMetrics::set_subscribers(total);
        tracing::info!(peer = %addr, total = total, "UDP subscribed");
    }

    fn unsubscribe(&self, addr: SocketAddr) {
        self.subscribers.remove(&addr.to_string());
        let total = self.subscribers.len();
        NotifyMetrics::set_subscribers(total);
        tracing::info!(peer = %addr, total = total, "UDP unsubscribed");
    }

    /// Send one notification datagram to every current subscriber.
    ///
    /// A failed send is logged and counted; the subscriber is kept.
    #[tracing::instrument(name = "udp.broadcast", skip(self, message), fields(message_len = message.len()))]
    pub async fn broadcast(&self, message: &str) -> BroadcastReport {
        let notification = Notification::new(message);
        let payload = match serde_json::to_vec(&notification) {
            Ok(p) => p,
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize notification");
                return BroadcastReport::default();
            }
        };

        // Snapshot so no shard lock is held across a send
        let targets: Vec<(String, SocketAddr)> = self
            .subscribers
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().addr))
            .collect();

        let mut report = BroadcastReport::default();
        for (key, addr) in targets {
            match self.socket.send_to(&payload, addr).await {
                Ok(_) => report.delivered += 1,
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(peer = %key, error = %e, "UDP send failed");
                }
            }
        }

        NotifyMetrics::record_delivered(report.delivered as u64);
        if report.failed > 0 {
            NotifyMetrics::record_send_failures(report.failed as u64);
        }
        tracing::info!(
            delivered = report.delivered,
            failed = report.failed,
            "UDP notification broadcast"
        );

        report
    }

    /// Drop subscribers whose last `SUBSCRIBE` is at least `ttl` old
    pub fn purge_expired(&self, ttl: Duration) -> usize {
        let before = self.subscribers.len();
        self.subscribers
            .retain(|_, subscriber| subscriber.subscribed_at.elapsed() < ttl);
        let after = self.subscribers.len();
        NotifyMetrics::set_subscribers(after);
        before.saturating_sub(after)
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Sorted "ip:port" keys of the current subscribers
    pub fn subscribers(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.subscribers.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_server() -> Arc<NotifyServer> {
        let config = UdpConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            ..Default::default()
        };
        NotifyServer::bind(&config).await.unwrap()
    }

    #[test]
    fn test_control_message_parsing() {
        assert_eq!(ControlMessage::parse(b"SUBSCRIBE"), Some(ControlMessage::Subscribe));
        assert_eq!(ControlMessage::parse(b"  subscribe\n"), Some(ControlMessage::Subscribe));
        assert_eq!(ControlMessage::parse(b"UnSubscribe"), Some(ControlMessage::Unsubscribe));
        assert_eq!(ControlMessage::parse(b"\tUNSUBSCRIBE \r\n"), Some(ControlMessage::Unsubscribe));
        assert_eq!(ControlMessage::parse(b"SUBSCRIBE ME"), None);
        assert_eq!(ControlMessage::parse(b""), None);
        assert_eq!(ControlMessage::parse(&[0xff, 0xfe]), None);
    }

    #[tokio::test]
    async fn test_subscribe_is_keyed_by_address() {
        let server = test_server().await;
        let addr: SocketAddr = "127.0.0.1:40000".parse().unwrap();

        server.handle_datagram(b"SUBSCRIBE", addr);
        server.handle_datagram(b"subscribe", addr);
        assert_eq!(server.subscribers(), vec!["127.0.0.1:40000".to_string()]);

        server.handle_datagram(b"hello", addr);
        assert_eq!(server.subscriber_count(), 1);

        server.handle_datagram(b"UNSUBSCRIBE", addr);
        assert_eq!(server.subscriber_count(), 0);

        // Unsubscribing twice is harmless
        server.handle_datagram(b"UNSUBSCRIBE", addr);
        assert_eq!(server.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_broadcast_without_subscribers() {
        let server = test_server().await;
        let report = server.broadcast("nobody listening").await;
        assert_eq!(report, BroadcastReport::default());
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let server = test_server().await;
        server.handle_datagram(b"SUBSCRIBE", "127.0.0.1:40001".parse().unwrap());
        server.handle_datagram(b"SUBSCRIBE", "127.0.0.1:40002".parse().unwrap());

        assert_eq!(server.purge_expired(Duration::from_secs(3600)), 0);
        assert_eq!(server.subscriber_count(), 2);

        assert_eq!(server.purge_expired(Duration::ZERO), 2);
        assert_eq!(server.subscriber_count(), 0);
    }
}
