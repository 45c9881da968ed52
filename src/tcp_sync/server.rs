use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::time::timeout;
use uuid::Uuid;

use crate::bridge::BridgeReceiver;
use crate::config::TcpConfig;
use crate::error::{AppError, Result};
use crate::metrics::PushStreamMetrics;
use crate::models::ProgressUpdate;

/// Pause after a failed accept (e.g. file descriptor exhaustion)
const ACCEPT_ERROR_BACKOFF_MS: u64 = 100;

const READ_BUFFER_SIZE: usize = 1024;

struct PushClient {
    peer: SocketAddr,
    writer: OwnedWriteHalf,
}

/// Outcome of writing one frame to every registered client
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryReport {
    pub delivered: usize,
    pub removed: usize,
}

/// Open push-stream connections, keyed by connection id.
///
/// The accept path, the read monitors and the delivery loop all go through
/// the same mutex, so the map is never mutated concurrently. The count is
/// mirrored in an atomic so readers never wait behind a broadcast that is
/// holding the lock for a slow client.
#[derive(Default)]
pub struct ClientRegistry {
    clients: Mutex<HashMap<Uuid, PushClient>>,
    count: AtomicUsize,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    async fn insert(&self, id: Uuid, client: PushClient) -> usize {
        let mut clients = self.clients.lock().await;
        clients.insert(id, client);
        let total = clients.len();
        self.publish_len(total);
        total
    }

    /// Called with the lock held after every mutation
    fn publish_len(&self, len: usize) {
        self.count.store(len, Ordering::Relaxed);
        PushStreamMetrics::set_active(len);
    }

    /// Remove a connection and close its write half. Returns false if it was
    /// already gone.
    async fn remove(&self, id: Uuid) -> bool {
        let removed = {
            let mut clients = self.clients.lock().await;
            let removed = clients.remove(&id);
            self.publish_len(clients.len());
            removed
        };

        match removed {
            Some(mut client) => {
                let _ = client.writer.shutdown().await;
                PushStreamMetrics::record_closed();
                tracing::info!(connection_id = %id, peer = %client.peer, "TCP client disconnected");
                true
            }
            None => false,
        }
    }

    /// Number of registered clients; does not take the registry lock
    pub fn len(&self) -> usize {
        self.count.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Write `frame` to every client. A client whose write fails or exceeds
    /// `write_timeout` is removed and closed; the others still get the frame.
    pub(crate) async fn broadcast(&self, frame: &[u8], write_timeout: Duration) -> DeliveryReport {
        let mut clients = self.clients.lock().await;
        let mut failed = Vec::new();
        let mut delivered = 0;

        for (id, client) in clients.iter_mut() {
            match timeout(write_timeout, client.writer.write_all(frame)).await {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(e)) => {
                    tracing::debug!(connection_id = %id, peer = %client.peer, error = %e, "TCP write failed");
                    failed.push(*id);
                }
                Err(_) => {
                    tracing::debug!(
                        connection_id = %id,
                        peer = %client.peer,
                        timeout_ms = write_timeout.as_millis() as u64,
                        "TCP write timed out"
                    );
                    failed.push(*id);
                }
            }
        }

        let mut removed = Vec::with_capacity(failed.len());
        for id in &failed {
            if let Some(client) = clients.remove(id) {
                removed.push((*id, client));
            }
        }
        self.publish_len(clients.len());
        drop(clients);

        let report = DeliveryReport {
            delivered,
            removed: removed.len(),
        };

        for (id, mut client) in removed {
            let _ = client.writer.shutdown().await;
            PushStreamMetrics::record_write_failure();
            PushStreamMetrics::record_closed();
            tracing::info!(connection_id = %id, peer = %client.peer, "Removed TCP client after write failure");
        }

        PushStreamMetrics::record_delivered(delivered as u64);
        report
    }
}

/// Newline-delimited JSON push stream fed by the event bridge
pub struct PushStreamServer {
    listener: TcpListener,
    receiver: BridgeReceiver,
    registry: Arc<ClientRegistry>,
    write_timeout: Duration,
}

impl PushStreamServer {
    /// Bind the listen socket. Failure here is a startup misconfiguration.
    pub async fn bind(config: &TcpConfig, receiver: BridgeReceiver) -> Result<Self> {
        let addr = config.addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| AppError::bind(&addr, e))?;

        Ok(Self {
            listener,
            receiver,
            registry: Arc::new(ClientRegistry::new()),
            write_timeout: config.write_timeout(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .map_err(|e| AppError::Internal(format!("push stream local address: {}", e)))
    }

    pub fn registry(&self) -> Arc<ClientRegistry> {
        self.registry.clone()
    }

    pub fn connection_count(&self) -> usize {
        self.registry.len()
    }

    /// Run the accept loop and the delivery loop for the life of the process
    pub async fn run(self) {
        let Self {
            listener,
            receiver,
            registry,
            write_timeout,
        } = self;

        if let Ok(addr) = listener.local_addr() {
            tracing::info!(addr = %addr, "TCP push stream listening");
        }

        tokio::join!(
            accept_loop(listener, registry.clone()),
            delivery_loop(receiver, registry, write_timeout),
        );
    }
}

async fn accept_loop(listener: TcpListener, registry: Arc<ClientRegistry>) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => register(stream, peer, &registry).await,
            Err(e) => {
                tracing::warn!(error = %e, "TCP accept failed");
                tokio::time::sleep(Duration::from_millis(ACCEPT_ERROR_BACKOFF_MS)).await;
            }
        }
    }
}

async fn register(stream: TcpStream, peer: SocketAddr, registry: &Arc<ClientRegistry>) {
    let id = Uuid::new_v4();
    let (reader, writer) = stream.into_split();

    let total = registry.insert(id, PushClient { peer, writer }).await;
    PushStreamMetrics::record_opened();
    tracing::info!(connection_id = %id, peer = %peer, total = total, "TCP client connected");

    tokio::spawn(read_monitor(id, reader, registry.clone()));
}

/// Discard inbound bytes; EOF or a read error means the peer is gone.
async fn read_monitor(id: Uuid, mut reader: OwnedReadHalf, registry: Arc<ClientRegistry>) {
    let mut buf = [0u8; READ_BUFFER_SIZE];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(_) => continue,
            Err(e) => {
                tracing::debug!(connection_id = %id, error = %e, "TCP read failed");
                break;
            }
        }
    }
    registry.remove(id).await;
}

async fn delivery_loop(
    mut receiver: BridgeReceiver,
    registry: Arc<ClientRegistry>,
    write_timeout: Duration,
) {
    while let Some(event) = receiver.recv().await {
        deliver(&event, &registry, write_timeout).await;
    }
    tracing::info!("Progress bridge closed, push-stream delivery loop stopped");
}

async fn deliver(event: &ProgressUpdate, registry: &ClientRegistry, write_timeout: Duration) {
    let frame = match event.to_frame() {
        Ok(frame) => frame,
        Err(e) => {
            tracing::error!(error = %e, "Failed to serialize progress update");
            return;
        }
    };

    let report = registry.broadcast(&frame, write_timeout).await;
    tracing::debug!(
        user_id = %event.user_id,
        manga_id = %event.manga_id,
        chapter = event.chapter,
        delivered = report.delivered,
        removed = report.removed,
        "Progress update broadcast"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, BufReader};

    async fn connected_pair(listener: &TcpListener) -> (TcpStream, TcpStream, SocketAddr) {
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server_side, peer) = listener.accept().await.unwrap();
        (client, server_side, peer)
    }

    #[tokio::test]
    async fn test_broadcast_reaches_every_client() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let registry = ClientRegistry::new();

        let mut clients = Vec::new();
        for _ in 0..3 {
            let (client, server_side, peer) = connected_pair(&listener).await;
            let (_reader, writer) = server_side.into_split();
            registry.insert(Uuid::new_v4(), PushClient { peer, writer }).await;
            clients.push(BufReader::new(client));
        }

        let report = registry
            .broadcast(b"{\"chapter\":1}\n", Duration::from_secs(1))
            .await;
        assert_eq!(report, DeliveryReport { delivered: 3, removed: 0 });

        for client in clients.iter_mut() {
            let mut line = String::new();
            client.read_line(&mut line).await.unwrap();
            assert_eq!(line, "{\"chapter\":1}\n");
        }
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let registry = ClientRegistry::new();
        let (_client, server_side, peer) = connected_pair(&listener).await;
        let (_reader, writer) = server_side.into_split();

        let id = Uuid::new_v4();
        registry.insert(id, PushClient { peer, writer }).await;
        assert_eq!(registry.len(), 1);

        assert!(registry.remove(id).await);
        assert!(!registry.remove(id).await);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_broadcast_with_no_clients() {
        let registry = ClientRegistry::new();
        let report = registry.broadcast(b"x\n", Duration::from_secs(1)).await;
        assert_eq!(report, DeliveryReport::default());
    }

    #[tokio::test]
    async fn test_bind_reports_address_and_starts_empty() {
        let config = TcpConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            ..Default::default()
        };
        let (_bridge, receiver) = crate::bridge::EventBridge::new(4);
        let server = PushStreamServer::bind(&config, receiver).await.unwrap();

        assert_ne!(server.local_addr().unwrap().port(), 0);
        assert_eq!(server.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_bind_conflict_is_reported() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let config = TcpConfig {
            host: "127.0.0.1".to_string(),
            port: taken.local_addr().unwrap().port(),
            ..Default::default()
        };
        let (_bridge, receiver) = crate::bridge::EventBridge::new(4);

        let result = PushStreamServer::bind(&config, receiver).await;
        assert!(matches!(result, Err(AppError::Bind { .. })));
    }

    #[tokio::test]
    async fn test_len_does_not_wait_for_registry_lock() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let registry = ClientRegistry::new();
        let (_client, server_side, peer) = connected_pair(&listener).await;
        let (_reader, writer) = server_side.into_split();
        registry.insert(Uuid::new_v4(), PushClient { peer, writer }).await;

        // Stands in for a broadcast stuck on a slow client
        let guard = registry.clients.lock().await;
        assert_eq!(registry.len(), 1);
        assert!(!registry.is_empty());
        drop(guard);
    }

    #[tokio::test]
    async fn test_len_follows_failed_write_removal() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let registry = ClientRegistry::new();
        let (client, server_side, peer) = connected_pair(&listener).await;
        let (_reader, writer) = server_side.into_split();
        registry.insert(Uuid::new_v4(), PushClient { peer, writer }).await;
        drop(client);

        // The first write after the peer closes may still succeed; a later
        // one fails once the reset has arrived
        let mut removed = 0;
        for _ in 0..50 {
            removed += registry.broadcast(b"x\n", Duration::from_secs(1)).await.removed;
            if removed > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(removed, 1);
        assert_eq!(registry.len(), 0);
    }
}
