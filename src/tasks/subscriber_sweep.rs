use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use crate::udp_notify::NotifyServer;

/// Background task that expires UDP subscribers which have not re-sent
/// `SUBSCRIBE` within the configured TTL
pub struct SubscriberSweepTask {
    notify: Arc<NotifyServer>,
    ttl: Duration,
    interval: Duration,
    shutdown: broadcast::Receiver<()>,
}

impl SubscriberSweepTask {
    pub fn new(
        notify: Arc<NotifyServer>,
        ttl: Duration,
        interval: Duration,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            notify,
            ttl,
            interval,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        let mut timer = tokio::time::interval(self.interval);
        // Skip immediate first tick
        timer.tick().await;

        tracing::info!(
            ttl_secs = self.ttl.as_secs(),
            interval_secs = self.interval.as_secs(),
            "Subscriber sweep task started"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("Subscriber sweep task received shutdown signal");
                    break;
                }
                _ = timer.tick() => {
                    let removed = self.notify.purge_expired(self.ttl);
                    if removed > 0 {
                        tracing::info!(
                            removed = removed,
                            remaining = self.notify.subscriber_count(),
                            "Expired UDP subscribers"
                        );
                    }
                }
            }
        }

        tracing::info!("Subscriber sweep task stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UdpConfig;
    use tokio::net::UdpSocket;

    async fn local_server() -> Arc<NotifyServer> {
        let config = UdpConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            ..Default::default()
        };
        NotifyServer::bind(&config).await.unwrap()
    }

    #[tokio::test]
    async fn test_sweep_task_shutdown() {
        let notify = local_server().await;
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let task = SubscriberSweepTask::new(
            notify,
            Duration::from_secs(60),
            Duration::from_secs(60),
            shutdown_rx,
        );

        let handle = tokio::spawn(task.run());

        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown_tx.send(()).unwrap();

        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("Task should complete")
            .expect("Task should not panic");
    }

    #[tokio::test]
    async fn test_sweep_removes_stale_subscribers() {
        let notify = local_server().await;
        let server_addr = notify.local_addr().unwrap();
        tokio::spawn(notify.clone().run());

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client.send_to(b"SUBSCRIBE", server_addr).await.unwrap();

        tokio::time::timeout(Duration::from_secs(2), async {
            while notify.subscriber_count() == 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("subscription should register");

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let task = SubscriberSweepTask::new(
            notify.clone(),
            Duration::from_millis(50),
            Duration::from_millis(50),
            shutdown_rx,
        );
        let handle = tokio::spawn(task.run());

        tokio::time::timeout(Duration::from_secs(2), async {
            while notify.subscriber_count() > 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("stale subscriber should be purged");

        shutdown_tx.send(()).unwrap();
        let _ = handle.await;
    }
}
