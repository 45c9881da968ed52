//! Subscribe to the UDP notify service and print each notification.
//!
//! Usage: `udp-monitor [addr]` (default `127.0.0.1:7070`). Ctrl-C sends
//! `UNSUBSCRIBE` before exiting.

use anyhow::{Context, Result};
use tokio::net::UdpSocket;

use realtime_fanout::models::Notification;

const DEFAULT_ADDR: &str = "127.0.0.1:7070";

#[tokio::main]
async fn main() -> Result<()> {
    let server = std::env::args().nth(1).unwrap_or_else(|| DEFAULT_ADDR.to_string());

    // One ephemeral socket both sends SUBSCRIBE and receives notifications
    let socket = UdpSocket::bind("0.0.0.0:0")
        .await
        .context("failed to bind local UDP socket")?;
    socket
        .send_to(b"SUBSCRIBE", &server)
        .await
        .with_context(|| format!("failed to subscribe to {}", server))?;

    println!("UDP monitor subscribed to: {}", server);
    println!("Local addr: {}", socket.local_addr()?);
    println!("Waiting for notifications...");

    let mut buf = vec![0u8; 4096];
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                socket.send_to(b"UNSUBSCRIBE", &server).await?;
                println!("Unsubscribed.");
                return Ok(());
            }
            received = socket.recv_from(&mut buf) => {
                let (len, from) = match received {
                    Ok(r) => r,
                    Err(e) => {
                        eprintln!("read error: {}", e);
                        continue;
                    }
                };
                match serde_json::from_slice::<Notification>(&buf[..len]) {
                    Ok(n) => println!("FROM {} [{}]: {}", from, n.timestamp, n.message),
                    Err(_) => println!("FROM {}: {}", from, String::from_utf8_lossy(&buf[..len])),
                }
            }
        }
    }
}
