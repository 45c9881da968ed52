//! Print every progress update pushed by the TCP push stream.
//!
//! Usage: `tcp-monitor [addr]` (default `127.0.0.1:9090`)

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;

use realtime_fanout::models::ProgressUpdate;

const DEFAULT_ADDR: &str = "127.0.0.1:9090";

#[tokio::main]
async fn main() -> Result<()> {
    let addr = std::env::args().nth(1).unwrap_or_else(|| DEFAULT_ADDR.to_string());

    let stream = TcpStream::connect(&addr)
        .await
        .with_context(|| format!("failed to connect to {}", addr))?;

    println!("Connected to TCP push stream: {}", addr);
    println!("Waiting for progress updates...");

    let mut lines = BufReader::new(stream).lines();
    while let Some(line) = lines.next_line().await? {
        match serde_json::from_str::<ProgressUpdate>(&line) {
            Ok(update) => println!(
                "[{}] user={} manga={} chapter={}",
                update.timestamp, update.user_id, update.manga_id, update.chapter
            ),
            Err(_) => println!("{}", line),
        }
    }

    println!("Disconnected.");
    Ok(())
}
