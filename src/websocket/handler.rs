use std::time::Duration;

use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, Utf8Bytes, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::oneshot;
use tokio::time::{timeout, Instant};

use crate::config::WebSocketConfig;
use crate::metrics::HubMetrics;
use crate::models::ChatMessage;
use crate::server::AppState;

use super::hub::{CloseReason, ConnectionId, ConnectionState, HubHandle, OutboundReceiver};

const ANONYMOUS: &str = "anonymous";
const MAX_USERNAME_CHARS: usize = 32;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub username: Option<String>,
}

/// WebSocket upgrade handler
#[tracing::instrument(
    name = "ws.upgrade",
    skip(ws, state, query),
    fields(has_username = query.username.is_some())
)]
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
) -> Response {
    let username = display_name(query.username.as_deref());
    let hub = state.hub.clone();
    let config = state.settings.websocket.clone();

    tracing::debug!(username = %username, "WebSocket upgrade requested");

    ws.on_upgrade(move |socket| handle_socket(socket, hub, config, username))
}

/// Trimmed display name, `anonymous` when empty
fn display_name(raw: Option<&str>) -> String {
    let name: String = raw
        .map(str::trim)
        .unwrap_or_default()
        .chars()
        .take(MAX_USERNAME_CHARS)
        .collect();

    if name.is_empty() {
        ANONYMOUS.to_string()
    } else {
        name
    }
}

fn transition(id: ConnectionId, state: &mut ConnectionState, next: ConnectionState) {
    tracing::debug!(connection_id = %id, from = ?state, to = ?next, "Connection state changed");
    *state = next;
}

/// Handle an established WebSocket connection
#[tracing::instrument(
    name = "ws.connection",
    skip(socket, hub, config, username),
    fields(username = %username)
)]
async fn handle_socket(socket: WebSocket, hub: HubHandle, config: WebSocketConfig, username: String) {
    let connection_start = std::time::Instant::now();
    let mut state = ConnectionState::Connecting;

    let link = match hub.register(username.clone()).await {
        Ok(link) => link,
        Err(e) => {
            tracing::error!(error = %e, "Connection rejected");
            let mut socket = socket;
            let _ = socket.send(Message::Close(None)).await;
            return;
        }
    };
    let connection_id = link.id;
    transition(connection_id, &mut state, ConnectionState::Registered);
    HubMetrics::record_opened();

    let (ws_sender, ws_receiver) = socket.split();

    let mut send_task = tokio::spawn(write_pump(
        ws_sender,
        link.outbound,
        link.closed,
        config.ping_interval(),
        config.write_timeout(),
        connection_id,
    ));
    let mut recv_task = tokio::spawn(read_pump(
        ws_receiver,
        hub.clone(),
        connection_id,
        config.read_timeout(),
    ));

    // Wait for either task to complete
    tokio::select! {
        _ = &mut send_task => {
            tracing::debug!(connection_id = %connection_id, "Send task completed");
            transition(connection_id, &mut state, ConnectionState::Closing);
            recv_task.abort();
        }
        _ = &mut recv_task => {
            tracing::debug!(connection_id = %connection_id, "Receive task completed");
            transition(connection_id, &mut state, ConnectionState::Closing);
            // The writer sends the close frame once the hub drops us
            hub.unregister(connection_id);
            if timeout(config.write_timeout(), &mut send_task).await.is_err() {
                send_task.abort();
            }
        }
    }

    hub.unregister(connection_id);
    transition(connection_id, &mut state, ConnectionState::Removed);
    HubMetrics::record_closed();

    tracing::info!(
        connection_id = %connection_id,
        duration_secs = connection_start.elapsed().as_secs_f64(),
        "WebSocket connection closed"
    );
}

/// Decode inbound frames and hand chat messages to the hub.
///
/// Every frame, including pongs, restarts the read deadline.
async fn read_pump(
    mut receiver: SplitStream<WebSocket>,
    hub: HubHandle,
    connection_id: ConnectionId,
    read_timeout: Duration,
) {
    loop {
        let msg = match timeout(read_timeout, receiver.next()).await {
            Err(_) => {
                tracing::info!(
                    connection_id = %connection_id,
                    timeout_secs = read_timeout.as_secs(),
                    "Read deadline exceeded, dropping connection"
                );
                break;
            }
            Ok(None) => break,
            Ok(Some(Err(e))) => {
                tracing::debug!(connection_id = %connection_id, error = %e, "WebSocket receive error");
                break;
            }
            Ok(Some(Ok(msg))) => msg,
        };

        match msg {
            Message::Text(text) => {
                let chat: ChatMessage = match serde_json::from_str(text.as_str()) {
                    Ok(m) => m,
                    Err(e) => {
                        HubMetrics::record_decode_error();
                        tracing::warn!(connection_id = %connection_id, error = %e, "Failed to parse chat message");
                        continue;
                    }
                };
                HubMetrics::record_received();
                if !hub.broadcast(Some(connection_id), chat).await {
                    break;
                }
            }
            Message::Binary(_) => {
                tracing::debug!(connection_id = %connection_id, "Ignoring binary frame");
            }
            // Axum answers pings itself; both only refresh the deadline
            Message::Ping(_) | Message::Pong(_) => {}
            Message::Close(_) => {
                tracing::debug!(connection_id = %connection_id, "Received close frame");
                break;
            }
        }
    }
}

/// Drain the outbound queue and keep the peer alive with pings
async fn write_pump(
    mut sender: SplitSink<WebSocket, Message>,
    mut outbound: OutboundReceiver,
    mut closed: oneshot::Receiver<CloseReason>,
    ping_interval: Duration,
    write_timeout: Duration,
    connection_id: ConnectionId,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + ping_interval, ping_interval);

    loop {
        let next = tokio::select! {
            biased;
            reason = &mut closed => {
                let frame = match reason {
                    Ok(CloseReason::SlowConsumer) => Some(CloseFrame {
                        code: close_code::POLICY,
                        reason: Utf8Bytes::from_static("slow consumer"),
                    }),
                    Err(_) => None,
                };
                let _ = timeout(write_timeout, sender.send(Message::Close(frame))).await;
                break;
            }
            item = outbound.recv() => match item {
                Some(text) => Message::Text(text),
                None => {
                    let _ = timeout(write_timeout, sender.send(Message::Close(None))).await;
                    break;
                }
            },
            _ = ticker.tick() => Message::Ping(Default::default()),
        };

        match timeout(write_timeout, sender.send(next)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                HubMetrics::record_write_failure();
                tracing::debug!(connection_id = %connection_id, error = %e, "WebSocket send failed");
                break;
            }
            Err(_) => {
                HubMetrics::record_write_failure();
                tracing::debug!(connection_id = %connection_id, "WebSocket send timed out");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_name() {
        assert_eq!(display_name(Some("alice")), "alice");
        assert_eq!(display_name(Some("  bob  ")), "bob");
        assert_eq!(display_name(Some("   ")), "anonymous");
        assert_eq!(display_name(None), "anonymous");
        assert_eq!(display_name(Some(&"x".repeat(40))).chars().count(), 32);
    }
}
