//! Health check and statistics endpoints.

use axum::{extract::State, Json};
use serde::Serialize;

use crate::bridge::BridgeStats;
use crate::server::AppState;
use crate::websocket::HubStats;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub transports: TransportHealth,
}

#[derive(Debug, Serialize)]
pub struct TransportHealth {
    pub tcp: TransportStatus,
    pub udp: TransportStatus,
    pub websocket: TransportStatus,
}

#[derive(Debug, Serialize)]
pub struct TransportStatus {
    pub status: String,
    pub connections: usize,
}

impl TransportStatus {
    fn healthy(connections: usize) -> Self {
        Self {
            status: "healthy".to_string(),
            connections,
        }
    }

    fn unhealthy() -> Self {
        Self {
            status: "unhealthy".to_string(),
            connections: 0,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub bridge: BridgeStats,
    pub tcp: PushStreamStats,
    pub udp: NotifyStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub websocket: Option<HubStats>,
}

#[derive(Debug, Serialize)]
pub struct PushStreamStats {
    pub connections: usize,
}

#[derive(Debug, Serialize)]
pub struct NotifyStats {
    pub subscribers: usize,
    pub addresses: Vec<String>,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime_seconds = state.start_time.elapsed().as_secs();

    let websocket = match state.hub.stats().await {
        Ok(stats) => TransportStatus::healthy(stats.connections),
        Err(e) => {
            tracing::warn!(error = %e, "Chat hub unavailable");
            TransportStatus::unhealthy()
        }
    };
    let all_healthy = websocket.status == "healthy";

    Json(HealthResponse {
        status: if all_healthy { "healthy" } else { "degraded" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds,
        transports: TransportHealth {
            tcp: TransportStatus::healthy(state.push_registry.len()),
            udp: TransportStatus::healthy(state.notify.subscriber_count()),
            websocket,
        },
    })
}

pub async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse {
        bridge: state.bridge.stats(),
        tcp: PushStreamStats {
            connections: state.push_registry.len(),
        },
        udp: NotifyStats {
            subscribers: state.notify.subscriber_count(),
            addresses: state.notify.subscribers(),
        },
        websocket: state.hub.stats().await.ok(),
    })
}
