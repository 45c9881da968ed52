// Shared infrastructure
pub mod config;
pub mod error;
pub mod metrics;
pub mod telemetry;

// Domain values
pub mod models;

// Transports
pub mod bridge;
pub mod tcp_sync;
pub mod udp_notify;
pub mod websocket;

// Application layer
pub mod api;
pub mod server;

// Supporting modules
pub mod tasks;
