//! Prometheus metrics for the fan-out service.
//!
//! - Connection gauges per transport (push stream, notify, hub)
//! - Bridge queue counters (submitted, dropped)
//! - Delivery counters and write failures per transport
//! - Hub eviction and decode-error counters

mod helpers;

pub use helpers::{encode_metrics, BridgeMetrics, HubMetrics, NotifyMetrics, PushStreamMetrics};

use lazy_static::lazy_static;
use prometheus::{
    register_int_counter, register_int_counter_vec, register_int_gauge_vec, IntCounter,
    IntCounterVec, IntGaugeVec,
};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "fanout";

lazy_static! {
    // ============================================================================
    // Connection Metrics
    // ============================================================================

    /// Open connections (or subscribers) per transport
    pub static ref CONNECTIONS_ACTIVE: IntGaugeVec = register_int_gauge_vec!(
        format!("{}_connections_active", METRIC_PREFIX),
        "Open connections per transport",
        &["transport"]
    ).unwrap();

    /// Connections opened per transport
    pub static ref CONNECTIONS_OPENED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_connections_opened_total", METRIC_PREFIX),
        "Total connections opened per transport",
        &["transport"]
    ).unwrap();

    /// Connections closed per transport
    pub static ref CONNECTIONS_CLOSED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_connections_closed_total", METRIC_PREFIX),
        "Total connections closed per transport",
        &["transport"]
    ).unwrap();

    // ============================================================================
    // Bridge Metrics
    // ============================================================================

    pub static ref BRIDGE_SUBMITTED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_bridge_submitted_total", METRIC_PREFIX),
        "Total events submitted to the push-stream bridge"
    ).unwrap();

    /// Events lost because the bridge queue was full or closed
    pub static ref BRIDGE_DROPPED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_bridge_dropped_total", METRIC_PREFIX),
        "Total events dropped by the push-stream bridge"
    ).unwrap();

    // ============================================================================
    // Delivery Metrics
    // ============================================================================

    /// Frames handed to a transport, one per destination
    pub static ref FRAMES_DELIVERED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_frames_delivered_total", METRIC_PREFIX),
        "Total frames delivered per transport",
        &["transport"]
    ).unwrap();

    pub static ref WRITE_FAILURES_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_write_failures_total", METRIC_PREFIX),
        "Total per-destination write failures per transport",
        &["transport"]
    ).unwrap();

    // ============================================================================
    // Hub Metrics
    // ============================================================================

    pub static ref HUB_EVICTIONS_TOTAL: IntCounter = register_int_counter!(
        format!("{}_hub_evictions_total", METRIC_PREFIX),
        "Total hub connections evicted as slow consumers"
    ).unwrap();

    pub static ref HUB_DECODE_ERRORS_TOTAL: IntCounter = register_int_counter!(
        format!("{}_hub_decode_errors_total", METRIC_PREFIX),
        "Total inbound hub frames that failed to decode"
    ).unwrap();

    pub static ref HUB_MESSAGES_RECEIVED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_hub_messages_received_total", METRIC_PREFIX),
        "Total chat messages received from hub connections"
    ).unwrap();
}

/// Transport label values
pub mod transport {
    pub const PUSH_STREAM: &str = "tcp";
    pub const NOTIFY: &str = "udp";
    pub const HUB: &str = "websocket";
}
