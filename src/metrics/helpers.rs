//! Metrics helper structs for convenient metric recording

use prometheus::{Encoder, TextEncoder};

use super::{
    transport, BRIDGE_DROPPED_TOTAL, BRIDGE_SUBMITTED_TOTAL, CONNECTIONS_ACTIVE,
    CONNECTIONS_CLOSED_TOTAL, CONNECTIONS_OPENED_TOTAL, FRAMES_DELIVERED_TOTAL,
    HUB_DECODE_ERRORS_TOTAL, HUB_EVICTIONS_TOTAL, HUB_MESSAGES_RECEIVED_TOTAL,
    WRITE_FAILURES_TOTAL,
};

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}

/// Helper struct for recording bridge metrics
pub struct BridgeMetrics;

impl BridgeMetrics {
    pub fn record_submitted() {
        BRIDGE_SUBMITTED_TOTAL.inc();
    }

    pub fn record_dropped() {
        BRIDGE_DROPPED_TOTAL.inc();
    }
}

/// Helper struct for recording push-stream metrics
pub struct PushStreamMetrics;

impl PushStreamMetrics {
    pub fn record_opened() {
        CONNECTIONS_OPENED_TOTAL
            .with_label_values(&[transport::PUSH_STREAM])
            .inc();
    }

    pub fn record_closed() {
        CONNECTIONS_CLOSED_TOTAL
            .with_label_values(&[transport::PUSH_STREAM])
            .inc();
    }

    pub fn set_active(count: usize) {
        CONNECTIONS_ACTIVE
            .with_label_values(&[transport::PUSH_STREAM])
            .set(count as i64);
    }

    pub fn record_delivered(count: u64) {
        FRAMES_DELIVERED_TOTAL
            .with_label_values(&[transport::PUSH_STREAM])
            .inc_by(count);
    }

    pub fn record_write_failure() {
        WRITE_FAILURES_TOTAL
            .with_label_values(&[transport::PUSH_STREAM])
            .inc();
    }
}

/// Helper struct for recording notify-server metrics
pub struct NotifyMetrics;

impl NotifyMetrics {
    pub fn set_subscribers(count: usize) {
        CONNECTIONS_ACTIVE
            .with_label_values(&[transport::NOTIFY])
            .set(count as i64);
    }

    pub fn record_delivered(count: u64) {
        FRAMES_DELIVERED_TOTAL
            .with_label_values(&[transport::NOTIFY])
            .inc_by(count);
    }

    pub fn record_send_failures(count: u64) {
        WRITE_FAILURES_TOTAL
            .with_label_values(&[transport::NOTIFY])
            .inc_by(count);
    }
}

/// Helper struct for recording hub metrics
pub struct HubMetrics;

impl HubMetrics {
    pub fn record_opened() {
        CONNECTIONS_OPENED_TOTAL.with_label_values(&[transport::HUB]).inc();
    }

    pub fn record_closed() {
        CONNECTIONS_CLOSED_TOTAL.with_label_values(&[transport::HUB]).inc();
    }

    pub fn set_active(count: usize) {
        CONNECTIONS_ACTIVE
            .with_label_values(&[transport::HUB])
            .set(count as i64);
    }

    pub fn record_delivered(count: u64) {
        FRAMES_DELIVERED_TOTAL
            .with_label_values(&[transport::HUB])
            .inc_by(count);
    }

    pub fn record_eviction() {
        HUB_EVICTIONS_TOTAL.inc();
    }

    pub fn record_received() {
        HUB_MESSAGES_RECEIVED_TOTAL.inc();
    }

    pub fn record_decode_error() {
        HUB_DECODE_ERRORS_TOTAL.inc();
    }

    pub fn record_write_failure() {
        WRITE_FAILURES_TOTAL.with_label_values(&[transport::HUB]).inc();
    }
}
