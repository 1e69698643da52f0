//! Metrics helper structs for convenient metric recording

use std::time::Duration;

use prometheus::{Encoder, TextEncoder};

use super::{
    BROADCASTS_TOTAL, CONNECTIONS_ACTIVE, CONNECTIONS_CLOSED_TOTAL, CONNECTIONS_OPENED_TOTAL,
    CONNECTION_DURATION_SECONDS, DELIVERIES_TOTAL, FRAMES_RECEIVED_TOTAL, HUBS_ACTIVE,
    PROTOCOL_ERRORS_TOTAL, RATELIMIT_DENIED_TOTAL, RELAY_INBOUND_DROPPED_TOTAL, RELAY_PUBLISHED_TOTAL,
    RELAY_PUBLISH_FAILURES_TOTAL, RELAY_RECEIVED_TOTAL, RELAY_SUBSCRIPTIONS_ACTIVE,
    SLOW_CONSUMERS_TOTAL, SPAM_REJECTED_TOTAL,
};

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}

/// Helper struct for recording connection lifecycle metrics
pub struct ConnectionMetrics;

impl ConnectionMetrics {
    pub fn record_opened() {
        CONNECTIONS_OPENED_TOTAL.inc();
        CONNECTIONS_ACTIVE.inc();
    }

    /// Record a closed connection with its close reason and lifetime
    pub fn record_closed(reason: &str, lifetime: Duration) {
        CONNECTIONS_ACTIVE.dec();
        CONNECTIONS_CLOSED_TOTAL.with_label_values(&[reason]).inc();
        CONNECTION_DURATION_SECONDS.observe(lifetime.as_secs_f64());
    }

    pub fn record_frame(kind: &str) {
        FRAMES_RECEIVED_TOTAL.with_label_values(&[kind]).inc();
    }
}

/// Helper struct for recording hub metrics
pub struct HubMetrics;

impl HubMetrics {
    pub fn record_started() {
        HUBS_ACTIVE.inc();
    }

    pub fn record_stopped() {
        HUBS_ACTIVE.dec();
    }

    pub fn record_broadcast(kind: &str, origin: &str, delivered: u64) {
        BROADCASTS_TOTAL.with_label_values(&[kind, origin]).inc();
        DELIVERIES_TOTAL.inc_by(delivered);
    }

    pub fn record_slow_consumer() {
        SLOW_CONSUMERS_TOTAL.inc();
    }
}

/// Helper struct for recording abuse guard metrics
pub struct GuardMetrics;

impl GuardMetrics {
    pub fn record_protocol_error() {
        PROTOCOL_ERRORS_TOTAL.inc();
    }

    pub fn record_rate_limited() {
        RATELIMIT_DENIED_TOTAL.inc();
    }

    pub fn record_spam(rule: &str) {
        SPAM_REJECTED_TOTAL.with_label_values(&[rule]).inc();
    }
}

/// Helper struct for recording relay metrics
pub struct RelayMetrics;

impl RelayMetrics {
    pub fn record_published() {
        RELAY_PUBLISHED_TOTAL.inc();
    }

    pub fn record_publish_failed() {
        RELAY_PUBLISH_FAILURES_TOTAL.inc();
    }

    pub fn record_received() {
        RELAY_RECEIVED_TOTAL.inc();
    }

    /// A subscriber fell behind and a bus frame was discarded
    pub fn record_inbound_dropped() {
        RELAY_INBOUND_DROPPED_TOTAL.inc();
    }

    pub fn record_subscribed() {
        RELAY_SUBSCRIPTIONS_ACTIVE.inc();
    }

    pub fn record_unsubscribed() {
        RELAY_SUBSCRIPTIONS_ACTIVE.dec();
    }
}
