//! Prometheus metrics for the chat transport.
//!
//! - Connection lifecycle (active, opened, closed by reason, duration)
//! - Hub traffic (inbound frames, broadcasts, deliveries, slow consumers)
//! - Abuse guards (rate limit denials, spam rejections, protocol errors)
//! - Relay (publishes, failures, received frames, live subscriptions)

mod helpers;

pub use helpers::{encode_metrics, ConnectionMetrics, GuardMetrics, HubMetrics, RelayMetrics};

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "clipper_chat";

lazy_static! {
    // ============================================================================
    // Connection Metrics
    // ============================================================================

    /// Number of WebSocket connections currently registered with a hub
    pub static ref CONNECTIONS_ACTIVE: IntGauge = register_int_gauge!(
        format!("{}_connections_active", METRIC_PREFIX),
        "Number of active WebSocket connections"
    ).unwrap();

    pub static ref CONNECTIONS_OPENED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_connections_opened_total", METRIC_PREFIX),
        "Total WebSocket connections accepted"
    ).unwrap();

    /// Closed connections by close reason
    pub static ref CONNECTIONS_CLOSED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_connections_closed_total", METRIC_PREFIX),
        "Total WebSocket connections closed",
        &["reason"]
    ).unwrap();

    pub static ref CONNECTION_DURATION_SECONDS: Histogram = register_histogram!(
        format!("{}_connection_duration_seconds", METRIC_PREFIX),
        "Lifetime of WebSocket connections",
        vec![1.0, 10.0, 60.0, 300.0, 900.0, 3600.0, 14400.0]
    ).unwrap();

    // ============================================================================
    // Hub Metrics
    // ============================================================================

    pub static ref HUBS_ACTIVE: IntGauge = register_int_gauge!(
        format!("{}_hubs_active", METRIC_PREFIX),
        "Number of running channel hubs"
    ).unwrap();

    /// Inbound client frames by kind
    pub static ref FRAMES_RECEIVED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_frames_received_total", METRIC_PREFIX),
        "Total frames received from clients",
        &["kind"]
    ).unwrap();

    /// Broadcasts processed by hubs, by envelope kind and origin
    pub static ref BROADCASTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_broadcasts_total", METRIC_PREFIX),
        "Total envelopes broadcast by hubs",
        &["kind", "origin"]
    ).unwrap();

    pub static ref DELIVERIES_TOTAL: IntCounter = register_int_counter!(
        format!("{}_deliveries_total", METRIC_PREFIX),
        "Total envelopes enqueued to client outbound queues"
    ).unwrap();

    pub static ref SLOW_CONSUMERS_TOTAL: IntCounter = register_int_counter!(
        format!("{}_slow_consumers_total", METRIC_PREFIX),
        "Total clients disconnected because their outbound queue was full"
    ).unwrap();

    // ============================================================================
    // Guard Metrics
    // ============================================================================

    pub static ref PROTOCOL_ERRORS_TOTAL: IntCounter = register_int_counter!(
        format!("{}_protocol_errors_total", METRIC_PREFIX),
        "Total malformed or oversized frames rejected"
    ).unwrap();

    pub static ref RATELIMIT_DENIED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_ratelimit_denied_total", METRIC_PREFIX),
        "Total chat messages rejected by the rate limiter"
    ).unwrap();

    /// Spam rejections by heuristic
    pub static ref SPAM_REJECTED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_spam_rejected_total", METRIC_PREFIX),
        "Total chat messages rejected as spam",
        &["rule"]
    ).unwrap();

    // ============================================================================
    // Relay Metrics
    // ============================================================================

    pub static ref RELAY_PUBLISHED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_relay_published_total", METRIC_PREFIX),
        "Total envelopes published to the relay bus"
    ).unwrap();

    pub static ref RELAY_PUBLISH_FAILURES_TOTAL: IntCounter = register_int_counter!(
        format!("{}_relay_publish_failures_total", METRIC_PREFIX),
        "Total relay publishes that failed or were dropped"
    ).unwrap();

    pub static ref RELAY_RECEIVED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_relay_received_total", METRIC_PREFIX),
        "Total envelopes received from other instances"
    ).unwrap();

    pub static ref RELAY_INBOUND_DROPPED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_relay_inbound_dropped_total", METRIC_PREFIX),
        "Total bus frames dropped because a subscription buffer was full"
    ).unwrap();

    pub static ref RELAY_SUBSCRIPTIONS_ACTIVE: IntGauge = register_int_gauge!(
        format!("{}_relay_subscriptions_active", METRIC_PREFIX),
        "Number of live relay subscriptions"
    ).unwrap();
}
