//! Health check and statistics endpoints.

use std::collections::HashMap;

use axum::{extract::State, Json};
use serde::Serialize;

use crate::ratelimit::RateLimiterStats;
use crate::server::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub total_connections: usize,
    pub active_channels: usize,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub total_connections: usize,
    pub active_channels: usize,
    pub channel_stats: HashMap<String, usize>,
    pub rate_limit: RateLimiterStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relay_bus: Option<String>,
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let stats = state.chat.stats();
    let status = if state.chat.is_accepting() {
        "healthy"
    } else {
        "shutting_down"
    };

    Json(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
        total_connections: stats.total_connections,
        active_channels: stats.active_channels,
    })
}

/// GET /stats
pub async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    let stats = state.chat.stats();

    Json(StatsResponse {
        total_connections: stats.total_connections,
        active_channels: stats.active_channels,
        channel_stats: stats.channel_stats,
        rate_limit: state.rate_limiter.stats(),
        relay_bus: state.chat.relay().map(|r| r.bus_name().to_string()),
    })
}
