use axum::{
    body::Body,
    extract::State,
    http::{header, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};

use super::AppState;
use crate::error::AppError;

/// Origin allow-list for the WebSocket upgrade route.
///
/// An empty `server.allowed_origins` list allows every origin (development).
pub async fn origin_guard(State(state): State<AppState>, req: Request<Body>, next: Next) -> Response {
    let allowed = &state.settings.server.allowed_origins;
    if allowed.is_empty() {
        return next.run(req).await;
    }

    let origin = req
        .headers()
        .get(header::ORIGIN)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    if is_origin_allowed(origin, allowed) {
        next.run(req).await
    } else {
        tracing::warn!(origin = %origin, "Rejected WebSocket origin");
        AppError::Forbidden("Origin not allowed".to_string()).into_response()
    }
}

/// True when `origin` matches any entry: an exact origin, `*.domain`, or `*`.
pub fn is_origin_allowed(origin: &str, allowed: &[String]) -> bool {
    if origin.is_empty() {
        return false;
    }
    allowed.iter().any(|pattern| matches_pattern(origin, pattern))
}

/// `*.clpr.tv` matches `clpr.tv` and any subdomain depth, on any scheme or port,
/// but never `fakeclpr.tv`.
pub fn matches_pattern(origin: &str, pattern: &str) -> bool {
    if pattern == "*" || origin == pattern {
        return true;
    }

    let Some(domain) = pattern.strip_prefix("*.") else {
        return false;
    };

    let host = origin_host(origin);
    host.eq_ignore_ascii_case(domain)
        || host
            .len()
            .checked_sub(domain.len() + 1)
            .map(|split| {
                host.as_bytes()[split] == b'.' && host[split + 1..].eq_ignore_ascii_case(domain)
            })
            .unwrap_or(false)
}

/// Host part of an origin, without scheme, port or path
fn origin_host(origin: &str) -> &str {
    let rest = origin.split_once("://").map(|(_, r)| r).unwrap_or(origin);
    let authority = rest.split('/').next().unwrap_or(rest);
    authority.split(':').next().unwrap_or(authority)
}
