//! Rate limiting configuration

use std::time::Duration;

use crate::config::RateLimitSettings;

/// Runtime form of [`RateLimitSettings`] with durations resolved.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub enabled: bool,
    /// Messages allowed per user per window
    pub limit: u32,
    pub window: Duration,
    /// Windows untouched for this long are evicted by `cleanup_stale`
    pub idle_ttl: Duration,
}

impl From<&RateLimitSettings> for RateLimitConfig {
    fn from(settings: &RateLimitSettings) -> Self {
        Self {
            enabled: settings.enabled,
            limit: settings.messages_per_window,
            window: Duration::from_secs(settings.window_seconds),
            idle_ttl: Duration::from_secs(settings.idle_ttl_seconds),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self::from(&RateLimitSettings::default())
    }
}
