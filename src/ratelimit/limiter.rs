//! Per-user message rate limiter

use dashmap::DashMap;
use serde::Serialize;

use super::config::RateLimitConfig;
use super::window::FixedWindow;

/// Result of a rate limit check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateLimitResult {
    Allowed {
        remaining: u32,
        limit: u32,
        reset_at: i64,
    },
    Denied {
        /// Seconds until the window resets
        retry_after: u64,
        limit: u32,
        reset_at: i64,
    },
}

impl RateLimitResult {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateLimitResult::Allowed { .. })
    }
}

/// Fixed-window limiter keyed by user id.
///
/// Windows are created lazily on a user's first message and evicted by
/// [`RateLimiter::cleanup_stale`] once idle for `idle_ttl`.
pub struct RateLimiter {
    windows: DashMap<String, FixedWindow>,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            windows: DashMap::new(),
            config,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Count one message from `user_id` at the current time.
    pub fn check(&self, user_id: &str) -> RateLimitResult {
        self.check_at(user_id, FixedWindow::now_millis())
    }

    /// Count one message from `user_id` at `now_ms` (Unix milliseconds).
    pub fn check_at(&self, user_id: &str, now_ms: i64) -> RateLimitResult {
        let limit = self.config.limit;

        if !self.config.enabled {
            return RateLimitResult::Allowed {
                remaining: u32::MAX,
                limit: 0,
                reset_at: 0,
            };
        }

        let window_ms = self.config.window.as_millis() as i64;

        // Holding the entry guard serializes hits for one user
        let entry = self
            .windows
            .entry(user_id.to_string())
            .or_insert_with(|| FixedWindow::new(now_ms));

        let position = entry.hit(now_ms, window_ms);
        let reset_at = entry.reset_at(window_ms);

        if position <= limit {
            RateLimitResult::Allowed {
                remaining: limit - position,
                limit,
                reset_at,
            }
        } else {
            let retry_ms = (reset_at - now_ms).max(0) as u64;
            RateLimitResult::Denied {
                retry_after: retry_ms.div_ceil(1000),
                limit,
                reset_at,
            }
        }
    }

    /// Drop windows idle for at least `idle_ttl`. Returns the number removed.
    pub fn cleanup_stale(&self) -> usize {
        self.cleanup_stale_at(FixedWindow::now_millis())
    }

    pub fn cleanup_stale_at(&self, now_ms: i64) -> usize {
        let ttl_ms = self.config.idle_ttl.as_millis() as i64;
        let before = self.windows.len();

        self.windows
            .retain(|_, window| now_ms - window.last_activity() < ttl_ms);

        let removed = before.saturating_sub(self.windows.len());
        if removed > 0 {
            tracing::debug!(
                removed = removed,
                remaining = self.windows.len(),
                "Cleaned up stale rate limit windows"
            );
        }

        removed
    }

    pub fn stats(&self) -> RateLimiterStats {
        RateLimiterStats {
            enabled: self.config.enabled,
            tracked_users: self.windows.len(),
            limit: self.config.limit,
            window_seconds: self.config.window.as_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RateLimiterStats {
    pub enabled: bool,
    pub tracked_users: usize,
    pub limit: u32,
    pub window_seconds: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn limiter(limit: u32) -> RateLimiter {
        RateLimiter::new(RateLimitConfig {
            enabled: true,
            limit,
            window: Duration::from_secs(60),
            idle_ttl: Duration::from_secs(300),
        })
    }

    #[test]
    fn test_rate_limiter_disabled() {
        let limiter = RateLimiter::new(RateLimitConfig {
            enabled: false,
            ..Default::default()
        });

        for _ in 0..100 {
            assert!(limiter.check("user-1").is_allowed());
        }
        assert_eq!(limiter.stats().tracked_users, 0);
    }

    #[test]
    fn test_twenty_first_message_is_denied() {
        let limiter = limiter(20);
        let start = 1_000_000;

        for i in 0..20 {
            let result = limiter.check_at("user-1", start + i * 1000);
            assert!(result.is_allowed(), "message {} should pass", i + 1);
        }

        let denied = limiter.check_at("user-1", start + 20_000);
        assert_eq!(
            denied,
            RateLimitResult::Denied {
                retry_after: 40,
                limit: 20,
                reset_at: start + 60_000,
            }
        );
    }

    #[test]
    fn test_window_resets() {
        let limiter = limiter(2);
        assert!(limiter.check_at("user-1", 0).is_allowed());
        assert!(limiter.check_at("user-1", 1).is_allowed());
        assert!(!limiter.check_at("user-1", 2).is_allowed());

        assert!(limiter.check_at("user-1", 60_000).is_allowed());
    }

    #[test]
    fn test_users_are_independent() {
        let limiter = limiter(1);
        assert!(limiter.check_at("user-1", 0).is_allowed());
        assert!(!limiter.check_at("user-1", 1).is_allowed());
        assert!(limiter.check_at("user-2", 1).is_allowed());
    }

    #[test]
    fn test_remaining_counts_down() {
        let limiter = limiter(3);
        match limiter.check_at("user-1", 0) {
            RateLimitResult::Allowed { remaining, .. } => assert_eq!(remaining, 2),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_cleanup_stale_windows() {
        let limiter = limiter(5);
        limiter.check_at("idle", 0);
        limiter.check_at("busy", 299_000);

        let removed = limiter.cleanup_stale_at(300_000);
        assert_eq!(removed, 1);
        assert_eq!(limiter.stats().tracked_users, 1);
    }
}
