//! Fixed window counter

use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::time::SystemTime;

/// One user's message counter for the current window.
///
/// The window opens on the first hit after the previous one expired; there is
/// no alignment to wall-clock minutes.
#[derive(Debug)]
pub struct FixedWindow {
    /// Window start (Unix milliseconds)
    started_at: AtomicI64,
    count: AtomicU32,
    /// Last hit, allowed or not (Unix milliseconds)
    last_activity: AtomicI64,
}

impl FixedWindow {
    pub fn new(now_ms: i64) -> Self {
        Self {
            started_at: AtomicI64::new(now_ms),
            count: AtomicU32::new(0),
            last_activity: AtomicI64::new(now_ms),
        }
    }

    /// Get current time in milliseconds
    pub fn now_millis() -> i64 {
        SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as i64
    }

    /// Count one hit at `now_ms`. Returns the hit's position in its window (1-based).
    ///
    /// Callers hold the map entry's shard lock, so the reset-then-increment
    /// sequence is not raced by another hit for the same user.
    pub fn hit(&self, now_ms: i64, window_ms: i64) -> u32 {
        self.last_activity.store(now_ms, Ordering::Relaxed);

        let started = self.started_at.load(Ordering::Relaxed);
        if now_ms - started >= window_ms {
            self.started_at.store(now_ms, Ordering::Relaxed);
            self.count.store(1, Ordering::Relaxed);
            return 1;
        }

        self.count.fetch_add(1, Ordering::Relaxed).saturating_add(1)
    }

    /// Window end (Unix milliseconds)
    pub fn reset_at(&self, window_ms: i64) -> i64 {
        self.started_at.load(Ordering::Relaxed) + window_ms
    }

    pub fn last_activity(&self) -> i64 {
        self.last_activity.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_within_window() {
        let window = FixedWindow::new(0);
        assert_eq!(window.hit(0, 1000), 1);
        assert_eq!(window.hit(10, 1000), 2);
        assert_eq!(window.hit(999, 1000), 3);
    }

    #[test]
    fn test_resets_after_window() {
        let window = FixedWindow::new(0);
        window.hit(0, 1000);
        window.hit(500, 1000);

        assert_eq!(window.hit(1000, 1000), 1);
        assert_eq!(window.reset_at(1000), 2000);
        assert_eq!(window.last_activity(), 1000);
    }
}
