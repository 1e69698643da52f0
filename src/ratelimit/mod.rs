//! Per-user abuse guards for chat traffic.
//!
//! - [`RateLimiter`]: fixed-window message quota keyed by user id
//! - [`SpamGuard`]: content heuristics (repeated characters, banned words, regexes)
//!
//! Both are shared by every connection on the instance; the limiter's windows
//! are the only shared mutable state on the message path.

mod config;
mod limiter;
mod spam;
mod window;

pub use config::RateLimitConfig;
pub use limiter::{RateLimitResult, RateLimiter, RateLimiterStats};
pub use spam::{SpamError, SpamGuard, SpamVerdict};
pub use window::FixedWindow;
