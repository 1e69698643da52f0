//! Application configuration and settings

mod settings;

pub use settings::{
    DatabaseConfig, JwtConfig, OtelConfig, RateLimitSettings, RedisConfig, ServerConfig,
    Settings, ShutdownSettings, SpamSettings, WebSocketConfig,
};
