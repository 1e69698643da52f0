use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,
    pub jwt: JwtConfig,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub websocket: WebSocketConfig,
    #[serde(default)]
    pub ratelimit: RateLimitSettings,
    #[serde(default)]
    pub spam: SpamSettings,
    #[serde(default)]
    pub shutdown: ShutdownSettings,
    #[serde(default)]
    pub otel: OtelConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Exact origins, `*.domain` wildcards, or `*`. Empty allows any origin.
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: Option<String>,
    pub audience: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    /// When disabled the relay runs on an in-process bus (single instance)
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_redis_url")]
    pub url: String,
    /// Topic prefix; a channel's topic is `{prefix}:{channel_id}`
    #[serde(default = "default_channel_prefix")]
    pub channel_prefix: String,
    /// Frames buffered per relay subscription before new ones are dropped
    #[serde(default = "default_subscription_buffer")]
    pub subscription_buffer: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// When unset, persistence, moderation and the channel directory are in-memory
    pub url: Option<String>,
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u64,
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebSocketConfig {
    /// Interval between server pings in seconds
    #[serde(default = "default_ping_interval")]
    pub ping_interval: u64,
    /// Read deadline in seconds; reset by any inbound frame
    #[serde(default = "default_pong_timeout")]
    pub pong_timeout: u64,
    /// Per-frame write deadline in seconds
    #[serde(default = "default_write_timeout")]
    pub write_timeout: u64,
    /// Time allowed to flush the outbound queue while closing, in seconds
    #[serde(default = "default_close_grace_period")]
    pub close_grace_period: u64,
    #[serde(default = "default_queue_capacity")]
    pub outbound_queue_capacity: usize,
    #[serde(default = "default_queue_capacity")]
    pub hub_queue_capacity: usize,
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
    #[serde(default = "default_max_content_chars")]
    pub max_content_chars: usize,
    #[serde(default)]
    pub check_bans_per_message: bool,
    /// Recent messages replayed to a joining client; 0 disables replay
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_messages_per_window")]
    pub messages_per_window: u32,
    #[serde(default = "default_window_seconds")]
    pub window_seconds: u64,
    /// Windows untouched for this long are evicted
    #[serde(default = "default_idle_ttl")]
    pub idle_ttl_seconds: u64,
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SpamSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_max_repeated_chars")]
    pub max_repeated_chars: usize,
    #[serde(default)]
    pub banned_words: Vec<String>,
    #[serde(default = "default_suspicious_patterns")]
    pub suspicious_patterns: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ShutdownSettings {
    #[serde(default = "default_drain_timeout")]
    pub drain_timeout_seconds: u64,
}

/// OpenTelemetry configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OtelConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_otel_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_service_name")]
    pub service_name: String,
    #[serde(default = "default_sampling_ratio")]
    pub sampling_ratio: f64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_channel_prefix() -> String {
    "chat".to_string()
}

fn default_subscription_buffer() -> usize {
    256
}

fn default_pool_size() -> u32 {
    10
}

fn default_connect_timeout() -> u64 {
    5
}

fn default_idle_timeout() -> u64 {
    300
}

fn default_ping_interval() -> u64 {
    30
}

fn default_pong_timeout() -> u64 {
    60
}

fn default_write_timeout() -> u64 {
    10
}

fn default_close_grace_period() -> u64 {
    5
}

fn default_queue_capacity() -> usize {
    256
}

fn default_max_frame_bytes() -> usize {
    2000
}

fn default_max_content_chars() -> usize {
    1000
}

fn default_history_limit() -> usize {
    50
}

fn default_true() -> bool {
    true
}

fn default_messages_per_window() -> u32 {
    20
}

fn default_window_seconds() -> u64 {
    60
}

fn default_idle_ttl() -> u64 {
    300 // 5 minutes
}

fn default_cleanup_interval() -> u64 {
    60
}

fn default_max_repeated_chars() -> usize {
    5
}

fn default_suspicious_patterns() -> Vec<String> {
    vec![
        r"https?://bit\.ly/".to_string(),
        r"https?://tinyurl\.com/".to_string(),
        r"\b[A-Z]{5,}\b".to_string(),
    ]
}

fn default_drain_timeout() -> u64 {
    5
}

fn default_otel_endpoint() -> String {
    "http://localhost:4317".to_string()
}

fn default_service_name() -> String {
    "clipper-chat".to_string()
}

fn default_sampling_ratio() -> f64 {
    1.0
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8080)?
            .set_default("redis.url", "redis://localhost:6379")?
            .set_default("websocket.ping_interval", 30)?
            .set_default("websocket.pong_timeout", 60)?
            .set_default("ratelimit.messages_per_window", 20)?
            .set_default("ratelimit.window_seconds", 60)?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // SERVER_PORT, JWT_SECRET, REDIS_URL, DATABASE_URL, ...
            .add_source(
                Environment::default()
                    .separator("_")
                    .try_parsing(true)
                    .list_separator(","),
            );

        builder.build()?.try_deserialize()
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            allowed_origins: vec![],
        }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: default_redis_url(),
            channel_prefix: default_channel_prefix(),
            subscription_buffer: default_subscription_buffer(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            pool_size: default_pool_size(),
            connect_timeout_seconds: default_connect_timeout(),
            idle_timeout_seconds: default_idle_timeout(),
        }
    }
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            ping_interval: default_ping_interval(),
            pong_timeout: default_pong_timeout(),
            write_timeout: default_write_timeout(),
            close_grace_period: default_close_grace_period(),
            outbound_queue_capacity: default_queue_capacity(),
            hub_queue_capacity: default_queue_capacity(),
            max_frame_bytes: default_max_frame_bytes(),
            max_content_chars: default_max_content_chars(),
            check_bans_per_message: false,
            history_limit: default_history_limit(),
        }
    }
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            messages_per_window: default_messages_per_window(),
            window_seconds: default_window_seconds(),
            idle_ttl_seconds: default_idle_ttl(),
            cleanup_interval_seconds: default_cleanup_interval(),
        }
    }
}

impl Default for SpamSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_repeated_chars: default_max_repeated_chars(),
            banned_words: vec![],
            suspicious_patterns: default_suspicious_patterns(),
        }
    }
}

impl Default for ShutdownSettings {
    fn default() -> Self {
        Self {
            drain_timeout_seconds: default_drain_timeout(),
        }
    }
}

impl Default for OtelConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: default_otel_endpoint(),
            service_name: default_service_name(),
            sampling_ratio: default_sampling_ratio(),
        }
    }
}
