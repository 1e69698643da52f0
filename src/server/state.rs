use std::sync::Arc;
use std::time::Instant;

use uuid::Uuid;

use crate::auth::{Authenticator, JwtAuthenticator};
use crate::config::Settings;
use crate::error::AppError;
use crate::postgres::PostgresPool;
use crate::ratelimit::{RateLimitConfig, RateLimiter, SpamGuard};
use crate::relay::{MemoryBus, PubSubBus, RedisBus, Relay};
use crate::store::{ChannelDirectory, MemoryStore, MessageStore, ModerationPolicy, PostgresStore};
use crate::websocket::{ClientConfig, ClientContext};

use super::ChatServer;

/// External services the server is wired to
pub struct Collaborators {
    pub authenticator: Arc<dyn Authenticator>,
    pub store: Arc<dyn MessageStore>,
    pub moderation: Arc<dyn ModerationPolicy>,
    pub directory: Arc<dyn ChannelDirectory>,
    pub bus: Arc<dyn PubSubBus>,
}

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub authenticator: Arc<dyn Authenticator>,
    pub directory: Arc<dyn ChannelDirectory>,
    pub moderation: Arc<dyn ModerationPolicy>,
    pub rate_limiter: Arc<RateLimiter>,
    pub chat: Arc<ChatServer>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(settings: Settings, collaborators: Collaborators) -> Result<Self, AppError> {
        let Collaborators {
            authenticator,
            store,
            moderation,
            directory,
            bus,
        } = collaborators;

        let spam_guard = if settings.spam.enabled {
            SpamGuard::new(&settings.spam)
                .map_err(|e| AppError::Config(config::ConfigError::Message(e.to_string())))?
        } else {
            SpamGuard::disabled()
        };
        let rate_limiter = Arc::new(RateLimiter::new(RateLimitConfig::from(&settings.ratelimit)));

        let client_ctx = Arc::new(ClientContext {
            config: ClientConfig::from(&settings.websocket),
            rate_limiter: rate_limiter.clone(),
            spam_guard: Arc::new(spam_guard),
            store,
            moderation: moderation.clone(),
        });

        let server_id = Uuid::new_v4().to_string();
        tracing::info!(server_id = %server_id, bus = bus.name(), "Relay configured");
        let relay = Relay::new(bus, server_id, &settings.redis.channel_prefix);

        let chat = Arc::new(ChatServer::new(
            client_ctx,
            Some(relay),
            settings.websocket.hub_queue_capacity,
        ));

        Ok(Self {
            settings: Arc::new(settings),
            authenticator,
            directory,
            moderation,
            rate_limiter,
            chat,
            started_at: Instant::now(),
        })
    }

    /// Wire collaborators from configuration: Postgres when `database.url` is
    /// set, Redis when `redis.enabled`, in-memory otherwise.
    pub async fn from_settings(settings: Settings) -> Result<Self, AppError> {
        let authenticator: Arc<dyn Authenticator> = Arc::new(JwtAuthenticator::new(&settings.jwt));

        let (store, moderation, directory): (
            Arc<dyn MessageStore>,
            Arc<dyn ModerationPolicy>,
            Arc<dyn ChannelDirectory>,
        ) = if settings.database.url.is_some() {
            let pool = PostgresPool::new(&settings.database).await?;
            tracing::info!(url = %pool.database_url_masked(), "Using PostgreSQL store");
            let store = Arc::new(PostgresStore::new(pool));
            (store.clone(), store.clone(), store)
        } else {
            tracing::warn!("No database configured, using in-memory store");
            let store = Arc::new(MemoryStore::open());
            (store.clone(), store.clone(), store)
        };

        let bus: Arc<dyn PubSubBus> = if settings.redis.enabled {
            let bus = RedisBus::connect(&settings.redis.url)
                .await?
                .with_subscription_buffer(settings.redis.subscription_buffer);
            Arc::new(bus)
        } else {
            tracing::info!("Redis disabled, relay runs in-process only");
            Arc::new(MemoryBus::with_buffer(settings.redis.subscription_buffer))
        };

        Self::new(
            settings,
            Collaborators {
                authenticator,
                store,
                moderation,
                directory,
                bus,
            },
        )
    }
}
