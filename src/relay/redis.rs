//! Redis pub/sub bus

use async_trait::async_trait;
use futures::StreamExt;
use redis::aio::{ConnectionManager, PubSub};
use redis::AsyncCommands;
use tokio::sync::mpsc;

use super::backoff::{Backoff, BackoffConfig};
use super::bus::{
    offer, receiver_stream, BusSubscription, PubSubBus, RelayError, DEFAULT_SUBSCRIPTION_BUFFER,
};

/// Publishes through a shared [`ConnectionManager`]; every subscription owns
/// a dedicated pub/sub connection that is re-established with backoff.
pub struct RedisBus {
    client: redis::Client,
    publisher: ConnectionManager,
    backoff: BackoffConfig,
    buffer: usize,
}

impl RedisBus {
    pub async fn connect(url: &str) -> Result<Self, RelayError> {
        let client = redis::Client::open(url)?;
        let publisher = ConnectionManager::new(client.clone()).await?;

        tracing::info!("Redis relay bus connected");

        Ok(Self {
            client,
            publisher,
            backoff: BackoffConfig::default(),
            buffer: DEFAULT_SUBSCRIPTION_BUFFER,
        })
    }

    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    /// Frames held per subscription before new ones are dropped
    pub fn with_subscription_buffer(mut self, buffer: usize) -> Self {
        self.buffer = buffer.max(1);
        self
    }
}

#[async_trait]
impl PubSubBus for RedisBus {
    async fn publish(&self, topic: &str, payload: String) -> Result<(), RelayError> {
        let mut conn = self.publisher.clone();
        conn.publish::<_, _, ()>(topic, payload).await?;
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<BusSubscription, RelayError> {
        // First connection inline so the caller sees connect errors
        let pubsub = open_pubsub(&self.client, topic).await?;

        let (tx, rx) = mpsc::channel(self.buffer);
        tokio::spawn(pump_topic(
            self.client.clone(),
            topic.to_string(),
            pubsub,
            tx,
            Backoff::new(self.backoff.clone()),
        ));

        Ok(receiver_stream(rx))
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}

async fn open_pubsub(client: &redis::Client, topic: &str) -> Result<PubSub, RelayError> {
    let mut pubsub = client.get_async_pubsub().await?;
    pubsub.subscribe(topic).await?;
    tracing::debug!(topic = %topic, "Subscribed to Redis topic");
    Ok(pubsub)
}

/// Forward payloads until the receiving side is dropped, reconnecting as needed.
async fn pump_topic(
    client: redis::Client,
    topic: String,
    mut pubsub: PubSub,
    tx: mpsc::Sender<String>,
    mut backoff: Backoff,
) {
    loop {
        let mut messages = pubsub.into_on_message();

        loop {
            tokio::select! {
                _ = tx.closed() => return,
                msg = messages.next() => {
                    let Some(msg) = msg else { break };
                    match msg.get_payload::<String>() {
                        Ok(payload) => {
                            if !offer(&tx, &topic, payload) {
                                return;
                            }
                        }
                        Err(e) => {
                            tracing::warn!(topic = %topic, error = %e, "Failed to read Redis payload");
                        }
                    }
                }
            }
        }

        tracing::warn!(topic = %topic, "Redis subscription dropped, reconnecting");

        pubsub = loop {
            let delay = backoff.next_delay();
            tokio::select! {
                _ = tx.closed() => return,
                _ = tokio::time::sleep(delay) => {}
            }

            match open_pubsub(&client, &topic).await {
                Ok(p) => {
                    tracing::info!(topic = %topic, attempts = backoff.attempt(), "Redis subscription restored");
                    backoff.reset();
                    break p;
                }
                Err(e) => {
                    tracing::warn!(
                        topic = %topic,
                        attempt = backoff.attempt(),
                        error = %e,
                        "Redis resubscribe failed"
                    );
                }
            }
        };
    }
}
