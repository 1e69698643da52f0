use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::metrics::RelayMetrics;

/// Payloads delivered on one topic, in bus order
pub type BusSubscription = BoxStream<'static, String>;

/// Frames buffered per subscription when none is configured
pub const DEFAULT_SUBSCRIPTION_BUFFER: usize = 256;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Relay frame encoding error: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Relay bus closed")]
    Closed,
}

/// Generic topic-based publish/subscribe primitive.
///
/// Implementations may deliver a publisher's own messages back to its
/// subscriptions; the relay filters those by origin.
#[async_trait]
pub trait PubSubBus: Send + Sync + 'static {
    async fn publish(&self, topic: &str, payload: String) -> Result<(), RelayError>;

    async fn subscribe(&self, topic: &str) -> Result<BusSubscription, RelayError>;

    /// Backend name for logs
    fn name(&self) -> &'static str;
}

/// Hand `payload` to a subscription without waiting.
///
/// A full buffer drops the frame; returns false once the subscription is gone.
pub(crate) fn offer(tx: &mpsc::Sender<String>, topic: &str, payload: String) -> bool {
    match tx.try_send(payload) {
        Ok(()) => true,
        Err(mpsc::error::TrySendError::Full(_)) => {
            RelayMetrics::record_inbound_dropped();
            tracing::warn!(topic = %topic, "Relay subscriber lagging, dropping frame");
            true
        }
        Err(mpsc::error::TrySendError::Closed(_)) => false,
    }
}

pub(crate) fn receiver_stream(rx: mpsc::Receiver<String>) -> BusSubscription {
    futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|payload| (payload, rx))
    })
    .boxed()
}
