use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::mpsc;

use super::bus::{
    offer, receiver_stream, BusSubscription, PubSubBus, RelayError, DEFAULT_SUBSCRIPTION_BUFFER,
};

/// In-process bus for single-instance deployments and tests.
///
/// Two relays sharing one `MemoryBus` behave like two instances sharing a
/// Redis server. Each subscription buffers at most `buffer` frames; a
/// subscriber that falls further behind loses the newest ones.
pub struct MemoryBus {
    topics: DashMap<String, Vec<mpsc::Sender<String>>>,
    buffer: usize,
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::with_buffer(DEFAULT_SUBSCRIPTION_BUFFER)
    }
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_buffer(buffer: usize) -> Self {
        Self {
            topics: DashMap::new(),
            buffer: buffer.max(1),
        }
    }

    /// Live subscriptions on `topic`
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics
            .get(topic)
            .map(|subs| subs.iter().filter(|tx| !tx.is_closed()).count())
            .unwrap_or(0)
    }
}

#[async_trait]
impl PubSubBus for MemoryBus {
    async fn publish(&self, topic: &str, payload: String) -> Result<(), RelayError> {
        if let Some(mut subs) = self.topics.get_mut(topic) {
            subs.retain(|tx| offer(tx, topic, payload.clone()));
        }
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<BusSubscription, RelayError> {
        let (tx, rx) = mpsc::channel(self.buffer);
        self.topics.entry(topic.to_string()).or_default().push(tx);
        Ok(receiver_stream(rx))
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
