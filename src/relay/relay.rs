use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::backoff::{Backoff, BackoffConfig};
use super::bus::{PubSubBus, RelayError};
use super::frame::RelayFrame;
use crate::hub::Envelope;
use crate::metrics::RelayMetrics;

const PUBLISH_QUEUE_CAPACITY: usize = 256;

/// Bridges hubs to a [`PubSubBus`].
#[derive(Clone)]
pub struct Relay {
    bus: Arc<dyn PubSubBus>,
    server_id: Arc<str>,
    topic_prefix: Arc<str>,
    backoff: BackoffConfig,
}

impl Relay {
    pub fn new(bus: Arc<dyn PubSubBus>, server_id: impl Into<String>, topic_prefix: &str) -> Self {
        Self {
            bus,
            server_id: Arc::from(server_id.into()),
            topic_prefix: Arc::from(topic_prefix),
            backoff: BackoffConfig::default(),
        }
    }

    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    pub fn bus_name(&self) -> &'static str {
        self.bus.name()
    }

    pub fn topic(&self, channel_id: &str) -> String {
        format!("{}:{}", self.topic_prefix, channel_id)
    }

    /// Publish one locally produced envelope.
    ///
    /// Relay-tagged envelopes are refused so a frame never bounces back onto the bus.
    pub async fn publish(&self, envelope: &Envelope) -> Result<(), RelayError> {
        if envelope.is_from_relay() {
            return Ok(());
        }

        let payload = RelayFrame::from_envelope(&self.server_id, envelope).encode()?;
        self.bus
            .publish(&self.topic(&envelope.channel_id), payload)
            .await
    }

    /// Ordered, fire-and-forget publisher for one channel.
    pub fn publisher(&self, channel_id: &str) -> RelayPublisher {
        let (tx, mut rx) = mpsc::channel::<Envelope>(PUBLISH_QUEUE_CAPACITY);
        let relay = self.clone();
        let channel_id = channel_id.to_string();

        let task = tokio::spawn(async move {
            while let Some(envelope) = rx.recv().await {
                match relay.publish(&envelope).await {
                    Ok(()) => RelayMetrics::record_published(),
                    Err(e) => {
                        RelayMetrics::record_publish_failed();
                        tracing::warn!(
                            channel_id = %channel_id,
                            bus = relay.bus_name(),
                            error = %e,
                            "Relay publish failed"
                        );
                    }
                }
            }
        });

        RelayPublisher { tx, task }
    }

    /// Subscribe to `channel_id` and push frames from other instances into `sink`.
    ///
    /// The sink is held weakly so the subscription never keeps a hub alive.
    /// Dropping the returned handle unsubscribes.
    pub fn subscribe(&self, channel_id: &str, sink: mpsc::WeakSender<Envelope>) -> RelaySubscription {
        let relay = self.clone();
        let channel_id = channel_id.to_string();

        let task = tokio::spawn(async move {
            relay.forward(channel_id, sink).await;
        });

        RelayMetrics::record_subscribed();
        RelaySubscription { task }
    }

    async fn forward(&self, channel_id: String, sink: mpsc::WeakSender<Envelope>) {
        let topic = self.topic(&channel_id);
        let mut backoff = Backoff::new(self.backoff.clone());

        loop {
            match self.bus.subscribe(&topic).await {
                Ok(mut stream) => {
                    backoff.reset();
                    tracing::debug!(channel_id = %channel_id, topic = %topic, "Relay subscribed");

                    while let Some(raw) = stream.next().await {
                        let frame = match RelayFrame::decode(&raw) {
                            Ok(frame) => frame,
                            Err(e) => {
                                tracing::warn!(topic = %topic, error = %e, "Dropping undecodable relay frame");
                                continue;
                            }
                        };

                        // Buses echo our own publishes back to us
                        if frame.origin == *self.server_id || frame.channel_id != channel_id {
                            continue;
                        }

                        let Some(hub) = sink.upgrade() else {
                            return;
                        };
                        RelayMetrics::record_received();
                        if hub.send(frame.into_envelope()).await.is_err() {
                            return;
                        }
                    }

                    tracing::warn!(topic = %topic, "Relay stream ended, resubscribing");
                }
                Err(e) => {
                    tracing::warn!(
                        topic = %topic,
                        bus = self.bus_name(),
                        error = %e,
                        "Relay subscribe failed"
                    );
                }
            }

            if sink.upgrade().is_none() {
                return;
            }
            tokio::time::sleep(backoff.next_delay()).await;
        }
    }
}

/// Per-hub publish queue drained by one task, preserving hub order.
pub struct RelayPublisher {
    tx: mpsc::Sender<Envelope>,
    task: JoinHandle<()>,
}

impl RelayPublisher {
    /// Queue an envelope without waiting; drops it when the queue is full.
    pub fn publish(&self, envelope: &Envelope) {
        if envelope.is_from_relay() {
            return;
        }

        if let Err(e) = self.tx.try_send(envelope.clone()) {
            RelayMetrics::record_publish_failed();
            tracing::warn!(
                channel_id = %envelope.channel_id,
                error = %e,
                "Relay publish queue rejected envelope"
            );
        }
    }

    /// Stop accepting envelopes and wait for queued ones to be published.
    pub async fn flush(self) {
        let RelayPublisher { tx, task } = self;
        drop(tx);
        let _ = task.await;
    }
}

/// Live subscription; unsubscribes on drop.
pub struct RelaySubscription {
    task: JoinHandle<()>,
}

impl Drop for RelaySubscription {
    fn drop(&mut self) {
        self.task.abort();
        RelayMetrics::record_unsubscribed();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::Origin;
    use crate::relay::MemoryBus;
    use crate::websocket::{PresenceAction, ServerMessage};
    use std::time::Duration;

    fn presence(channel: &str) -> Envelope {
        Envelope::local(
            channel,
            None,
            ServerMessage::presence("u1", "alice", PresenceAction::Joined),
        )
    }

    async fn wait_for_subscribers(bus: &MemoryBus, topic: &str, n: usize) {
        for _ in 0..100 {
            if bus.subscriber_count(topic) >= n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("subscription on {} never became ready", topic);
    }

    #[tokio::test]
    async fn test_remote_frames_are_injected_as_relay_envelopes() {
        let bus = Arc::new(MemoryBus::new());
        let a = Relay::new(bus.clone(), "server-a", "chat");
        let b = Relay::new(bus.clone(), "server-b", "chat");

        let (tx, mut rx) = mpsc::channel(8);
        let _sub = b.subscribe("general", tx.downgrade());
        wait_for_subscribers(&bus, "chat:general", 1).await;

        a.publish(&presence("general")).await.unwrap();

        let received = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received.origin, Origin::Relay);
        assert_eq!(received.channel_id, "general");
    }

    #[tokio::test]
    async fn test_own_frames_are_filtered() {
        let bus = Arc::new(MemoryBus::new());
        let a = Relay::new(bus.clone(), "server-a", "chat");

        let (tx, mut rx) = mpsc::channel(8);
        let _sub = a.subscribe("general", tx.downgrade());
        wait_for_subscribers(&bus, "chat:general", 1).await;

        a.publish(&presence("general")).await.unwrap();

        let echoed = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await;
        assert!(echoed.is_err(), "own frame must not be injected");
    }

    #[tokio::test]
    async fn test_relay_envelopes_are_never_published() {
        let bus = Arc::new(MemoryBus::new());
        let a = Relay::new(bus.clone(), "server-a", "chat");
        let mut probe = bus.subscribe("chat:general").await.unwrap();

        let mut envelope = presence("general");
        envelope.origin = Origin::Relay;
        a.publish(&envelope).await.unwrap();

        let got = tokio::time::timeout(Duration::from_millis(100), probe.next()).await;
        assert!(got.is_err());
    }

    #[tokio::test]
    async fn test_dropping_subscription_unsubscribes() {
        let bus = Arc::new(MemoryBus::new());
        let a = Relay::new(bus.clone(), "server-a", "chat");

        let (tx, _rx) = mpsc::channel(8);
        let sub = a.subscribe("general", tx.downgrade());
        wait_for_subscribers(&bus, "chat:general", 1).await;

        drop(sub);
        for _ in 0..100 {
            if bus.subscriber_count("chat:general") == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("subscription was not released");
    }

    #[tokio::test]
    async fn test_publisher_preserves_order() {
        let bus = Arc::new(MemoryBus::new());
        let a = Relay::new(bus.clone(), "server-a", "chat");
        let mut probe = bus.subscribe("chat:general").await.unwrap();

        let publisher = a.publisher("general");
        for action in [PresenceAction::Joined, PresenceAction::Left] {
            publisher.publish(&Envelope::local(
                "general",
                None,
                ServerMessage::presence("u1", "alice", action),
            ));
        }
        publisher.flush().await;

        for expected in [PresenceAction::Joined, PresenceAction::Left] {
            let raw = probe.next().await.unwrap();
            let frame = RelayFrame::decode(&raw).unwrap();
            assert_eq!(frame.payload, ServerMessage::presence("u1", "alice", expected));
        }
    }
}
