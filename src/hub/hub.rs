use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use super::envelope::{Envelope, Origin};
use super::types::{ClientHandle, CloseReason, ConnectionId, EnqueueError, OutboundMessage};
use crate::metrics::HubMetrics;
use crate::relay::{Relay, RelayPublisher, RelaySubscription};
use crate::store::ModerationPolicy;
use crate::websocket::{ErrorCode, PresenceAction, ServerMessage};

const PUBLISH_FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum HubError {
    #[error("user is banned from this channel")]
    Banned,

    #[error("channel is full")]
    ChannelFull,

    #[error("connection closed before it was admitted")]
    Cancelled,

    #[error("hub is not running")]
    Closed,
}

impl HubError {
    pub fn close_reason(&self) -> CloseReason {
        match self {
            HubError::Banned => CloseReason::Banned,
            HubError::ChannelFull => CloseReason::ChannelFull,
            HubError::Cancelled => CloseReason::TransportError,
            HubError::Closed => CloseReason::HubUnavailable,
        }
    }

    pub fn error_code(&self) -> ErrorCode {
        match self {
            HubError::Banned => ErrorCode::Banned,
            HubError::ChannelFull => ErrorCode::ChannelFull,
            HubError::Cancelled | HubError::Closed => ErrorCode::Unavailable,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Capacity of each inbound request channel
    pub queue_capacity: usize,
    /// Local membership cap; `None` is unlimited
    pub max_members: Option<usize>,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            max_members: None,
        }
    }
}

struct RegisterRequest {
    client: Arc<ClientHandle>,
    reply: oneshot::Sender<Result<(), HubError>>,
}

struct UnregisterRequest {
    id: ConnectionId,
    reason: CloseReason,
}

/// Cheap, cloneable access to a running hub
#[derive(Clone)]
pub struct HubHandle {
    channel_id: Arc<str>,
    register_tx: mpsc::Sender<RegisterRequest>,
    unregister_tx: mpsc::Sender<UnregisterRequest>,
    broadcast_tx: mpsc::Sender<Envelope>,
    shutdown_tx: mpsc::Sender<oneshot::Sender<usize>>,
    moderation: Option<Arc<dyn ModerationPolicy>>,
    client_count: Arc<AtomicUsize>,
}

impl HubHandle {
    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    /// Admit a client.
    ///
    /// Bans are checked here, in the caller's task, so the control loop
    /// never waits on the moderation backend. Backend errors admit the client.
    pub async fn register(&self, client: Arc<ClientHandle>) -> Result<(), HubError> {
        if let Some(moderation) = &self.moderation {
            match moderation.is_banned(&self.channel_id, &client.user_id).await {
                Ok(true) => return Err(HubError::Banned),
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(
                        channel_id = %self.channel_id,
                        user_id = %client.user_id,
                        error = %e,
                        "Ban check failed, admitting connection"
                    );
                }
            }
        }

        let (reply, rx) = oneshot::channel();
        self.register_tx
            .send(RegisterRequest { client, reply })
            .await
            .map_err(|_| HubError::Closed)?;

        rx.await.map_err(|_| HubError::Closed)?
    }

    /// Remove a client. Safe to call any number of times.
    pub async fn unregister(&self, id: ConnectionId, reason: CloseReason) {
        let _ = self
            .unregister_tx
            .send(UnregisterRequest { id, reason })
            .await;
    }

    /// Fan an envelope out to every client except its sender.
    pub async fn broadcast(&self, envelope: Envelope) -> Result<(), HubError> {
        self.broadcast_tx
            .send(envelope)
            .await
            .map_err(|_| HubError::Closed)
    }

    /// Close every client with [`CloseReason::ServerShutdown`] and stop the hub.
    /// Returns the number of clients signalled.
    pub async fn shutdown(&self) -> Result<usize, HubError> {
        let (reply, rx) = oneshot::channel();
        self.shutdown_tx
            .send(reply)
            .await
            .map_err(|_| HubError::Closed)?;
        rx.await.map_err(|_| HubError::Closed)
    }

    /// Registered clients, as last published by the control loop
    pub fn client_count(&self) -> usize {
        self.client_count.load(Ordering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        !self.register_tx.is_closed()
    }
}

/// Control loop state for one channel
pub struct Hub {
    channel_id: String,
    config: HubConfig,
    clients: HashMap<ConnectionId, Arc<ClientHandle>>,
    client_count: Arc<AtomicUsize>,
    relay: Option<Relay>,
    publisher: Option<RelayPublisher>,
    subscription: Option<RelaySubscription>,
    /// Where relay frames are injected; weak so the hub still stops once
    /// every handle is dropped
    inject: mpsc::WeakSender<Envelope>,
    register_rx: mpsc::Receiver<RegisterRequest>,
    unregister_rx: mpsc::Receiver<UnregisterRequest>,
    broadcast_rx: mpsc::Receiver<Envelope>,
    shutdown_rx: mpsc::Receiver<oneshot::Sender<usize>>,
}

impl Hub {
    /// Start the control loop for `channel_id` and return its handle.
    pub fn spawn(
        channel_id: impl Into<String>,
        config: HubConfig,
        relay: Option<Relay>,
        moderation: Option<Arc<dyn ModerationPolicy>>,
    ) -> HubHandle {
        let channel_id = channel_id.into();
        let capacity = config.queue_capacity.max(1);

        let (register_tx, register_rx) = mpsc::channel(capacity);
        let (unregister_tx, unregister_rx) = mpsc::channel(capacity);
        let (broadcast_tx, broadcast_rx) = mpsc::channel(capacity);
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let client_count = Arc::new(AtomicUsize::new(0));

        let hub = Hub {
            publisher: relay.as_ref().map(|r| r.publisher(&channel_id)),
            channel_id: channel_id.clone(),
            config,
            clients: HashMap::new(),
            client_count: client_count.clone(),
            relay,
            subscription: None,
            inject: broadcast_tx.downgrade(),
            register_rx,
            unregister_rx,
            broadcast_rx,
            shutdown_rx,
        };

        tokio::spawn(hub.run());

        HubHandle {
            channel_id: Arc::from(channel_id),
            register_tx,
            unregister_tx,
            broadcast_tx,
            shutdown_tx,
            moderation,
            client_count,
        }
    }

    async fn run(mut self) {
        HubMetrics::record_started();
        tracing::info!(channel_id = %self.channel_id, "Hub started");

        loop {
            tokio::select! {
                Some(request) = self.register_rx.recv() => self.handle_register(request),
                Some(request) = self.unregister_rx.recv() => {
                    self.handle_unregister(request.id, request.reason);
                }
                Some(envelope) = self.broadcast_rx.recv() => self.fan_out(envelope),
                Some(reply) = self.shutdown_rx.recv() => {
                    let signalled = self.handle_shutdown();
                    let _ = reply.send(signalled);
                    break;
                }
                else => break,
            }
        }

        self.stop().await;
    }

    fn handle_register(&mut self, request: RegisterRequest) {
        let RegisterRequest { client, reply } = request;

        if let Some(max) = self.config.max_members {
            if self.clients.len() >= max {
                tracing::info!(
                    channel_id = %self.channel_id,
                    user_id = %client.user_id,
                    max_members = max,
                    "Channel full, rejecting connection"
                );
                let _ = reply.send(Err(HubError::ChannelFull));
                return;
            }
        }

        if !client.mark_active() {
            let _ = reply.send(Err(HubError::Cancelled));
            return;
        }

        if reply.send(Ok(())).is_err() {
            // Registering task is gone; nobody will run this client's pumps
            client.begin_close(CloseReason::TransportError);
            return;
        }

        self.clients.insert(client.id, client.clone());
        self.sync_count();
        if self.clients.len() == 1 {
            self.subscribe_relay();
        }

        tracing::info!(
            channel_id = %self.channel_id,
            connection_id = %client.id,
            user_id = %client.user_id,
            members = self.clients.len(),
            "Client registered"
        );

        self.fan_out(self.presence(&client, PresenceAction::Joined));
    }

    fn handle_unregister(&mut self, id: ConnectionId, reason: CloseReason) {
        let Some(client) = self.clients.remove(&id) else {
            return;
        };
        client.begin_close(reason);
        self.sync_count();

        tracing::info!(
            channel_id = %self.channel_id,
            connection_id = %id,
            user_id = %client.user_id,
            reason = %reason,
            members = self.clients.len(),
            "Client unregistered"
        );

        self.fan_out(self.presence(&client, PresenceAction::Left));
    }

    /// Deliver `first` and any presence events it causes.
    ///
    /// Clients whose queue is full are dropped and announced as left.
    fn fan_out(&mut self, first: Envelope) {
        let mut pending = VecDeque::from([first]);

        while let Some(envelope) = pending.pop_front() {
            if envelope.origin == Origin::Local {
                if let Some(publisher) = &self.publisher {
                    publisher.publish(&envelope);
                }
            }

            let json: Arc<str> = match envelope.payload.to_json() {
                Ok(json) => Arc::from(json),
                Err(e) => {
                    tracing::error!(channel_id = %self.channel_id, error = %e, "Failed to serialize envelope");
                    continue;
                }
            };

            let mut delivered = 0u64;
            let mut slow = Vec::new();

            for (id, client) in &self.clients {
                if envelope.sender_connection == Some(*id) {
                    continue;
                }
                match client.try_enqueue(OutboundMessage::Shared(json.clone())) {
                    Ok(()) => delivered += 1,
                    Err(EnqueueError::Full) => slow.push(*id),
                    // Pump already gone; its unregister request is queued
                    Err(EnqueueError::Closed) => {}
                }
            }

            HubMetrics::record_broadcast(
                envelope.kind().as_str(),
                envelope.origin.as_str(),
                delivered,
            );

            for id in slow {
                let Some(client) = self.clients.remove(&id) else {
                    continue;
                };
                client.begin_close(CloseReason::SlowConsumer);
                HubMetrics::record_slow_consumer();
                tracing::warn!(
                    channel_id = %self.channel_id,
                    connection_id = %id,
                    user_id = %client.user_id,
                    "Outbound queue full, disconnecting slow consumer"
                );
                pending.push_back(self.presence(&client, PresenceAction::Left));
            }
        }

        self.sync_count();
        if self.clients.is_empty() && self.subscription.take().is_some() {
            tracing::debug!(channel_id = %self.channel_id, "Last local client left, relay subscription released");
        }
    }

    fn handle_shutdown(&mut self) -> usize {
        let signalled = self.clients.len();

        for (_, client) in self.clients.drain() {
            client.begin_close(CloseReason::ServerShutdown);
            if let Some(publisher) = &self.publisher {
                let left = Envelope::local(
                    self.channel_id.clone(),
                    Some((client.id, &client.user_id)),
                    ServerMessage::presence(&client.user_id, &client.username, PresenceAction::Left),
                );
                publisher.publish(&left);
            }
        }
        self.sync_count();

        tracing::info!(channel_id = %self.channel_id, clients = signalled, "Hub shutting down");
        signalled
    }

    async fn stop(mut self) {
        self.register_rx.close();
        self.unregister_rx.close();
        self.broadcast_rx.close();
        self.shutdown_rx.close();

        self.subscription = None;
        if let Some(publisher) = self.publisher.take() {
            if tokio::time::timeout(PUBLISH_FLUSH_TIMEOUT, publisher.flush())
                .await
                .is_err()
            {
                tracing::warn!(channel_id = %self.channel_id, "Timed out flushing relay publishes");
            }
        }

        HubMetrics::record_stopped();
        tracing::info!(channel_id = %self.channel_id, "Hub stopped");
    }

    fn subscribe_relay(&mut self) {
        if self.subscription.is_some() {
            return;
        }
        if let Some(relay) = &self.relay {
            self.subscription = Some(relay.subscribe(&self.channel_id, self.inject.clone()));
            tracing::debug!(channel_id = %self.channel_id, "Relay subscription opened");
        }
    }

    fn presence(&self, client: &ClientHandle, action: PresenceAction) -> Envelope {
        Envelope::local(
            self.channel_id.clone(),
            Some((client.id, &client.user_id)),
            ServerMessage::presence(&client.user_id, &client.username, action),
        )
    }

    fn sync_count(&self) {
        self.client_count
            .store(self.clients.len(), Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Identity;
    use crate::hub::{ClientChannels, ConnectionState};
    use crate::relay::MemoryBus;
    use crate::store::MemoryStore;
    use tokio_test::{assert_err, assert_ok};

    fn client(user: &str, capacity: usize) -> (Arc<ClientHandle>, ClientChannels) {
        ClientHandle::new(&Identity::new(user, user), "general", capacity)
    }

    fn drain(channels: &mut ClientChannels) -> Vec<serde_json::Value> {
        let mut out = Vec::new();
        while let Ok(msg) = channels.outbound.try_recv() {
            out.push(serde_json::from_str(&msg.to_json().unwrap()).unwrap());
        }
        out
    }

    /// Let the control loop apply queued requests
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn test_register_announces_presence_to_others_only() {
        let hub = Hub::spawn("general", HubConfig::default(), None, None);
        let (x, mut x_rx) = client("x", 8);
        let (y, mut y_rx) = client("y", 8);

        assert_ok!(hub.register(x.clone()).await);
        assert_ok!(hub.register(y.clone()).await);
        assert_eq!(x.state(), ConnectionState::Active);

        settle().await;
        let x_msgs = drain(&mut x_rx);
        assert_eq!(x_msgs[0]["type"], "presence");
        assert_eq!(x_msgs[0]["data"]["user_id"], "y");
        assert_eq!(x_msgs[0]["data"]["action"], "joined");

        // y never sees its own join
        assert!(drain(&mut y_rx)
            .iter()
            .all(|m| m["type"] != "presence" || m["data"]["user_id"] != "y"));
        assert_eq!(hub.client_count(), 2);
    }

    #[tokio::test]
    async fn test_unregister_is_idempotent() {
        let hub = Hub::spawn("general", HubConfig::default(), None, None);
        let (x, mut x_rx) = client("x", 8);
        let (y, _y_rx) = client("y", 8);
        hub.register(x.clone()).await.unwrap();
        hub.register(y.clone()).await.unwrap();
        settle().await;
        drain(&mut x_rx);

        hub.unregister(y.id, CloseReason::Normal).await;
        hub.unregister(y.id, CloseReason::TransportError).await;
        settle().await;

        let lefts: Vec<_> = drain(&mut x_rx)
            .into_iter()
            .filter(|m| m["type"] == "presence" && m["data"]["action"] == "left")
            .collect();
        assert_eq!(lefts.len(), 1);
        assert_eq!(y.close_reason(), Some(CloseReason::Normal));
        assert_eq!(hub.client_count(), 1);
    }

    #[tokio::test]
    async fn test_channel_cap_is_enforced() {
        let config = HubConfig {
            max_members: Some(1),
            ..Default::default()
        };
        let hub = Hub::spawn("general", config, None, None);
        let (x, _x_rx) = client("x", 8);
        let (y, _y_rx) = client("y", 8);

        assert_ok!(hub.register(x).await);
        assert_eq!(hub.register(y).await, Err(HubError::ChannelFull));
    }

    #[tokio::test]
    async fn test_banned_user_is_rejected_before_the_loop() {
        let store = Arc::new(MemoryStore::new());
        store.ban("general", "troll", None);
        let hub = Hub::spawn(
            "general",
            HubConfig::default(),
            None,
            Some(store as Arc<dyn ModerationPolicy>),
        );

        let (troll, _rx) = client("troll", 8);
        assert_eq!(hub.register(troll.clone()).await, Err(HubError::Banned));
        assert_eq!(troll.state(), ConnectionState::Connecting);
        assert_eq!(hub.client_count(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_signals_every_client() {
        let hub = Hub::spawn("general", HubConfig::default(), None, None);
        let mut channels = Vec::new();
        for user in ["a", "b", "c"] {
            let (c, rx) = client(user, 8);
            hub.register(c.clone()).await.unwrap();
            channels.push((c, rx));
        }

        assert_eq!(hub.shutdown().await, Ok(3));
        for (c, rx) in &channels {
            assert_eq!(c.close_reason(), Some(CloseReason::ServerShutdown));
            assert_eq!(*rx.close.borrow(), Some(CloseReason::ServerShutdown));
        }

        let (late, _rx) = client("late", 8);
        assert_err!(hub.register(late).await);
        assert!(!hub.is_running());
    }

    #[tokio::test]
    async fn test_hub_stops_when_handles_are_dropped() {
        let bus = Arc::new(MemoryBus::new());
        let relay = Relay::new(bus.clone(), "server-a", "chat");
        let hub = Hub::spawn("general", HubConfig::default(), Some(relay), None);

        let (x, _rx) = client("x", 8);
        hub.register(x).await.unwrap();
        wait_for(|| bus.subscriber_count("chat:general") == 1).await;

        drop(hub);
        wait_for(|| bus.subscriber_count("chat:general") == 0).await;
    }

    #[tokio::test]
    async fn test_relay_subscription_follows_membership() {
        let bus = Arc::new(MemoryBus::new());
        let relay = Relay::new(bus.clone(), "server-a", "chat");
        let hub = Hub::spawn("general", HubConfig::default(), Some(relay), None);

        let (x, _rx) = client("x", 8);
        hub.register(x.clone()).await.unwrap();
        wait_for(|| bus.subscriber_count("chat:general") == 1).await;

        hub.unregister(x.id, CloseReason::Normal).await;
        wait_for(|| bus.subscriber_count("chat:general") == 0).await;
        assert!(hub.is_running());
    }

    async fn wait_for(mut condition: impl FnMut() -> bool) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }
}
