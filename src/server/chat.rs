use std::collections::HashMap;
use std::fmt::Display;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{CloseFrame, Message};
use dashmap::DashMap;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::{Sink, SinkExt, Stream};
use serde::Serialize;
use uuid::Uuid;

use crate::auth::Identity;
use crate::hub::{CloseReason, Hub, HubConfig, HubHandle};
use crate::relay::Relay;
use crate::shutdown::ShutdownResult;
use crate::store::ChannelInfo;
use crate::websocket::{Client, ClientContext, ConnectionOutcome};

const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Serialize)]
pub struct ServerStats {
    pub total_connections: usize,
    pub active_channels: usize,
    /// Channel id -> locally registered clients
    pub channel_stats: HashMap<String, usize>,
}

/// Owns the hub directory for this instance.
pub struct ChatServer {
    hubs: DashMap<String, HubHandle>,
    relay: Option<Relay>,
    client_ctx: Arc<ClientContext>,
    hub_queue_capacity: usize,
    accepting: AtomicBool,
    active: Arc<AtomicUsize>,
}

/// Counts a running connection until dropped
struct ConnectionGuard(Arc<AtomicUsize>);

impl ConnectionGuard {
    fn new(active: &Arc<AtomicUsize>) -> Self {
        active.fetch_add(1, Ordering::SeqCst);
        Self(active.clone())
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ChatServer {
    pub fn new(client_ctx: Arc<ClientContext>, relay: Option<Relay>, hub_queue_capacity: usize) -> Self {
        Self {
            hubs: DashMap::new(),
            relay,
            client_ctx,
            hub_queue_capacity,
            accepting: AtomicBool::new(true),
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// False once shutdown has begun
    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    pub fn relay(&self) -> Option<&Relay> {
        self.relay.as_ref()
    }

    /// Connections currently inside [`ChatServer::connect`]
    pub fn active_connections(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Running hub for a channel, started on first use.
    ///
    /// A hub whose loop has already stopped is replaced. Returns `None` once
    /// shutdown has begun.
    pub async fn hub(&self, channel: &ChannelInfo) -> Option<HubHandle> {
        if !self.is_accepting() {
            return None;
        }

        let hub = {
            let mut entry = self
                .hubs
                .entry(channel.id.clone())
                .or_insert_with(|| self.spawn_hub(channel));

            if !entry.is_running() {
                *entry = self.spawn_hub(channel);
            }
            entry.clone()
        };

        // Shutdown may have cleared the directory before this insert landed
        if !self.is_accepting() {
            if let Some((_, stale)) = self.hubs.remove(&channel.id) {
                let _ = stale.shutdown().await;
            }
            let _ = hub.shutdown().await;
            return None;
        }

        Some(hub)
    }

    fn spawn_hub(&self, channel: &ChannelInfo) -> HubHandle {
        let config = HubConfig {
            queue_capacity: self.hub_queue_capacity,
            max_members: channel.max_members.map(|max| max as usize),
        };
        Hub::spawn(
            channel.id.clone(),
            config,
            self.relay.clone(),
            Some(self.client_ctx.moderation.clone()),
        )
    }

    /// Run one upgraded connection in `channel` until it closes.
    #[tracing::instrument(
        name = "chat_connection",
        skip_all,
        fields(user_id = %identity.user_id, channel_id = %channel.id)
    )]
    pub async fn connect<S, R, E>(
        &self,
        identity: Identity,
        channel: &ChannelInfo,
        sink: S,
        stream: R,
    ) -> ConnectionOutcome
    where
        S: Sink<Message> + Unpin + Send + 'static,
        S::Error: Display + Send,
        R: Stream<Item = Result<Message, E>> + Unpin + Send + 'static,
        E: Display + Send + 'static,
    {
        let _guard = ConnectionGuard::new(&self.active);
        let Some(hub) = self.hub(channel).await else {
            return refuse_shutting_down(sink).await;
        };

        Client::new(&identity, hub, self.client_ctx.clone())
            .start(sink, stream)
            .await
    }

    pub fn stats(&self) -> ServerStats {
        let channel_stats: HashMap<String, usize> = self
            .hubs
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().client_count()))
            .collect();

        ServerStats {
            total_connections: self.active_connections(),
            active_channels: channel_stats.len(),
            channel_stats,
        }
    }

    /// Stop and forget hubs with no registered clients.
    ///
    /// A connection that picked up a hub just before it was reaped is
    /// refused with [`CloseReason::HubUnavailable`] and reconnects.
    pub async fn reap_idle_hubs(&self) -> usize {
        let candidates: Vec<String> = self
            .hubs
            .iter()
            .filter(|entry| entry.value().client_count() == 0 || !entry.value().is_running())
            .map(|entry| entry.key().clone())
            .collect();

        let mut reaped = 0;
        for channel_id in candidates {
            let removed = self.hubs.remove_if(&channel_id, |_, hub| {
                hub.client_count() == 0 || !hub.is_running()
            });

            if let Some((_, hub)) = removed {
                let _ = hub.shutdown().await;
                reaped += 1;
            }
        }

        if reaped > 0 {
            tracing::debug!(reaped, remaining = self.hubs.len(), "Reaped idle hubs");
        }
        reaped
    }

    /// Refuse new connections, shut down every hub, then wait up to `timeout`
    /// for running connections to finish.
    #[tracing::instrument(name = "chat_shutdown", skip(self))]
    pub async fn shutdown(&self, timeout: Duration) -> ShutdownResult {
        let start = Instant::now();
        self.accepting.store(false, Ordering::SeqCst);
        let before = self.active_connections();

        let hubs: Vec<HubHandle> = self.hubs.iter().map(|e| e.value().clone()).collect();
        self.hubs.clear();

        let mut pending: FuturesUnordered<_> = hubs
            .iter()
            .map(|hub| async move { hub.shutdown().await.unwrap_or(0) })
            .collect();

        let mut clients_signalled = 0;
        while let Some(signalled) = pending.next().await {
            clients_signalled += signalled;
        }

        tracing::info!(
            hubs = hubs.len(),
            clients_signalled,
            connections = before,
            "Hubs stopped, draining connections"
        );

        let drained = tokio::time::timeout(timeout, async {
            while self.active_connections() > 0 {
                tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
            }
        })
        .await
        .is_ok();

        let remaining = self.active_connections();
        if !drained {
            tracing::warn!(remaining, "Drain timeout reached, abandoning connections");
        }

        ShutdownResult {
            hubs_closed: hubs.len(),
            clients_signalled,
            connections_drained: before.saturating_sub(remaining),
            remaining,
            duration: start.elapsed(),
        }
    }
}

async fn refuse_shutting_down<S>(mut sink: S) -> ConnectionOutcome
where
    S: Sink<Message> + Unpin,
{
    let reason = CloseReason::ServerShutdown;
    let frame = CloseFrame {
        code: reason.code().unwrap_or(1001),
        reason: reason.as_str().into(),
    };
    let _ = sink.send(Message::Close(Some(frame))).await;
    let _ = sink.close().await;

    ConnectionOutcome {
        connection_id: Uuid::new_v4(),
        reason,
        registered: false,
        duration: Duration::ZERO,
    }
}
