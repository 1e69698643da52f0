//! One connection: registration, read pump, write pump and heartbeat.

use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message};
use chrono::Utc;
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use uuid::Uuid;

use super::message::{
    decode_client_message, ChatMessageData, ClientMessage, ErrorCode, FrameLimits, ServerMessage,
};
use crate::auth::Identity;
use crate::config::WebSocketConfig;
use crate::hub::{ClientHandle, CloseReason, ConnectionId, Envelope, HubHandle, OutboundMessage};
use crate::metrics::{ConnectionMetrics, GuardMetrics};
use crate::ratelimit::{RateLimitResult, RateLimiter, SpamGuard};
use crate::store::{MessageStore, ModerationPolicy, StoredMessage};

/// Per-connection timing and limits
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub ping_interval: Duration,
    /// Read deadline, reset by every inbound frame
    pub pong_timeout: Duration,
    pub write_timeout: Duration,
    /// How long a closing connection may spend flushing its queue
    pub close_grace: Duration,
    pub queue_capacity: usize,
    pub limits: FrameLimits,
    pub check_bans_per_message: bool,
    /// Recent messages queued for a joining client
    pub history_limit: usize,
}

impl From<&WebSocketConfig> for ClientConfig {
    fn from(config: &WebSocketConfig) -> Self {
        Self {
            ping_interval: Duration::from_secs(config.ping_interval),
            pong_timeout: Duration::from_secs(config.pong_timeout),
            write_timeout: Duration::from_secs(config.write_timeout),
            close_grace: Duration::from_secs(config.close_grace_period),
            queue_capacity: config.outbound_queue_capacity,
            limits: FrameLimits {
                max_frame_bytes: config.max_frame_bytes,
                max_content_chars: config.max_content_chars,
            },
            check_bans_per_message: config.check_bans_per_message,
            history_limit: config.history_limit,
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::from(&WebSocketConfig::default())
    }
}

/// Services shared by every connection on the instance
pub struct ClientContext {
    pub config: ClientConfig,
    pub rate_limiter: Arc<RateLimiter>,
    pub spam_guard: Arc<SpamGuard>,
    pub store: Arc<dyn MessageStore>,
    pub moderation: Arc<dyn ModerationPolicy>,
}

/// How a connection ended
#[derive(Debug, Clone)]
pub struct ConnectionOutcome {
    pub connection_id: ConnectionId,
    pub reason: CloseReason,
    /// False when the hub refused the connection
    pub registered: bool,
    pub duration: Duration,
}

/// Bridges one socket to its channel's hub.
///
/// Generic over the socket halves so tests can drive it with in-memory channels.
pub struct Client {
    shared: Arc<Shared>,
    outbound: mpsc::Receiver<OutboundMessage>,
    close: watch::Receiver<Option<CloseReason>>,
}

struct Shared {
    handle: Arc<ClientHandle>,
    hub: HubHandle,
    ctx: Arc<ClientContext>,
}

enum Flow {
    Continue,
    Close(CloseReason),
}

impl Client {
    pub fn new(identity: &Identity, hub: HubHandle, ctx: Arc<ClientContext>) -> Self {
        let (handle, channels) =
            ClientHandle::new(identity, hub.channel_id(), ctx.config.queue_capacity);

        Self {
            shared: Arc::new(Shared { handle, hub, ctx }),
            outbound: channels.outbound,
            close: channels.close,
        }
    }

    pub fn handle(&self) -> &Arc<ClientHandle> {
        &self.shared.handle
    }

    /// Replay recent history, register with the hub, run both pumps, and
    /// return once the connection is closed.
    pub async fn start<S, R, E>(self, mut sink: S, stream: R) -> ConnectionOutcome
    where
        S: Sink<Message> + Unpin + Send + 'static,
        S::Error: Display + Send,
        R: Stream<Item = Result<Message, E>> + Unpin + Send + 'static,
        E: Display + Send + 'static,
    {
        let Client {
            shared,
            outbound,
            close,
        } = self;
        let handle = shared.handle.clone();
        let started = Instant::now();

        // Queued before registering so history precedes live traffic
        shared.replay_history().await;

        if let Err(e) = shared.hub.register(handle.clone()).await {
            let reason = e.close_reason();
            handle.begin_close(reason);
            tracing::info!(
                connection_id = %handle.id,
                user_id = %handle.user_id,
                channel_id = %handle.channel_id,
                reason = %reason,
                "Connection refused by hub"
            );

            if reason.code().is_some() {
                let write_timeout = shared.ctx.config.write_timeout;
                let error = OutboundMessage::Direct(ServerMessage::error(e.error_code()));
                if send_outbound(&mut sink, &error, write_timeout).await.is_ok() {
                    let _ = send_close(&mut sink, reason, write_timeout).await;
                }
            }
            let _ = sink.close().await;
            handle.mark_closed();

            return ConnectionOutcome {
                connection_id: handle.id,
                reason,
                registered: false,
                duration: started.elapsed(),
            };
        }

        ConnectionMetrics::record_opened();

        let writer = tokio::spawn(write_pump(shared.clone(), sink, outbound, close.clone()));
        let reader = tokio::spawn(read_pump(shared.clone(), stream, close));

        let _ = reader.await;
        let _ = writer.await;

        handle.mark_closed();
        let reason = handle.close_reason().unwrap_or(CloseReason::Normal);
        let duration = started.elapsed();
        ConnectionMetrics::record_closed(reason.as_str(), duration);

        tracing::info!(
            connection_id = %handle.id,
            user_id = %handle.user_id,
            channel_id = %handle.channel_id,
            reason = %reason,
            duration_secs = duration.as_secs_f64(),
            "Connection closed"
        );

        ConnectionOutcome {
            connection_id: handle.id,
            reason,
            registered: true,
            duration,
        }
    }
}

impl Shared {
    async fn replay_history(&self) {
        let handle = &self.handle;
        // Leave room in the queue for live traffic
        let limit = self
            .ctx
            .config
            .history_limit
            .min(self.ctx.config.queue_capacity / 2);
        if limit == 0 {
            return;
        }

        let history = match self.ctx.store.recent_messages(&handle.channel_id, limit).await {
            Ok(history) => history,
            Err(e) => {
                tracing::warn!(
                    connection_id = %handle.id,
                    channel_id = %handle.channel_id,
                    error = %e,
                    "Failed to load message history"
                );
                return;
            }
        };

        let mut replayed = 0;
        for stored in history {
            let data = ChatMessageData {
                id: stored.id,
                user_id: stored.user_id,
                username: stored.username,
                content: stored.content,
                created_at: stored.created_at,
            };
            if handle
                .try_enqueue(OutboundMessage::Direct(ServerMessage::Message { data }))
                .is_err()
            {
                break;
            }
            replayed += 1;
        }

        if replayed > 0 {
            tracing::debug!(connection_id = %handle.id, replayed, "Queued message history");
        }
    }

    /// Begin closing (first caller wins) and leave the hub.
    async fn close(&self, reason: CloseReason) {
        self.handle.begin_close(reason);
        self.hub.unregister(self.handle.id, reason).await;
    }

    /// Queue an error for this connection only.
    fn send_error(&self, code: ErrorCode) {
        let error = OutboundMessage::Direct(ServerMessage::error(code));
        if let Err(e) = self.handle.try_enqueue(error) {
            tracing::debug!(connection_id = %self.handle.id, error = ?e, "Dropped error reply");
        }
    }

    async fn handle_frame(&self, message: Message) -> Flow {
        match message {
            Message::Text(text) => self.handle_text(text.as_str()).await,
            Message::Binary(_) => {
                GuardMetrics::record_protocol_error();
                self.send_error(ErrorCode::InvalidPayload);
                Flow::Continue
            }
            Message::Close(_) => Flow::Close(CloseReason::Normal),
            // Either one only refreshes the read deadline
            Message::Ping(_) | Message::Pong(_) => Flow::Continue,
        }
    }

    async fn handle_text(&self, text: &str) -> Flow {
        let message = match decode_client_message(text, self.ctx.config.limits) {
            Ok(message) => message,
            Err(e) => {
                GuardMetrics::record_protocol_error();
                tracing::debug!(connection_id = %self.handle.id, error = %e, "Rejected frame");
                self.send_error(e.code());
                return Flow::Continue;
            }
        };

        ConnectionMetrics::record_frame(message.kind());

        match message {
            ClientMessage::Message { content } => self.handle_chat_message(content).await,
            ClientMessage::Typing { is_typing } => {
                let payload =
                    ServerMessage::typing(&self.handle.user_id, &self.handle.username, is_typing);
                self.broadcast(payload).await
            }
        }
    }

    async fn handle_chat_message(&self, content: String) -> Flow {
        let handle = &self.handle;

        if self.ctx.config.check_bans_per_message {
            match self
                .ctx
                .moderation
                .is_banned(&handle.channel_id, &handle.user_id)
                .await
            {
                Ok(true) => {
                    self.send_error(ErrorCode::Banned);
                    return Flow::Close(CloseReason::Banned);
                }
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(
                        connection_id = %handle.id,
                        error = %e,
                        "Ban check failed, allowing message"
                    );
                }
            }
        }

        if let RateLimitResult::Denied { retry_after, .. } =
            self.ctx.rate_limiter.check(&handle.user_id)
        {
            GuardMetrics::record_rate_limited();
            tracing::debug!(
                user_id = %handle.user_id,
                retry_after = retry_after,
                "Rate limit exceeded"
            );
            self.send_error(ErrorCode::RateLimitExceeded);
            return Flow::Continue;
        }

        let verdict = self.ctx.spam_guard.inspect(&content);
        if !verdict.is_clean() {
            GuardMetrics::record_spam(verdict.rule());
            tracing::debug!(user_id = %handle.user_id, rule = verdict.rule(), "Spam rejected");
            self.send_error(ErrorCode::SpamDetected);
            return Flow::Continue;
        }

        let data = ChatMessageData {
            id: Uuid::new_v4(),
            user_id: handle.user_id.clone(),
            username: handle.username.clone(),
            content,
            created_at: Utc::now(),
        };
        let stored = StoredMessage {
            id: data.id,
            channel_id: handle.channel_id.clone(),
            user_id: data.user_id.clone(),
            username: data.username.clone(),
            content: data.content.clone(),
            created_at: data.created_at,
        };

        let flow = self.broadcast(ServerMessage::Message { data }).await;

        if matches!(flow, Flow::Continue) {
            let store = self.ctx.store.clone();
            tokio::spawn(async move {
                if let Err(e) = store.persist_message(&stored).await {
                    tracing::warn!(
                        message_id = %stored.id,
                        channel_id = %stored.channel_id,
                        error = %e,
                        "Failed to persist chat message"
                    );
                }
            });
        }

        flow
    }

    async fn broadcast(&self, payload: ServerMessage) -> Flow {
        let envelope = Envelope::local(
            self.handle.channel_id.clone(),
            Some((self.handle.id, &self.handle.user_id)),
            payload,
        );

        match self.hub.broadcast(envelope).await {
            Ok(()) => Flow::Continue,
            Err(_) => Flow::Close(CloseReason::HubUnavailable),
        }
    }
}

async fn read_pump<R, E>(shared: Arc<Shared>, mut stream: R, mut close: watch::Receiver<Option<CloseReason>>)
where
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: Display + Send,
{
    let pong_timeout = shared.ctx.config.pong_timeout;
    let mut deadline = Instant::now() + pong_timeout;

    loop {
        let next = tokio::select! {
            biased;
            _ = closed(&mut close) => return,
            next = tokio::time::timeout_at(deadline, stream.next()) => next,
        };

        let flow = match next {
            Err(_) => {
                tracing::info!(connection_id = %shared.handle.id, "Heartbeat timeout");
                Flow::Close(CloseReason::HeartbeatTimeout)
            }
            Ok(None) => Flow::Close(CloseReason::TransportError),
            Ok(Some(Err(e))) => {
                tracing::debug!(connection_id = %shared.handle.id, error = %e, "Read failed");
                Flow::Close(CloseReason::TransportError)
            }
            Ok(Some(Ok(message))) => {
                deadline = Instant::now() + pong_timeout;
                shared.handle.touch();
                shared.handle_frame(message).await
            }
        };

        if let Flow::Close(reason) = flow {
            shared.close(reason).await;
            return;
        }
    }
}

async fn write_pump<S>(
    shared: Arc<Shared>,
    mut sink: S,
    mut outbound: mpsc::Receiver<OutboundMessage>,
    mut close: watch::Receiver<Option<CloseReason>>,
) where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    let config = &shared.ctx.config;
    let mut ping = tokio::time::interval_at(Instant::now() + config.ping_interval, config.ping_interval);

    loop {
        let sent = tokio::select! {
            biased;
            _ = closed(&mut close) => break,
            message = outbound.recv() => match message {
                Some(message) => send_outbound(&mut sink, &message, config.write_timeout).await,
                None => break,
            },
            _ = ping.tick() => send_frame(&mut sink, Message::Ping(Default::default()), config.write_timeout).await,
        };

        if let Err(e) = sent {
            tracing::debug!(connection_id = %shared.handle.id, error = %e, "Write failed");
            shared.close(CloseReason::TransportError).await;
            return;
        }
    }

    let reason = shared.handle.close_reason().unwrap_or(CloseReason::Normal);
    if reason != CloseReason::TransportError {
        let flush = async {
            while let Ok(message) = outbound.try_recv() {
                send_outbound(&mut sink, &message, config.write_timeout).await?;
            }
            send_close(&mut sink, reason, config.write_timeout).await
        };

        match tokio::time::timeout(config.close_grace, flush).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::debug!(connection_id = %shared.handle.id, error = %e, "Flush on close failed");
            }
            Err(_) => {
                tracing::debug!(connection_id = %shared.handle.id, "Close grace period elapsed");
            }
        }
    }

    let _ = tokio::time::timeout(config.write_timeout, sink.close()).await;
}

/// Resolves once a close reason has been recorded
async fn closed(close: &mut watch::Receiver<Option<CloseReason>>) {
    let _ = close.wait_for(Option::is_some).await;
}

async fn send_outbound<S>(sink: &mut S, message: &OutboundMessage, timeout: Duration) -> Result<(), String>
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    let text = message.to_json().map_err(|e| e.to_string())?;
    send_frame(sink, Message::Text(text.into()), timeout).await
}

async fn send_close<S>(sink: &mut S, reason: CloseReason, timeout: Duration) -> Result<(), String>
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    let Some(code) = reason.code() else {
        return Ok(());
    };
    let frame = CloseFrame {
        code,
        reason: reason.as_str().into(),
    };
    send_frame(sink, Message::Close(Some(frame)), timeout).await
}

async fn send_frame<S>(sink: &mut S, message: Message, timeout: Duration) -> Result<(), String>
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    match tokio::time::timeout(timeout, sink.send(message)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(e.to_string()),
        Err(_) => Err("write timed out".to_string()),
    }
}
