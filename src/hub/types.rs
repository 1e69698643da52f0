//! Client handle and related types

use std::sync::atomic::{AtomicI64, AtomicU8, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use crate::auth::Identity;
use crate::websocket::ServerMessage;

pub type ConnectionId = Uuid;

/// Connection lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    /// Handshake done, not yet admitted by a hub
    Connecting = 0,
    /// Registered with a hub; pumps running
    Active = 1,
    /// Close initiated; outbound queue is being flushed
    Closing = 2,
    /// Terminal
    Closed = 3,
}

impl From<u8> for ConnectionState {
    fn from(value: u8) -> Self {
        match value {
            0 => ConnectionState::Connecting,
            1 => ConnectionState::Active,
            2 => ConnectionState::Closing,
            _ => ConnectionState::Closed,
        }
    }
}

/// Why a connection is being closed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Peer sent a close frame
    Normal,
    ServerShutdown,
    Banned,
    /// Hub stopped before the connection could be admitted
    HubUnavailable,
    SlowConsumer,
    ChannelFull,
    HeartbeatTimeout,
    /// Socket read or write failed
    TransportError,
}

impl CloseReason {
    /// WebSocket close code, or `None` when the socket is already unusable
    pub fn code(&self) -> Option<u16> {
        match self {
            CloseReason::Normal => Some(1000),
            CloseReason::ServerShutdown => Some(1001),
            CloseReason::Banned => Some(1008),
            CloseReason::HubUnavailable => Some(1013),
            CloseReason::SlowConsumer => Some(4008),
            CloseReason::ChannelFull => Some(4009),
            CloseReason::HeartbeatTimeout => Some(4010),
            CloseReason::TransportError => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::Normal => "normal",
            CloseReason::ServerShutdown => "server_shutdown",
            CloseReason::Banned => "banned",
            CloseReason::HubUnavailable => "hub_unavailable",
            CloseReason::SlowConsumer => "slow_consumer",
            CloseReason::ChannelFull => "channel_full",
            CloseReason::HeartbeatTimeout => "heartbeat_timeout",
            CloseReason::TransportError => "transport_error",
        }
    }
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Frame queued for a client's write pump
#[derive(Debug, Clone)]
pub enum OutboundMessage {
    /// Serialized once by the hub and shared by every recipient of a broadcast
    Shared(Arc<str>),
    /// Addressed to this client only (errors)
    Direct(ServerMessage),
}

impl OutboundMessage {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        match self {
            OutboundMessage::Shared(json) => Ok(json.to_string()),
            OutboundMessage::Direct(msg) => msg.to_json(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueError {
    /// Outbound queue at capacity; the client is a slow consumer
    Full,
    /// Write pump is gone
    Closed,
}

/// Receiving ends held by the connection's pumps
pub struct ClientChannels {
    pub outbound: mpsc::Receiver<OutboundMessage>,
    pub close: watch::Receiver<Option<CloseReason>>,
}

/// The hub's view of one connection.
///
/// The hub only ever talks to a client through [`ClientHandle::try_enqueue`]
/// and [`ClientHandle::begin_close`]; it never touches the socket.
pub struct ClientHandle {
    pub id: ConnectionId,
    pub user_id: String,
    pub username: String,
    pub channel_id: String,
    pub connected_at: DateTime<Utc>,
    sender: mpsc::Sender<OutboundMessage>,
    state: AtomicU8,
    close_tx: watch::Sender<Option<CloseReason>>,
    /// Last inbound frame (Unix seconds)
    last_activity: AtomicI64,
}

impl ClientHandle {
    pub fn new(
        identity: &Identity,
        channel_id: impl Into<String>,
        queue_capacity: usize,
    ) -> (Arc<Self>, ClientChannels) {
        let (sender, outbound) = mpsc::channel(queue_capacity.max(1));
        let (close_tx, close) = watch::channel(None);
        let now = Utc::now();

        let handle = Arc::new(Self {
            id: Uuid::new_v4(),
            user_id: identity.user_id.clone(),
            username: identity.username.clone(),
            channel_id: channel_id.into(),
            connected_at: now,
            sender,
            state: AtomicU8::new(ConnectionState::Connecting as u8),
            close_tx,
            last_activity: AtomicI64::new(now.timestamp()),
        });

        (handle, ClientChannels { outbound, close })
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from(self.state.load(Ordering::Acquire))
    }

    /// `Connecting` -> `Active`. Returns false if the connection already began closing.
    pub fn mark_active(&self) -> bool {
        self.state
            .compare_exchange(
                ConnectionState::Connecting as u8,
                ConnectionState::Active as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Move into `Closing` and signal the pumps.
    ///
    /// Only the first call wins; later calls return false and leave the
    /// recorded reason untouched.
    pub fn begin_close(&self, reason: CloseReason) -> bool {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            if current >= ConnectionState::Closing as u8 {
                return false;
            }
            match self.state.compare_exchange(
                current,
                ConnectionState::Closing as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }

        self.close_tx.send_replace(Some(reason));
        true
    }

    pub fn mark_closed(&self) {
        self.state
            .store(ConnectionState::Closed as u8, Ordering::Release);
    }

    pub fn close_reason(&self) -> Option<CloseReason> {
        *self.close_tx.borrow()
    }

    pub fn is_closing(&self) -> bool {
        self.state() >= ConnectionState::Closing
    }

    /// Non-blocking push onto the outbound queue
    pub fn try_enqueue(&self, message: OutboundMessage) -> Result<(), EnqueueError> {
        self.sender.try_send(message).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => EnqueueError::Full,
            mpsc::error::TrySendError::Closed(_) => EnqueueError::Closed,
        })
    }

    pub fn touch(&self) {
        self.last_activity
            .store(Utc::now().timestamp(), Ordering::Relaxed);
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.last_activity.load(Ordering::Relaxed), 0)
            .unwrap_or_else(Utc::now)
    }
}

impl PartialOrd for ConnectionState {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ConnectionState {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (*self as u8).cmp(&(*other as u8))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle(capacity: usize) -> (Arc<ClientHandle>, ClientChannels) {
        ClientHandle::new(&Identity::new("user-1", "alice"), "general", capacity)
    }

    #[test]
    fn test_state_transitions() {
        let (client, _channels) = handle(4);
        assert_eq!(client.state(), ConnectionState::Connecting);

        assert!(client.mark_active());
        assert_eq!(client.state(), ConnectionState::Active);
        assert!(!client.mark_active());

        assert!(client.begin_close(CloseReason::Normal));
        assert_eq!(client.state(), ConnectionState::Closing);

        client.mark_closed();
        assert_eq!(client.state(), ConnectionState::Closed);
    }

    #[test]
    fn test_begin_close_is_idempotent() {
        let (client, channels) = handle(4);
        client.mark_active();

        assert!(client.begin_close(CloseReason::SlowConsumer));
        assert!(!client.begin_close(CloseReason::TransportError));

        assert_eq!(client.close_reason(), Some(CloseReason::SlowConsumer));
        assert_eq!(*channels.close.borrow(), Some(CloseReason::SlowConsumer));
    }

    #[test]
    fn test_close_before_activation_blocks_activation() {
        let (client, _channels) = handle(4);
        assert!(client.begin_close(CloseReason::Banned));
        assert!(!client.mark_active());
    }

    #[test]
    fn test_try_enqueue_reports_full_queue() {
        let (client, _channels) = handle(1);
        let msg = OutboundMessage::Shared(Arc::from("{}"));

        assert_eq!(client.try_enqueue(msg.clone()), Ok(()));
        assert_eq!(client.try_enqueue(msg), Err(EnqueueError::Full));
    }

    #[test]
    fn test_try_enqueue_reports_closed_queue() {
        let (client, channels) = handle(1);
        drop(channels);
        assert_eq!(
            client.try_enqueue(OutboundMessage::Shared(Arc::from("{}"))),
            Err(EnqueueError::Closed)
        );
    }

    #[test]
    fn test_close_codes() {
        assert_eq!(CloseReason::ServerShutdown.code(), Some(1001));
        assert_eq!(CloseReason::SlowConsumer.code(), Some(4008));
        assert_eq!(CloseReason::TransportError.code(), None);
    }
}
