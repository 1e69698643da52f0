use chrono::{DateTime, Utc};

use super::types::ConnectionId;
use crate::websocket::{EnvelopeKind, ServerMessage};

/// Where an envelope entered this instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Produced by a connection on this instance; published to the relay
    Local,
    /// Received from another instance; delivered locally only
    Relay,
}

impl Origin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Origin::Local => "local",
            Origin::Relay => "relay",
        }
    }
}

/// Unit of broadcast within one channel
#[derive(Debug, Clone)]
pub struct Envelope {
    pub channel_id: String,
    /// Originating connection; never delivered back to it
    pub sender_connection: Option<ConnectionId>,
    pub sender_user_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub payload: ServerMessage,
    pub origin: Origin,
}

impl Envelope {
    /// Envelope produced on this instance by `sender`
    pub fn local(
        channel_id: impl Into<String>,
        sender: Option<(ConnectionId, &str)>,
        payload: ServerMessage,
    ) -> Self {
        Self {
            channel_id: channel_id.into(),
            sender_connection: sender.map(|(id, _)| id),
            sender_user_id: sender.map(|(_, user)| user.to_string()),
            timestamp: Utc::now(),
            payload,
            origin: Origin::Local,
        }
    }

    /// Envelope received from another instance
    pub fn from_relay(
        channel_id: impl Into<String>,
        timestamp: DateTime<Utc>,
        payload: ServerMessage,
    ) -> Self {
        Self {
            channel_id: channel_id.into(),
            sender_connection: None,
            sender_user_id: None,
            timestamp,
            payload,
            origin: Origin::Relay,
        }
    }

    pub fn kind(&self) -> EnvelopeKind {
        self.payload.kind()
    }

    pub fn is_from_relay(&self) -> bool {
        self.origin == Origin::Relay
    }
}
