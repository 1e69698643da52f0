//! WebSocket surface: wire messages, the per-connection client, and the
//! upgrade handler.

mod client;
mod handler;
mod message;

pub use client::{Client, ClientConfig, ClientContext, ConnectionOutcome};
pub use handler::{is_valid_channel_id, ws_handler, WsQuery};
pub use message::{
    decode_client_message, ChatMessageData, ClientMessage, DecodeError, EnvelopeKind, ErrorCode,
    FrameLimits, PresenceAction, PresenceData, ServerMessage, TypingData,
};
