//! JSON wire protocol.
//!
//! The `type` tag is resolved once here, at decode and encode; everything past
//! this module works with the typed variants.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Messages sent from client to server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Message { content: String },
    Typing { is_typing: bool },
}

impl ClientMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::Message { .. } => "message",
            ClientMessage::Typing { .. } => "typing",
        }
    }
}

/// Messages sent from server to client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Message { data: ChatMessageData },
    Presence { data: PresenceData },
    Typing { data: TypingData },
    Error { error: ErrorCode },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessageData {
    pub id: Uuid,
    pub user_id: String,
    pub username: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceData {
    pub user_id: String,
    pub username: String,
    pub action: PresenceAction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceAction {
    Joined,
    Left,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypingData {
    pub user_id: String,
    pub username: String,
    pub is_typing: bool,
}

/// Machine-readable error codes carried in `{"type":"error","error":...}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidPayload,
    RateLimitExceeded,
    SpamDetected,
    Banned,
    ChannelFull,
    Unavailable,
}

/// Closed set of envelope kinds, used for fan-out policy and metric labels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnvelopeKind {
    Message,
    Typing,
    Presence,
    Error,
}

impl EnvelopeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvelopeKind::Message => "message",
            EnvelopeKind::Typing => "typing",
            EnvelopeKind::Presence => "presence",
            EnvelopeKind::Error => "error",
        }
    }
}

impl ServerMessage {
    pub fn error(code: ErrorCode) -> Self {
        Self::Error { error: code }
    }

    pub fn presence(user_id: &str, username: &str, action: PresenceAction) -> Self {
        Self::Presence {
            data: PresenceData {
                user_id: user_id.to_string(),
                username: username.to_string(),
                action,
            },
        }
    }

    pub fn typing(user_id: &str, username: &str, is_typing: bool) -> Self {
        Self::Typing {
            data: TypingData {
                user_id: user_id.to_string(),
                username: username.to_string(),
                is_typing,
            },
        }
    }

    pub fn kind(&self) -> EnvelopeKind {
        match self {
            ServerMessage::Message { .. } => EnvelopeKind::Message,
            ServerMessage::Presence { .. } => EnvelopeKind::Presence,
            ServerMessage::Typing { .. } => EnvelopeKind::Typing,
            ServerMessage::Error { .. } => EnvelopeKind::Error,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Size limits applied while decoding inbound frames
#[derive(Debug, Clone, Copy)]
pub struct FrameLimits {
    pub max_frame_bytes: usize,
    pub max_content_chars: usize,
}

impl Default for FrameLimits {
    fn default() -> Self {
        Self {
            max_frame_bytes: 2000,
            max_content_chars: 1000,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("frame of {size} bytes exceeds {limit}")]
    FrameTooLarge { size: usize, limit: usize },

    #[error("message content of {chars} characters exceeds {limit}")]
    ContentTooLong { chars: usize, limit: usize },

    #[error("message content is empty")]
    EmptyContent,

    #[error("binary frames are not supported")]
    Binary,

    #[error("malformed frame: {0}")]
    Malformed(String),
}

impl DecodeError {
    /// Every decode failure is reported to the sender the same way
    pub fn code(&self) -> ErrorCode {
        ErrorCode::InvalidPayload
    }
}

/// Decode one text frame, enforcing frame and content limits.
pub fn decode_client_message(text: &str, limits: FrameLimits) -> Result<ClientMessage, DecodeError> {
    if text.len() > limits.max_frame_bytes {
        return Err(DecodeError::FrameTooLarge {
            size: text.len(),
            limit: limits.max_frame_bytes,
        });
    }

    let message: ClientMessage =
        serde_json::from_str(text).map_err(|e| DecodeError::Malformed(e.to_string()))?;

    if let ClientMessage::Message { ref content } = message {
        if content.trim().is_empty() {
            return Err(DecodeError::EmptyContent);
        }

        let chars = content.chars().count();
        if chars > limits.max_content_chars {
            return Err(DecodeError::ContentTooLong {
                chars,
                limit: limits.max_content_chars,
            });
        }
    }

    Ok(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_chat_message() {
        let msg = decode_client_message(r#"{"type":"message","content":"hi"}"#, FrameLimits::default())
            .unwrap();
        assert_eq!(
            msg,
            ClientMessage::Message {
                content: "hi".to_string()
            }
        );
    }

    #[test]
    fn test_decode_typing() {
        let msg = decode_client_message(r#"{"type":"typing","is_typing":true}"#, FrameLimits::default())
            .unwrap();
        assert_eq!(msg, ClientMessage::Typing { is_typing: true });
        assert_eq!(msg.kind(), "typing");
    }

    #[test]
    fn test_decode_rejects_unknown_type() {
        let err = decode_client_message(r#"{"type":"shout","content":"x"}"#, FrameLimits::default())
            .unwrap_err();
        assert!(matches!(err, DecodeError::Malformed(_)));
        assert_eq!(err.code(), ErrorCode::InvalidPayload);
    }

    #[test]
    fn test_decode_rejects_oversized_frame() {
        let limits = FrameLimits {
            max_frame_bytes: 32,
            max_content_chars: 1000,
        };
        let frame = json!({"type": "message", "content": "x".repeat(40)}).to_string();
        assert!(matches!(
            decode_client_message(&frame, limits),
            Err(DecodeError::FrameTooLarge { .. })
        ));
    }

    #[test]
    fn test_content_limit_counts_characters_not_bytes() {
        let limits = FrameLimits {
            max_frame_bytes: 2000,
            max_content_chars: 3,
        };
        // 3 characters, 9 bytes
        let ok = json!({"type": "message", "content": "日本語"}).to_string();
        assert!(decode_client_message(&ok, limits).is_ok());

        let too_long = json!({"type": "message", "content": "日本語だ"}).to_string();
        assert_eq!(
            decode_client_message(&too_long, limits),
            Err(DecodeError::ContentTooLong { chars: 4, limit: 3 })
        );
    }

    #[test]
    fn test_decode_rejects_blank_content() {
        assert_eq!(
            decode_client_message(r#"{"type":"message","content":"   "}"#, FrameLimits::default()),
            Err(DecodeError::EmptyContent)
        );
    }

    #[test]
    fn test_server_message_wire_shape() {
        let presence = ServerMessage::presence("u1", "alice", PresenceAction::Joined);
        assert_eq!(
            serde_json::to_value(&presence).unwrap(),
            json!({"type": "presence", "data": {"user_id": "u1", "username": "alice", "action": "joined"}})
        );

        let error = ServerMessage::error(ErrorCode::RateLimitExceeded);
        assert_eq!(
            error.to_json().unwrap(),
            r#"{"type":"error","error":"RATE_LIMIT_EXCEEDED"}"#
        );
    }
}
