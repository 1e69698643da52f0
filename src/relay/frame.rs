use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::bus::RelayError;
use crate::hub::Envelope;
use crate::websocket::ServerMessage;

/// Wire format on the pub/sub bus
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayFrame {
    /// Server id of the publishing instance
    pub origin: String,
    pub channel_id: String,
    pub sent_at: DateTime<Utc>,
    pub payload: ServerMessage,
}

impl RelayFrame {
    pub fn from_envelope(server_id: &str, envelope: &Envelope) -> Self {
        Self {
            origin: server_id.to_string(),
            channel_id: envelope.channel_id.clone(),
            sent_at: envelope.timestamp,
            payload: envelope.payload.clone(),
        }
    }

    pub fn encode(&self) -> Result<String, RelayError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(raw: &str) -> Result<Self, RelayError> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Convert into a relay-tagged envelope for local delivery
    pub fn into_envelope(self) -> Envelope {
        Envelope::from_relay(self.channel_id, self.sent_at, self.payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::Origin;
    use crate::websocket::PresenceAction;

    #[test]
    fn test_frame_becomes_relay_envelope() {
        let envelope = Envelope::local(
            "general",
            None,
            ServerMessage::presence("u1", "alice", PresenceAction::Left),
        );
        let raw = RelayFrame::from_envelope("server-a", &envelope).encode().unwrap();

        let frame = RelayFrame::decode(&raw).unwrap();
        assert_eq!(frame.origin, "server-a");

        let received = frame.into_envelope();
        assert_eq!(received.origin, Origin::Relay);
        assert_eq!(received.channel_id, "general");
        assert_eq!(received.payload, envelope.payload);
        assert!(received.sender_connection.is_none());
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(RelayFrame::decode("not json").is_err());
    }
}
