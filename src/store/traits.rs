use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Invalid identifier: {0}")]
    InvalidId(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Public,
    Private,
    Direct,
}

impl ChannelKind {
    /// Unknown values fall back to `Public`
    pub fn parse(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "private" => ChannelKind::Private,
            "direct" | "dm" => ChannelKind::Direct,
            _ => ChannelKind::Public,
        }
    }
}

/// What the transport needs to know about a channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelInfo {
    pub id: String,
    pub kind: ChannelKind,
    /// Membership cap enforced per instance; `None` is unlimited
    pub max_members: Option<u32>,
}

impl ChannelInfo {
    pub fn public(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: ChannelKind::Public,
            max_members: None,
        }
    }

    pub fn with_max_members(mut self, max: u32) -> Self {
        self.max_members = Some(max);
        self
    }
}

/// A chat message as handed to persistence
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    pub id: Uuid,
    pub channel_id: String,
    pub user_id: String,
    pub username: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist one message. Re-persisting an existing id is a no-op.
    async fn persist_message(&self, message: &StoredMessage) -> Result<(), StoreError>;

    /// Up to `limit` of the channel's latest messages, oldest first
    async fn recent_messages(
        &self,
        channel_id: &str,
        limit: usize,
    ) -> Result<Vec<StoredMessage>, StoreError>;
}

#[async_trait]
pub trait ModerationPolicy: Send + Sync {
    async fn is_banned(&self, channel_id: &str, user_id: &str) -> Result<bool, StoreError>;
}

#[async_trait]
pub trait ChannelDirectory: Send + Sync {
    /// Active channel by id, `None` when missing or inactive
    async fn lookup(&self, channel_id: &str) -> Result<Option<ChannelInfo>, StoreError>;
}
