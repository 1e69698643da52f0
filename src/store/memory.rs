use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

use super::traits::{
    ChannelDirectory, ChannelInfo, MessageStore, ModerationPolicy, StoreError, StoredMessage,
};

/// In-memory store used when no database is configured.
#[derive(Default)]
pub struct MemoryStore {
    channels: DashMap<String, ChannelInfo>,
    /// Resolve unknown channel ids as public, uncapped channels
    open_directory: bool,
    /// channel -> user -> expiry (`None` is permanent)
    bans: DashMap<String, HashMap<String, Option<DateTime<Utc>>>>,
    messages: DashMap<String, Vec<StoredMessage>>,
}

impl MemoryStore {
    /// Only channels added with [`MemoryStore::add_channel`] exist
    pub fn new() -> Self {
        Self::default()
    }

    /// Every channel id exists
    pub fn open() -> Self {
        Self {
            open_directory: true,
            ..Self::default()
        }
    }

    pub fn add_channel(&self, info: ChannelInfo) {
        self.channels.insert(info.id.clone(), info);
    }

    pub fn ban(&self, channel_id: &str, user_id: &str, expires_at: Option<DateTime<Utc>>) {
        self.bans
            .entry(channel_id.to_string())
            .or_default()
            .insert(user_id.to_string(), expires_at);
    }

    pub fn unban(&self, channel_id: &str, user_id: &str) {
        if let Some(mut users) = self.bans.get_mut(channel_id) {
            users.remove(user_id);
        }
    }

    /// Messages persisted for a channel, in insertion order
    pub fn messages(&self, channel_id: &str) -> Vec<StoredMessage> {
        self.messages
            .get(channel_id)
            .map(|m| m.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn persist_message(&self, message: &StoredMessage) -> Result<(), StoreError> {
        let mut messages = self.messages.entry(message.channel_id.clone()).or_default();
        if !messages.iter().any(|m| m.id == message.id) {
            messages.push(message.clone());
        }
        Ok(())
    }

    async fn recent_messages(
        &self,
        channel_id: &str,
        limit: usize,
    ) -> Result<Vec<StoredMessage>, StoreError> {
        let Some(messages) = self.messages.get(channel_id) else {
            return Ok(Vec::new());
        };
        let skip = messages.len().saturating_sub(limit);
        Ok(messages[skip..].to_vec())
    }
}

#[async_trait]
impl ModerationPolicy for MemoryStore {
    async fn is_banned(&self, channel_id: &str, user_id: &str) -> Result<bool, StoreError> {
        let banned = self
            .bans
            .get(channel_id)
            .and_then(|users| users.get(user_id).copied())
            .map(|expires| expires.map_or(true, |at| at > Utc::now()))
            .unwrap_or(false);
        Ok(banned)
    }
}

#[async_trait]
impl ChannelDirectory for MemoryStore {
    async fn lookup(&self, channel_id: &str) -> Result<Option<ChannelInfo>, StoreError> {
        if let Some(info) = self.channels.get(channel_id) {
            return Ok(Some(info.clone()));
        }
        if self.open_directory && !channel_id.is_empty() {
            return Ok(Some(ChannelInfo::public(channel_id)));
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use uuid::Uuid;

    fn message(channel: &str, id: Uuid) -> StoredMessage {
        StoredMessage {
            id,
            channel_id: channel.to_string(),
            user_id: "u1".to_string(),
            username: "alice".to_string(),
            content: "hi".to_string(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_persist_is_idempotent_per_id() {
        let store = MemoryStore::new();
        let id = Uuid::new_v4();

        store.persist_message(&message("general", id)).await.unwrap();
        store.persist_message(&message("general", id)).await.unwrap();
        store
            .persist_message(&message("general", Uuid::new_v4()))
            .await
            .unwrap();

        assert_eq!(store.messages("general").len(), 2);
    }

    #[tokio::test]
    async fn test_recent_messages_are_the_latest_oldest_first() {
        let store = MemoryStore::new();
        let ids: Vec<Uuid> = (0..5).map(|_| Uuid::new_v4()).collect();
        for id in &ids {
            store.persist_message(&message("general", *id)).await.unwrap();
        }

        let recent = store.recent_messages("general", 3).await.unwrap();
        let recent_ids: Vec<Uuid> = recent.iter().map(|m| m.id).collect();
        assert_eq!(recent_ids, ids[2..].to_vec());

        assert_eq!(store.recent_messages("general", 50).await.unwrap().len(), 5);
        assert!(store.recent_messages("general", 0).await.unwrap().is_empty());
        assert!(store.recent_messages("random", 50).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_bans_respect_expiry() {
        let store = MemoryStore::new();
        store.ban("general", "forever", None);
        store.ban("general", "expired", Some(Utc::now() - Duration::minutes(1)));
        store.ban("general", "active", Some(Utc::now() + Duration::minutes(10)));

        assert!(store.is_banned("general", "forever").await.unwrap());
        assert!(!store.is_banned("general", "expired").await.unwrap());
        assert!(store.is_banned("general", "active").await.unwrap());
        assert!(!store.is_banned("random", "forever").await.unwrap());

        store.unban("general", "forever");
        assert!(!store.is_banned("general", "forever").await.unwrap());
    }

    #[tokio::test]
    async fn test_directory_modes() {
        let closed = MemoryStore::new();
        closed.add_channel(ChannelInfo::public("general").with_max_members(2));

        assert_eq!(
            closed.lookup("general").await.unwrap().unwrap().max_members,
            Some(2)
        );
        assert!(closed.lookup("missing").await.unwrap().is_none());

        let open = MemoryStore::open();
        assert_eq!(
            open.lookup("anything").await.unwrap(),
            Some(ChannelInfo::public("anything"))
        );
    }
}
