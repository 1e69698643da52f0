use async_trait::async_trait;
use sqlx::Row;
use uuid::Uuid;

use super::traits::{
    ChannelDirectory, ChannelInfo, ChannelKind, MessageStore, ModerationPolicy, StoreError,
    StoredMessage,
};
use crate::postgres::PostgresPool;

/// Collaborators backed by the `chat_channels`, `chat_bans` and `chat_messages` tables.
///
/// Channel and user ids are UUIDs in the schema; ids that do not parse resolve
/// to "no such channel" and "not banned".
#[derive(Clone)]
pub struct PostgresStore {
    pool: PostgresPool,
}

impl PostgresStore {
    pub fn new(pool: PostgresPool) -> Self {
        Self { pool }
    }
}

fn parse_id(value: &str) -> Option<Uuid> {
    Uuid::parse_str(value).ok()
}

#[async_trait]
impl MessageStore for PostgresStore {
    async fn persist_message(&self, message: &StoredMessage) -> Result<(), StoreError> {
        let channel_id = parse_id(&message.channel_id)
            .ok_or_else(|| StoreError::InvalidId(message.channel_id.clone()))?;
        let user_id = parse_id(&message.user_id)
            .ok_or_else(|| StoreError::InvalidId(message.user_id.clone()))?;

        sqlx::query(
            r#"
            INSERT INTO chat_messages (id, channel_id, user_id, content, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $5)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(message.id)
        .bind(channel_id)
        .bind(user_id)
        .bind(&message.content)
        .bind(message.created_at)
        .execute(self.pool.pool())
        .await?;

        Ok(())
    }

    async fn recent_messages(
        &self,
        channel_id: &str,
        limit: usize,
    ) -> Result<Vec<StoredMessage>, StoreError> {
        let Some(id) = parse_id(channel_id) else {
            return Ok(Vec::new());
        };
        if limit == 0 {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(
            r#"
            SELECT cm.id, cm.user_id, cm.content, cm.created_at, u.username
            FROM chat_messages cm
            JOIN users u ON cm.user_id = u.id
            WHERE cm.channel_id = $1 AND cm.is_deleted = false
            ORDER BY cm.created_at DESC
            LIMIT $2
            "#,
        )
        .bind(id)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(self.pool.pool())
        .await?;

        let mut messages = rows
            .into_iter()
            .map(|row| {
                let user_id: Uuid = row.try_get("user_id")?;
                Ok(StoredMessage {
                    id: row.try_get("id")?,
                    channel_id: channel_id.to_string(),
                    user_id: user_id.to_string(),
                    username: row.try_get("username")?,
                    content: row.try_get("content")?,
                    created_at: row.try_get("created_at")?,
                })
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()?;

        // Newest first from the query
        messages.reverse();
        Ok(messages)
    }
}

#[async_trait]
impl ModerationPolicy for PostgresStore {
    async fn is_banned(&self, channel_id: &str, user_id: &str) -> Result<bool, StoreError> {
        let (Some(channel_id), Some(user_id)) = (parse_id(channel_id), parse_id(user_id)) else {
            return Ok(false);
        };

        let banned: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM chat_bans
                WHERE channel_id = $1 AND user_id = $2
                AND (expires_at IS NULL OR expires_at > NOW())
            )
            "#,
        )
        .bind(channel_id)
        .bind(user_id)
        .fetch_one(self.pool.pool())
        .await?;

        Ok(banned)
    }
}

#[async_trait]
impl ChannelDirectory for PostgresStore {
    async fn lookup(&self, channel_id: &str) -> Result<Option<ChannelInfo>, StoreError> {
        let Some(id) = parse_id(channel_id) else {
            return Ok(None);
        };

        let row = sqlx::query(
            r#"
            SELECT channel_type, max_participants
            FROM chat_channels
            WHERE id = $1 AND is_active = true
            "#,
        )
        .bind(id)
        .fetch_optional(self.pool.pool())
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let kind: Option<String> = row.try_get("channel_type")?;
        let max_participants: Option<i32> = row.try_get("max_participants")?;

        Ok(Some(ChannelInfo {
            id: channel_id.to_string(),
            kind: kind.as_deref().map(ChannelKind::parse).unwrap_or(ChannelKind::Public),
            max_members: max_participants.filter(|m| *m > 0).map(|m| m as u32),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_id() {
        assert!(parse_id("not-a-uuid").is_none());
        assert!(parse_id("6f1c2a34-8d4e-4a5b-9c1d-2e3f4a5b6c7d").is_some());
    }

    #[test]
    fn test_channel_kind_parse() {
        assert_eq!(ChannelKind::parse("PRIVATE"), ChannelKind::Private);
        assert_eq!(ChannelKind::parse("dm"), ChannelKind::Direct);
        assert_eq!(ChannelKind::parse("watch_party"), ChannelKind::Public);
    }
}
