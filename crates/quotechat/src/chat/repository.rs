//! Message persistence.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::SqlitePool;
use tracing::instrument;

use super::models::{NewMessage, StoredMessage};

/// Where chat lines are recorded.
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn save(&self, message: NewMessage) -> Result<StoredMessage>;

    /// Latest `limit` messages, oldest first.
    async fn recent(&self, limit: i64) -> Result<Vec<StoredMessage>>;
}

const SELECT_MESSAGES: &str = r#"
    SELECT m.id, m.user_id, COALESCE(u.username, 'unknown') AS username,
           m.content, m.created_at, m.is_bot
    FROM messages m
    LEFT JOIN users u ON u.id = m.user_id
"#;

#[derive(Debug, Clone)]
pub struct ChatRepository {
    pool: SqlitePool,
}

impl ChatRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, id: i64) -> Result<Option<StoredMessage>> {
        let message = sqlx::query_as::<_, StoredMessage>(&format!("{SELECT_MESSAGES} WHERE m.id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch message")?;

        Ok(message)
    }
}

#[async_trait]
impl MessageStore for ChatRepository {
    #[instrument(skip(self, message), fields(user_id = message.user_id))]
    async fn save(&self, message: NewMessage) -> Result<StoredMessage> {
        let id = sqlx::query(
            "INSERT INTO messages (user_id, content, created_at, is_bot) VALUES (?, ?, ?, ?)",
        )
        .bind(message.user_id)
        .bind(&message.content)
        .bind(message.created_at)
        .bind(message.is_bot)
        .execute(&self.pool)
        .await
        .context("Failed to insert message")?
        .last_insert_rowid();

        self.get(id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("Message not found after insert"))
    }

    async fn recent(&self, limit: i64) -> Result<Vec<StoredMessage>> {
        let mut messages = sqlx::query_as::<_, StoredMessage>(&format!(
            "{SELECT_MESSAGES} ORDER BY m.created_at DESC, m.id DESC LIMIT ?"
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("Failed to list messages")?;

        messages.reverse();
        Ok(messages)
    }
}
