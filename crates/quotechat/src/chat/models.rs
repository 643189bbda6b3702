//! Chat message models.

use chrono::{DateTime, Utc};
use quotechat_protocol::{BOT_USER_ID, BroadcastMessage};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A persisted chat line, joined with its author's name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct StoredMessage {
    pub id: i64,
    pub user_id: i64,
    pub username: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub is_bot: bool,
}

impl StoredMessage {
    pub fn to_broadcast(&self) -> BroadcastMessage {
        BroadcastMessage::new(
            self.content.clone(),
            self.username.clone(),
            Some(self.user_id),
            self.created_at,
        )
    }
}

/// A chat line about to be persisted.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub user_id: i64,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub is_bot: bool,
}

impl NewMessage {
    pub fn from_user(user_id: i64, content: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            user_id,
            content: content.into(),
            created_at,
            is_bot: false,
        }
    }

    pub fn from_bot(content: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            user_id: BOT_USER_ID,
            content: content.into(),
            created_at,
            is_bot: true,
        }
    }
}

/// Who is submitting a chat line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Author {
    pub user_id: i64,
    pub username: String,
}

impl Author {
    pub fn new(user_id: i64, username: impl Into<String>) -> Self {
        Self {
            user_id,
            username: username.into(),
        }
    }
}
