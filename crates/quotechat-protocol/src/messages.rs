//! Frames exchanged with viewers over the WebSocket.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// User id reserved for the quote bot.
pub const BOT_USER_ID: i64 = 1;

/// Author label attached to bot messages.
pub const BOT_LABEL: &str = "bot";

/// Author label for viewers that connected without a token.
pub const ANONYMOUS_LABEL: &str = "anonymous";

// ============================================================================
// Outbound
// ============================================================================

/// A chat line fanned out to every connected viewer.
///
/// Immutable once built; the hub shares one instance between all
/// connections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastMessage {
    /// Message text.
    pub content: String,

    /// Author label (username, or `"bot"`).
    pub user: String,

    /// Author id. Viewers with the same id do not receive the message back.
    pub user_id: Option<i64>,

    /// When the message was produced. Serialized as RFC 3339.
    pub timestamp: DateTime<Utc>,
}

impl BroadcastMessage {
    /// Build a message with an explicit timestamp.
    pub fn new(
        content: impl Into<String>,
        user: impl Into<String>,
        user_id: Option<i64>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            content: content.into(),
            user: user.into(),
            user_id,
            timestamp,
        }
    }

    /// Build a message authored by the quote bot.
    pub fn from_bot(content: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self::new(content, BOT_LABEL, Some(BOT_USER_ID), timestamp)
    }

    /// Whether this message was written by `user_id`.
    ///
    /// Unknown authors and anonymous viewers never match.
    pub fn is_authored_by(&self, user_id: Option<i64>) -> bool {
        matches!((self.user_id, user_id), (Some(author), Some(viewer)) if author == viewer)
    }

    /// Whether the bot wrote this message.
    pub fn is_bot(&self) -> bool {
        self.user_id == Some(BOT_USER_ID)
    }
}

// ============================================================================
// Inbound
// ============================================================================

/// A chat line sent by a viewer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatFrame {
    pub content: String,
}

impl ChatFrame {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
        }
    }
}
