//! Queue payloads and chat command parsing.

use serde::{Deserialize, Serialize};

/// Prefix that turns a chat line into a stock quote request.
pub const STOCK_COMMAND_PREFIX: &str = "/stock=";

/// A quote request queued on the commands queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandJob {
    /// User that issued the command.
    pub user_id: i64,
    /// Symbol as typed by the user (case preserved).
    pub stock_code: String,
}

impl CommandJob {
    pub fn new(user_id: i64, stock_code: impl Into<String>) -> Self {
        Self {
            user_id,
            stock_code: stock_code.into(),
        }
    }
}

/// Outcome of a command, queued on the results queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultMessage {
    pub content: String,
}

impl ResultMessage {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
        }
    }
}

/// Classification of an inbound chat line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatInput<'a> {
    /// Plain text, broadcast as-is.
    Text(&'a str),
    /// `/stock=CODE`; the code may be empty.
    StockQuote(&'a str),
}

impl<'a> ChatInput<'a> {
    pub fn parse(content: &'a str) -> Self {
        match content.trim().strip_prefix(STOCK_COMMAND_PREFIX) {
            Some(code) => ChatInput::StockQuote(code.trim()),
            None => ChatInput::Text(content),
        }
    }
}
