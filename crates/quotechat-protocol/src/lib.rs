//! Wire types for quotechat.
//!
//! Every boundary of the system speaks JSON:
//!
//! ```text
//! viewer <--[WS: ChatFrame in / BroadcastMessage out]--> server
//! server --[commands-queue: CommandJob]--> worker
//! worker --[results-queue: ResultMessage]--> server (relay)
//! ```
//!
//! Broadcast messages are ephemeral. The server may persist chat lines, but the
//! stream itself is never replayed.

pub mod commands;
pub mod messages;

pub use commands::{ChatInput, CommandJob, ResultMessage, STOCK_COMMAND_PREFIX};
pub use messages::{ANONYMOUS_LABEL, BOT_LABEL, BOT_USER_ID, BroadcastMessage, ChatFrame};
