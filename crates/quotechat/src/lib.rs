//! Quotechat: a real-time chat hub with an asynchronous stock quote bot.
//!
//! Viewers connect over WebSocket and receive every chat line through the
//! [`ws::Hub`]. Lines starting with `/stock=` are not broadcast; the
//! [`chat::ChatService`] queues them as commands, the [`worker::CommandWorker`]
//! resolves them against the quote provider, and the [`relay::Relay`] brings
//! the answer back into the stream as a bot message.

pub mod api;
pub mod auth;
pub mod chat;
pub mod config;
pub mod db;
pub mod queue;
pub mod quote;
pub mod relay;
pub mod tasks;
pub mod user;
pub mod worker;
pub mod ws;
