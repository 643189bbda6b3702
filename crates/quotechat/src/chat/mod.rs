//! Chat messages: ingress routing and history.

mod models;
mod repository;
mod service;

pub use models::{Author, NewMessage, StoredMessage};
pub use repository::{ChatRepository, MessageStore};
pub use service::{ChatError, ChatService, HISTORY_LIMIT, Submission};
