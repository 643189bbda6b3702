//! Chat ingress: classify a submitted line and route it.
//!
//! Plain text is recorded and broadcast right away. `/stock=CODE` lines are
//! queued for the command worker instead; their answer arrives later through
//! the relay.

use std::sync::Arc;

use chrono::Utc;
use log::{debug, info};
use quotechat_protocol::{ChatInput, CommandJob};
use thiserror::Error;

use super::models::{Author, NewMessage, StoredMessage};
use super::repository::MessageStore;
use crate::queue::{Queue, QueueError};
use crate::ws::Hub;

/// Messages returned by `GET /messages`.
pub const HISTORY_LIMIT: i64 = 50;

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("message content is empty")]
    EmptyMessage,

    #[error("invalid command: {0}")]
    InvalidCommand(String),

    #[error("failed to encode command: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("failed to enqueue command: {0}")]
    Queue(#[from] QueueError),

    #[error("failed to store message: {0}")]
    Store(#[source] anyhow::Error),
}

/// Outcome of a submitted chat line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    /// Recorded and handed to the hub.
    Broadcast(StoredMessage),
    /// Queued for the command worker.
    Queued(CommandJob),
}

#[derive(Clone)]
pub struct ChatService {
    hub: Hub,
    commands: Arc<dyn Queue>,
    store: Arc<dyn MessageStore>,
}

impl ChatService {
    pub fn new(hub: Hub, commands: Arc<dyn Queue>, store: Arc<dyn MessageStore>) -> Self {
        Self {
            hub,
            commands,
            store,
        }
    }

    pub async fn submit(&self, author: &Author, content: &str) -> Result<Submission, ChatError> {
        if content.trim().is_empty() {
            return Err(ChatError::EmptyMessage);
        }

        match ChatInput::parse(content) {
            ChatInput::StockQuote("") => {
                Err(ChatError::InvalidCommand("missing stock code".to_string()))
            }
            ChatInput::StockQuote(code) => {
                let job = CommandJob::new(author.user_id, code);
                let payload = serde_json::to_vec(&job)?;
                self.commands.publish(&payload).await?;
                info!("Queued /stock={} for {}", code, author.username);
                Ok(Submission::Queued(job))
            }
            ChatInput::Text(text) => {
                let stored = self
                    .store
                    .save(NewMessage::from_user(author.user_id, text, Utc::now()))
                    .await
                    .map_err(ChatError::Store)?;
                debug!("Message {} from {}", stored.id, author.username);
                self.hub.broadcast(stored.to_broadcast()).await;
                Ok(Submission::Broadcast(stored))
            }
        }
    }

    /// The latest [`HISTORY_LIMIT`] messages, oldest first.
    pub async fn history(&self) -> Result<Vec<StoredMessage>, ChatError> {
        self.store.recent(HISTORY_LIMIT).await.map_err(ChatError::Store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::ChatRepository;
    use crate::db::Database;
    use crate::queue::{DeliveryStream, MemoryQueue};
    use crate::ws::{HubConfig, Viewer};
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::time::timeout;

    struct DownQueue;

    #[async_trait]
    impl Queue for DownQueue {
        fn name(&self) -> &str {
            "stock_commands"
        }

        async fn publish(&self, _payload: &[u8]) -> Result<(), QueueError> {
            Err(QueueError::Transport("broker down".into()))
        }

        async fn consume(&self, _auto_ack: bool) -> Result<DeliveryStream, QueueError> {
            Err(QueueError::Transport("broker down".into()))
        }
    }

    struct Fixture {
        chat: ChatService,
        hub: Hub,
        commands: MemoryQueue,
        alice: Author,
    }

    async fn fixture() -> Fixture {
        let db = Database::in_memory().await.unwrap();
        let alice_id = sqlx::query("INSERT INTO users (username, password_hash) VALUES ('alice', 'x')")
            .execute(db.pool())
            .await
            .unwrap()
            .last_insert_rowid();

        let hub = Hub::start(HubConfig::default());
        let commands = MemoryQueue::new("stock_commands");
        let chat = ChatService::new(
            hub.clone(),
            Arc::new(commands.clone()),
            Arc::new(ChatRepository::new(db.pool().clone())),
        );

        Fixture {
            chat,
            hub,
            commands,
            alice: Author::new(alice_id, "alice"),
        }
    }

    #[tokio::test]
    async fn test_plain_text_is_stored_and_broadcast() {
        let f = fixture().await;
        let mut bob = f.hub.register(Viewer::user(99, "bob")).await;

        let submission = f.chat.submit(&f.alice, "hello").await.unwrap();
        let Submission::Broadcast(stored) = submission else {
            panic!("expected a broadcast");
        };
        assert_eq!(stored.content, "hello");

        let received = timeout(Duration::from_secs(1), bob.outbound.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received.content, "hello");
        assert_eq!(received.user, "alice");
        assert_eq!(received.user_id, Some(f.alice.user_id));

        assert_eq!(f.chat.history().await.unwrap().len(), 1);
        assert_eq!(f.commands.ready_len(), 0);
    }

    #[tokio::test]
    async fn test_stock_command_is_queued_not_broadcast() {
        let f = fixture().await;

        let submission = f.chat.submit(&f.alice, "/stock=aapl.us").await.unwrap();
        assert_eq!(
            submission,
            Submission::Queued(CommandJob::new(f.alice.user_id, "aapl.us"))
        );

        let payload = f.commands.take_ready().unwrap();
        let job: CommandJob = serde_json::from_slice(&payload).unwrap();
        assert_eq!(job.stock_code, "aapl.us");
        assert!(f.chat.history().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_input() {
        let f = fixture().await;
        assert!(matches!(
            f.chat.submit(&f.alice, "   ").await,
            Err(ChatError::EmptyMessage)
        ));
        assert!(matches!(
            f.chat.submit(&f.alice, "/stock=").await,
            Err(ChatError::InvalidCommand(_))
        ));
        assert_eq!(f.commands.ready_len(), 0);
    }

    #[tokio::test]
    async fn test_enqueue_failure_is_surfaced() {
        let db = Database::in_memory().await.unwrap();
        let hub = Hub::start(HubConfig::default());
        let chat = ChatService::new(
            hub.clone(),
            Arc::new(DownQueue),
            Arc::new(ChatRepository::new(db.pool().clone())),
        );
        let mut viewer = hub.register(Viewer::anonymous()).await;

        let err = chat
            .submit(&Author::new(42, "alice"), "/stock=aapl.us")
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::Queue(QueueError::Transport(_))));
        assert_eq!(
            err.to_string(),
            "failed to enqueue command: queue transport error: broker down"
        );

        assert!(
            timeout(Duration::from_millis(100), viewer.outbound.recv())
                .await
                .is_err()
        );
        assert!(chat.history().await.unwrap().is_empty());
    }
}
