//! Test utilities and common setup.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::Router;
use quotechat::api::{self, AppState};
use quotechat::auth::{AuthConfig, AuthState};
use quotechat::chat::{ChatRepository, ChatService};
use quotechat::db::Database;
use quotechat::queue::{DeliveryStream, MemoryQueue, Queue, QueueError};
use quotechat::quote::{Quote, QuoteError, QuoteSource};
use quotechat::user::{UserRepository, UserService};
use quotechat::ws::Hub;

/// Create a test AuthConfig with a JWT secret for testing.
fn test_auth_config() -> AuthConfig {
    AuthConfig {
        jwt_secret: Some("test-secret-for-integration-tests-minimum-32-chars".to_string()),
        ..AuthConfig::default()
    }
}

/// Everything a test may want to poke at behind the router.
pub struct TestApp {
    pub router: Router,
    pub hub: Hub,
    pub commands: MemoryQueue,
    pub results: MemoryQueue,
    pub store: Arc<ChatRepository>,
    pub users: UserService,
    pub auth: AuthState,
    pub db: Database,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::build(None).await
    }

    /// Route stock commands to `commands` instead of the in-process queue.
    pub async fn with_commands_queue(commands: Arc<dyn Queue>) -> Self {
        Self::build(Some(commands)).await
    }

    async fn build(commands_override: Option<Arc<dyn Queue>>) -> Self {
        let db = Database::in_memory().await.unwrap();
        let auth = AuthState::new(test_auth_config()).unwrap();

        let hub = Hub::start(Default::default());
        let commands = MemoryQueue::new("stock_commands");
        let results = MemoryQueue::new("chat_messages");
        let store = Arc::new(ChatRepository::new(db.pool().clone()));
        let users = UserService::new(UserRepository::new(db.pool().clone()));
        let ingress: Arc<dyn Queue> = match commands_override {
            Some(queue) => queue,
            None => Arc::new(commands.clone()),
        };
        let chat = ChatService::new(hub.clone(), ingress, store.clone());

        let state = AppState::new(hub.clone(), chat, users.clone(), auth.clone());
        Self {
            router: api::create_router(state),
            hub,
            commands,
            results,
            store,
            users,
            auth,
            db,
        }
    }

    /// Register `username` and return a token for it.
    pub async fn user_token(&self, username: &str) -> (i64, String) {
        let user = self
            .users
            .register(username, "correct horse battery")
            .await
            .unwrap();
        let token = self.auth.generate_token(&user.info()).unwrap();
        (user.id, token)
    }
}

/// Create a test application router.
pub async fn test_app() -> Router {
    TestApp::new().await.router
}

/// Quote source answering from a fixed table.
#[derive(Default)]
pub struct StubQuotes {
    quotes: HashMap<String, Result<Quote, QuoteError>>,
}

impl StubQuotes {
    pub fn with(mut self, code: &str, result: Result<Quote, QuoteError>) -> Self {
        self.quotes.insert(code.to_string(), result);
        self
    }
}

#[async_trait]
impl QuoteSource for StubQuotes {
    async fn fetch_quote(&self, symbol: &str) -> Result<Quote, QuoteError> {
        self.quotes
            .get(symbol)
            .cloned()
            .unwrap_or(Err(QuoteError::NotFound))
    }
}

/// Queue whose broker is unreachable.
pub struct DownQueue;

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
