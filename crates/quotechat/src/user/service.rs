//! Registration and credential checks.

use anyhow::{Context, Result, bail};
use quotechat_protocol::BOT_USER_ID;
use tracing::{info, instrument};

use super::models::User;
use super::repository::UserRepository;

#[derive(Debug, Clone)]
pub struct UserService {
    repo: UserRepository,
}

impl UserService {
    pub fn new(repo: UserRepository) -> Self {
        Self { repo }
    }

    /// Register a new user.
    #[instrument(skip(self, password))]
    pub async fn register(&self, username: &str, password: &str) -> Result<User> {
        let username = username.trim();
        if username.is_empty() || password.is_empty() {
            bail!("Username and password are required.");
        }

        if !self.repo.is_username_available(username).await? {
            bail!("Username '{}' is already taken.", username);
        }

        let hash = hash_password(password)?;
        let user = self.repo.create(username, &hash).await?;
        info!(user_id = user.id, "Registered user {}", user.username);
        Ok(user)
    }

    /// Returns the user if the password matches. The bot account never logs in.
    #[instrument(skip(self, password))]
    pub async fn verify_credentials(&self, username: &str, password: &str) -> Result<Option<User>> {
        match self.repo.get_by_username(username.trim()).await? {
            Some(user) if user.id != BOT_USER_ID => {
                if verify_password(password, &user.password_hash)? {
                    Ok(Some(user))
                } else {
                    Ok(None)
                }
            }
            _ => Ok(None),
        }
    }

    pub async fn get_user(&self, id: i64) -> Result<Option<User>> {
        self.repo.get(id).await
    }
}

fn hash_password(password: &str) -> Result<String> {
    // Lower cost keeps debug builds and tests fast
    let cost = if cfg!(debug_assertions) { 4 } else { 10 };
    bcrypt::hash(password, cost).context("Failed to hash password")
}

fn verify_password(password: &str, hash: &str) -> Result<bool> {
    bcrypt::verify(password, hash).context("Failed to verify password")
}
