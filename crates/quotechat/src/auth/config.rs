//! Authentication configuration.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Minimum HS256 secret length accepted from configuration.
pub const MIN_SECRET_LENGTH: usize = 32;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// HS256 secret. `env:VAR_NAME` reads it from the environment.
    /// When unset, `serve` generates an ephemeral one.
    pub jwt_secret: Option<String>,

    /// Lifetime of issued tokens.
    pub token_ttl_hours: u32,

    /// Allowed CORS origins. Empty disables cross-origin access.
    pub allowed_origins: Vec<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: None,
            token_ttl_hours: 24,
            allowed_origins: vec![
                "http://localhost:3000".to_string(),
                "http://localhost:8080".to_string(),
            ],
        }
    }
}

impl AuthConfig {
    /// Resolve the JWT secret, expanding `env:VAR_NAME` syntax.
    pub fn resolve_jwt_secret(&self) -> Result<Option<String>, ConfigValidationError> {
        match &self.jwt_secret {
            None => Ok(None),
            Some(value) => match value.strip_prefix("env:") {
                Some(var_name) => match std::env::var(var_name) {
                    Ok(secret) if !secret.is_empty() => Ok(Some(secret)),
                    Ok(_) => Err(ConfigValidationError::EnvVarEmpty(var_name.to_string())),
                    Err(_) => Err(ConfigValidationError::EnvVarNotFound(var_name.to_string())),
                },
                None => Ok(Some(value.clone())),
            },
        }
    }

    /// Check a configured secret. A missing secret is not an error here.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if let Some(secret) = self.resolve_jwt_secret()? {
            if secret.len() < MIN_SECRET_LENGTH {
                return Err(ConfigValidationError::JwtSecretTooShort);
            }
        }
        Ok(())
    }

    /// Random alphanumeric secret from the OS-seeded thread RNG.
    pub fn generate_jwt_secret() -> String {
        use rand::Rng;

        const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
        const SECRET_LENGTH: usize = 64;

        let mut rng = rand::rng();
        (0..SECRET_LENGTH)
            .map(|_| CHARSET[rng.random_range(0..CHARSET.len())] as char)
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigValidationError {
    #[error("no JWT secret configured")]
    MissingJwtSecret,

    #[error("JWT secret must be at least 32 characters")]
    JwtSecretTooShort,

    #[error("environment variable '{0}' not found")]
    EnvVarNotFound(String),

    #[error("environment variable '{0}' is empty")]
    EnvVarEmpty(String),
}
