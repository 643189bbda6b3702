//! Stock quote lookup.

mod stooq;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use stooq::{StooqClient, parse_quote_csv};

/// Quote lookup errors. The display text ends up in the chat verbatim.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum QuoteError {
    /// The provider returned no data row.
    #[error("stock quote not found")]
    NotFound,

    /// The provider knows the row but has no close price for it.
    #[error("no data for stock {0}")]
    NoData(String),

    /// Network failure, timeout or non-success status.
    #[error("request failed: {0}")]
    Transport(String),

    /// The response body could not be read as a quote.
    #[error("malformed quote response: {0}")]
    Malformed(String),
}

impl From<reqwest::Error> for QuoteError {
    fn from(err: reqwest::Error) -> Self {
        QuoteError::Transport(err.to_string())
    }
}

/// Latest close for one symbol.
#[derive(Debug, Clone, PartialEq)]
pub struct Quote {
    pub symbol: String,
    /// Close price exactly as the provider formatted it.
    pub close: String,
}

impl Quote {
    pub fn new(symbol: impl Into<String>, close: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            close: close.into(),
        }
    }

    /// Chat line announcing the quote, e.g. `AAPL.US quote is $150.00 per share`.
    pub fn announcement(&self) -> String {
        format!(
            "{} quote is ${} per share",
            self.symbol.to_uppercase(),
            self.close
        )
    }
}

/// Anything that can look up the latest close for a symbol.
#[async_trait]
pub trait QuoteSource: Send + Sync {
    async fn fetch_quote(&self, symbol: &str) -> Result<Quote, QuoteError>;
}

/// Quote provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotesConfig {
    /// CSV endpoint; symbol and field selectors are appended as query parameters.
    pub base_url: String,
    /// Whole-request timeout.
    pub timeout_secs: u64,
}

impl Default for QuotesConfig {
    fn default() -> Self {
        Self {
            base_url: "https://stooq.com/q/l/".to_string(),
            timeout_secs: 10,
        }
    }
}
