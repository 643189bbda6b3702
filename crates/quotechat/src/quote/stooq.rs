//! Stooq CSV quote client.

use std::time::Duration;

use async_trait::async_trait;
use log::debug;

use super::{Quote, QuoteError, QuoteSource, QuotesConfig};

/// Column holding the close price in `f=sd2t2ohlcv` output.
const CLOSE_COLUMN: usize = 6;
/// Placeholder Stooq uses for missing values.
const NO_DATA: &str = "N/D";

pub struct StooqClient {
    http: reqwest::Client,
    base_url: String,
}

impl StooqClient {
    pub fn new(config: &QuotesConfig) -> Result<Self, QuoteError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            http,
            base_url: config.base_url.clone(),
        })
    }

    fn quote_url(&self, symbol: &str) -> String {
        format!(
            "{}?s={}&f=sd2t2ohlcv&h&e=csv",
            self.base_url,
            urlencoding::encode(symbol)
        )
    }
}

#[async_trait]
impl QuoteSource for StooqClient {
    async fn fetch_quote(&self, symbol: &str) -> Result<Quote, QuoteError> {
        let url = self.quote_url(symbol);
        debug!("Fetching quote: {}", url);

        let response = self.http.get(&url).send().await?.error_for_status()?;
        let body = response.text().await?;
        parse_quote_csv(symbol, &body)
    }
}

/// Parse a Stooq CSV body (header plus one record) into a quote.
///
/// The close price is kept as the provider wrote it.
pub fn parse_quote_csv(symbol: &str, body: &str) -> Result<Quote, QuoteError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(body.as_bytes());

    let record = match reader.records().next() {
        Some(record) => record.map_err(|err| QuoteError::Malformed(err.to_string()))?,
        None => return Err(QuoteError::NotFound),
    };

    let close = record
        .get(CLOSE_COLUMN)
        .map(str::trim)
        .ok_or_else(|| QuoteError::Malformed(format!("expected {} columns", CLOSE_COLUMN + 1)))?;

    if close == NO_DATA || close.is_empty() {
        return Err(QuoteError::NoData(symbol.to_string()));
    }

    Ok(Quote::new(symbol, close))
}
