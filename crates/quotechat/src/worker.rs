//! Stock command worker.
//!
//! Consumes [`CommandJob`]s, resolves each through a [`QuoteSource`] and
//! publishes exactly one [`ResultMessage`] per decoded job. A job is only
//! acknowledged once its result is on the results queue; if that publish
//! fails the job is put back and looked up again later.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use log::{debug, error, info, warn};
use quotechat_protocol::{CommandJob, ResultMessage};
use serde::{Deserialize, Serialize};

use crate::queue::{Delivery, Queue, QueueError};
use crate::quote::QuoteSource;

/// Worker settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Pause before handing a job back after its result could not be published.
    ///
    /// The worker handles one delivery at a time, so this also holds back
    /// every other queued job. It paces retries while the results queue is
    /// down; keep it short.
    pub requeue_delay_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            requeue_delay_ms: 1000,
        }
    }
}

/// What happened to one command delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Result published and job acknowledged.
    Published,
    /// Result could not be published; job handed back for redelivery.
    Requeued,
    /// Payload was not a command; acknowledged and dropped.
    Discarded,
}

pub struct CommandWorker {
    commands: Arc<dyn Queue>,
    results: Arc<dyn Queue>,
    quotes: Arc<dyn QuoteSource>,
    config: WorkerConfig,
}

impl CommandWorker {
    pub fn new(
        commands: Arc<dyn Queue>,
        results: Arc<dyn Queue>,
        quotes: Arc<dyn QuoteSource>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            commands,
            results,
            quotes,
            config,
        }
    }

    /// Consume the commands queue until the stream ends.
    ///
    /// Only returns on a closed stream or a failure to start consuming.
    pub async fn run(&self) -> Result<(), QueueError> {
        let mut deliveries = self.commands.consume(false).await?;
        info!(
            "Command worker consuming '{}', publishing to '{}'",
            self.commands.name(),
            self.results.name()
        );

        while let Some(next) = deliveries.next().await {
            match next {
                Ok(delivery) => {
                    self.handle_delivery(delivery).await;
                }
                Err(err) => warn!("Error receiving command: {}", err),
            }
        }

        Err(QueueError::Closed(self.commands.name().to_string()))
    }

    /// Turn a job into its chat result. Lookup failures become error text.
    pub async fn resolve(&self, job: &CommandJob) -> ResultMessage {
        match self.quotes.fetch_quote(&job.stock_code).await {
            Ok(quote) => ResultMessage::new(quote.announcement()),
            Err(err) => {
                warn!("Quote lookup for {} failed: {}", job.stock_code, err);
                ResultMessage::new(format!(
                    "Error fetching quote for {}: {}",
                    job.stock_code, err
                ))
            }
        }
    }

    pub async fn handle_delivery(&self, delivery: Delivery) -> Disposition {
        let job: CommandJob = match serde_json::from_slice(delivery.payload()) {
            Ok(job) => job,
            Err(err) => {
                error!("Discarding malformed command: {}", err);
                if let Err(err) = delivery.ack().await {
                    warn!("Failed to ack malformed command: {}", err);
                }
                return Disposition::Discarded;
            }
        };

        debug!(
            "Processing /stock={} for user {} (redelivered: {})",
            job.stock_code,
            job.user_id,
            delivery.is_redelivered()
        );

        let result = self.resolve(&job).await;
        let published = match serde_json::to_vec(&result) {
            Ok(payload) => self.results.publish(&payload).await,
            Err(err) => Err(QueueError::Transport(err.to_string())),
        };

        match published {
            Ok(()) => {
                if let Err(err) = delivery.ack().await {
                    warn!("Failed to ack command {}: {}", job.stock_code, err);
                }
                Disposition::Published
            }
            Err(err) => {
                error!(
                    "Failed to publish result for {}: {}; requeueing job",
                    job.stock_code, err
                );
                tokio::time::sleep(Duration::from_millis(self.config.requeue_delay_ms)).await;
                if let Err(err) = delivery.nack(true).await {
                    warn!("Failed to requeue command {}: {}", job.stock_code, err);
                }
                Disposition::Requeued
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{DeliveryStream, MemoryQueue};
    use crate::quote::{Quote, QuoteError};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use tokio::time::timeout;

    struct StubQuotes(HashMap<String, Result<Quote, QuoteError>>);

    impl StubQuotes {
        fn new() -> Self {
            Self(HashMap::new())
        }

        fn with(mut self, symbol: &str, result: Result<Quote, QuoteError>) -> Self {
            self.0.insert(symbol.to_string(), result);
            self
        }
    }

    #[async_trait]
    impl QuoteSource for StubQuotes {
        async fn fetch_quote(&self, symbol: &str) -> Result<Quote, QuoteError> {
            self.0.get(symbol).cloned().unwrap_or(Err(QuoteError::NotFound))
        }
    }

    struct FailingQueue;

    #[async_trait]
    impl Queue for FailingQueue {
        fn name(&self) -> &str {
            "failing"
        }

        async fn publish(&self, _payload: &[u8]) -> Result<(), QueueError> {
            Err(QueueError::Transport("connection reset".into()))
        }

        async fn consume(&self, _auto_ack: bool) -> Result<DeliveryStream, QueueError> {
            Err(QueueError::Transport("connection reset".into()))
        }
    }

    fn worker(
        commands: &MemoryQueue,
        results: Arc<dyn Queue>,
        quotes: StubQuotes,
    ) -> CommandWorker {
        CommandWorker::new(
            Arc::new(commands.clone()),
            results,
            Arc::new(quotes),
            WorkerConfig {
                requeue_delay_ms: 0,
            },
        )
    }

    async fn next_delivery(queue: &MemoryQueue) -> Delivery {
        let mut deliveries = queue.consume(false).await.unwrap();
        timeout(Duration::from_secs(1), deliveries.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap()
    }

    fn take_result(queue: &MemoryQueue) -> ResultMessage {
        serde_json::from_slice(&queue.take_ready().expect("no result published")).unwrap()
    }

    #[tokio::test]
    async fn test_successful_lookup_publishes_quote() {
        let commands = MemoryQueue::new("stock_commands");
        let results = MemoryQueue::new("chat_messages");
        let quotes = StubQuotes::new().with("aapl", Ok(Quote::new("aapl", "150.00")));
        let worker = worker(&commands, Arc::new(results.clone()), quotes);

        let payload = serde_json::to_vec(&CommandJob::new(7, "aapl")).unwrap();
        commands.publish(&payload).await.unwrap();

        let disposition = worker.handle_delivery(next_delivery(&commands).await).await;
        assert_eq!(disposition, Disposition::Published);
        assert_eq!(
            take_result(&results),
            ResultMessage::new("AAPL quote is $150.00 per share")
        );
        assert_eq!(commands.ready_len(), 0);
        assert_eq!(commands.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_not_found_publishes_error_and_acks() {
        let commands = MemoryQueue::new("stock_commands");
        let results = MemoryQueue::new("chat_messages");
        let worker = worker(&commands, Arc::new(results.clone()), StubQuotes::new());

        let payload = serde_json::to_vec(&CommandJob::new(7, "nope")).unwrap();
        commands.publish(&payload).await.unwrap();

        let disposition = worker.handle_delivery(next_delivery(&commands).await).await;
        assert_eq!(disposition, Disposition::Published);
        let result = take_result(&results);
        assert!(result.content.contains("nope"));
        assert_eq!(
            result.content,
            "Error fetching quote for nope: stock quote not found"
        );
        assert_eq!(commands.ready_len(), 0);
    }

    #[tokio::test]
    async fn test_no_data_is_reported() {
        let commands = MemoryQueue::new("stock_commands");
        let results = MemoryQueue::new("chat_messages");
        let quotes = StubQuotes::new().with("zzzz", Err(QuoteError::NoData("zzzz".into())));
        let worker = worker(&commands, Arc::new(results.clone()), quotes);

        let result = worker.resolve(&CommandJob::new(3, "zzzz")).await;
        assert_eq!(
            result.content,
            "Error fetching quote for zzzz: no data for stock zzzz"
        );
    }

    #[tokio::test]
    async fn test_malformed_command_is_discarded() {
        let commands = MemoryQueue::new("stock_commands");
        let results = MemoryQueue::new("chat_messages");
        let worker = worker(&commands, Arc::new(results.clone()), StubQuotes::new());

        commands.publish(b"{not json").await.unwrap();

        let disposition = worker.handle_delivery(next_delivery(&commands).await).await;
        assert_eq!(disposition, Disposition::Discarded);
        assert_eq!(results.ready_len(), 0);
        assert_eq!(commands.ready_len(), 0);
        assert_eq!(commands.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_publish_failure_requeues_job() {
        let commands = MemoryQueue::new("stock_commands");
        let quotes = StubQuotes::new().with("aapl", Ok(Quote::new("aapl", "150.00")));
        let worker = worker(&commands, Arc::new(FailingQueue), quotes);

        let payload = serde_json::to_vec(&CommandJob::new(7, "aapl")).unwrap();
        commands.publish(&payload).await.unwrap();

        let disposition = worker.handle_delivery(next_delivery(&commands).await).await;
        assert_eq!(disposition, Disposition::Requeued);
        assert_eq!(commands.ready_len(), 1);

        let again = next_delivery(&commands).await;
        assert!(again.is_redelivered());
    }

    #[tokio::test]
    async fn test_requeue_waits_for_delay() {
        let commands = MemoryQueue::new("stock_commands");
        let quotes = StubQuotes::new().with("aapl", Ok(Quote::new("aapl", "150.00")));
        let worker = CommandWorker::new(
            Arc::new(commands.clone()),
            Arc::new(FailingQueue),
            Arc::new(quotes),
            WorkerConfig {
                requeue_delay_ms: 50,
            },
        );

        let payload = serde_json::to_vec(&CommandJob::new(7, "aapl")).unwrap();
        commands.publish(&payload).await.unwrap();
        let delivery = next_delivery(&commands).await;

        let started = tokio::time::Instant::now();
        let disposition = worker.handle_delivery(delivery).await;
        assert_eq!(disposition, Disposition::Requeued);
        assert!(started.elapsed() >= Duration::from_millis(50));
        assert_eq!(commands.ready_len(), 1);
        assert_eq!(commands.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_run_processes_queue() {
        let commands = MemoryQueue::new("stock_commands");
        let results = MemoryQueue::new("chat_messages");
        let quotes = StubQuotes::new().with("msft", Ok(Quote::new("msft", "410.5")));
        let worker = Arc::new(worker(&commands, Arc::new(results.clone()), quotes));

        let handle = tokio::spawn({
            let worker = Arc::clone(&worker);
            async move { worker.run().await }
        });

        let payload = serde_json::to_vec(&CommandJob::new(2, "msft")).unwrap();
        commands.publish(&payload).await.unwrap();

        let mut published = results.consume(true).await.unwrap();
        let delivery = timeout(Duration::from_secs(1), published.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        let result: ResultMessage = serde_json::from_slice(delivery.payload()).unwrap();
        assert_eq!(result.content, "MSFT quote is $410.5 per share");

        handle.abort();
    }
}
