//! Results relay.
//!
//! Brings worker results back into the chat: each [`ResultMessage`] is
//! recorded as a bot message, broadcast to every viewer and only then
//! acknowledged. A crash between broadcast and ack redelivers the result,
//! which shows up as a duplicate chat line.

use std::sync::Arc;

use chrono::Utc;
use futures::StreamExt;
use log::{debug, error, info, warn};
use quotechat_protocol::{BroadcastMessage, ResultMessage};

use crate::chat::{MessageStore, NewMessage};
use crate::queue::{Delivery, Queue, QueueError};
use crate::ws::Hub;

pub struct Relay {
    results: Arc<dyn Queue>,
    hub: Hub,
    store: Arc<dyn MessageStore>,
}

impl Relay {
    pub fn new(results: Arc<dyn Queue>, hub: Hub, store: Arc<dyn MessageStore>) -> Self {
        Self {
            results,
            hub,
            store,
        }
    }

    /// Consume the results queue until the stream ends.
    pub async fn run(&self) -> Result<(), QueueError> {
        let mut deliveries = self.results.consume(false).await?;
        info!("Relaying results from '{}'", self.results.name());

        while let Some(next) = deliveries.next().await {
            match next {
                Ok(delivery) => self.handle_delivery(delivery).await,
                Err(err) => warn!("Error receiving result: {}", err),
            }
        }

        Err(QueueError::Closed(self.results.name().to_string()))
    }

    pub async fn handle_delivery(&self, delivery: Delivery) {
        let result: ResultMessage = match serde_json::from_slice(delivery.payload()) {
            Ok(result) => result,
            Err(err) => {
                error!("Discarding malformed result: {}", err);
                if let Err(err) = delivery.ack().await {
                    warn!("Failed to ack malformed result: {}", err);
                }
                return;
            }
        };

        let now = Utc::now();
        if let Err(err) = self.store.save(NewMessage::from_bot(&result.content, now)).await {
            error!("Failed to record bot message: {:#}", err);
        }

        debug!("Relaying bot message: {}", result.content);
        self.hub.broadcast(BroadcastMessage::from_bot(result.content, now)).await;

        if let Err(err) = delivery.ack().await {
            warn!("Failed to ack result: {}", err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::StoredMessage;
    use crate::queue::{DeliveryStream, MemoryQueue};
    use crate::ws::{HubConfig, Viewer};
    use anyhow::{Result, bail};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use quotechat_protocol::{BOT_LABEL, BOT_USER_ID};
    use std::time::Duration;
    use tokio::time::timeout;

    #[derive(Default)]
    struct RecordingStore {
        saved: Mutex<Vec<NewMessage>>,
        fail: bool,
    }

    #[async_trait]
    impl MessageStore for RecordingStore {
        async fn save(&self, message: NewMessage) -> Result<StoredMessage> {
            if self.fail {
                bail!("disk full");
            }
            let mut saved = self.saved.lock();
            saved.push(message.clone());
            Ok(StoredMessage {
                id: saved.len() as i64,
                user_id: message.user_id,
                username: BOT_LABEL.to_string(),
                content: message.content,
                created_at: message.created_at,
                is_bot: message.is_bot,
            })
        }

        async fn recent(&self, _limit: i64) -> Result<Vec<StoredMessage>> {
            Ok(Vec::new())
        }
    }

    async fn next_delivery(queue: &MemoryQueue) -> Delivery {
        let mut deliveries = queue.consume(false).await.unwrap();
        timeout(Duration::from_secs(1), deliveries.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn test_result_is_recorded_broadcast_and_acked() {
        let results = MemoryQueue::new("chat_messages");
        let hub = Hub::start(HubConfig::default());
        let store = Arc::new(RecordingStore::default());
        let relay = Relay::new(Arc::new(results.clone()), hub.clone(), store.clone());
        let mut viewer = hub.register(Viewer::user(7, "alice")).await;

        let payload = serde_json::to_vec(&ResultMessage::new("AAPL quote is $150.00 per share")).unwrap();
        results.publish(&payload).await.unwrap();
        relay.handle_delivery(next_delivery(&results).await).await;

        let received = timeout(Duration::from_secs(1), viewer.outbound.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received.content, "AAPL quote is $150.00 per share");
        assert_eq!(received.user, BOT_LABEL);
        assert_eq!(received.user_id, Some(BOT_USER_ID));

        let saved = store.saved.lock();
        assert_eq!(saved.len(), 1);
        assert!(saved[0].is_bot);
        assert_eq!(results.ready_len(), 0);
        assert_eq!(results.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_store_failure_still_broadcasts() {
        let results = MemoryQueue::new("chat_messages");
        let hub = Hub::start(HubConfig::default());
        let store = Arc::new(RecordingStore {
            fail: true,
            ..Default::default()
        });
        let relay = Relay::new(Arc::new(results.clone()), hub.clone(), store);
        let mut viewer = hub.register(Viewer::anonymous()).await;

        let payload = serde_json::to_vec(&ResultMessage::new("hello")).unwrap();
        results.publish(&payload).await.unwrap();
        relay.handle_delivery(next_delivery(&results).await).await;

        let received = timeout(Duration::from_secs(1), viewer.outbound.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received.content, "hello");
        assert_eq!(results.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_malformed_result_is_acked_and_dropped() {
        let results = MemoryQueue::new("chat_messages");
        let hub = Hub::start(HubConfig::default());
        let store = Arc::new(RecordingStore::default());
        let relay = Relay::new(Arc::new(results.clone()), hub.clone(), store.clone());
        let mut viewer = hub.register(Viewer::user(7, "alice")).await;

        results.publish(b"[1,2,3]").await.unwrap();
        relay.handle_delivery(next_delivery(&results).await).await;

        assert!(
            timeout(Duration::from_millis(100), viewer.outbound.recv())
                .await
                .is_err()
        );
        assert!(store.saved.lock().is_empty());
        assert_eq!(results.ready_len(), 0);
        assert_eq!(results.in_flight(), 0);
    }

    struct EndedQueue;

    #[async_trait]
    impl Queue for EndedQueue {
        fn name(&self) -> &str {
            "chat_messages"
        }

        async fn publish(&self, _payload: &[u8]) -> Result<(), QueueError> {
            Ok(())
        }

        async fn consume(&self, _auto_ack: bool) -> Result<DeliveryStream, QueueError> {
            Ok(futures::stream::empty().boxed())
        }
    }

    #[tokio::test]
    async fn test_run_reports_closed_stream() {
        let hub = Hub::start(HubConfig::default());
        let relay = Relay::new(
            Arc::new(EndedQueue),
            hub,
            Arc::new(RecordingStore::default()),
        );

        let result = timeout(Duration::from_secs(1), relay.run()).await.unwrap();
        assert!(matches!(result, Err(QueueError::Closed(name)) if name == "chat_messages"));
    }
}
