//! In-process queue backend.
//!
//! Mirrors broker semantics closely enough for tests: an unsettled delivery
//! that is dropped goes back to the front of the queue, flagged as
//! redelivered.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream;
use log::debug;
use parking_lot::Mutex;
use tokio::sync::Notify;

use super::{Acker, Delivery, DeliveryStream, Queue, QueueError};

#[derive(Debug, Clone)]
struct Envelope {
    payload: Vec<u8>,
    redelivered: bool,
}

#[derive(Default)]
struct Shared {
    ready: Mutex<VecDeque<Envelope>>,
    available: Notify,
    in_flight: AtomicUsize,
}

impl Shared {
    fn push_back(&self, envelope: Envelope) {
        self.ready.lock().push_back(envelope);
        self.available.notify_one();
    }

    fn push_front(&self, envelope: Envelope) {
        self.ready.lock().push_front(envelope);
        self.available.notify_one();
    }

    async fn next(&self) -> Envelope {
        loop {
            let next = self.ready.lock().pop_front();
            if let Some(envelope) = next {
                return envelope;
            }
            self.available.notified().await;
        }
    }
}

/// Settle handle for a delivery that is still in flight.
pub(crate) struct Pending {
    shared: Arc<Shared>,
    envelope: Option<Envelope>,
}

impl Pending {
    pub(crate) fn settle(mut self) {
        self.envelope = None;
    }

    pub(crate) fn requeue(mut self) {
        if let Some(mut envelope) = self.envelope.take() {
            envelope.redelivered = true;
            self.shared.push_front(envelope);
        }
    }
}

impl Drop for Pending {
    fn drop(&mut self) {
        if let Some(mut envelope) = self.envelope.take() {
            debug!("Unsettled delivery dropped, requeueing");
            envelope.redelivered = true;
            self.shared.push_front(envelope);
        }
        self.shared.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// An in-process queue. Clones share the same messages.
#[derive(Clone)]
pub struct MemoryQueue {
    name: String,
    shared: Arc<Shared>,
}

impl MemoryQueue {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            shared: Arc::new(Shared::default()),
        }
    }

    /// Messages waiting to be delivered.
    pub fn ready_len(&self) -> usize {
        self.shared.ready.lock().len()
    }

    /// Messages handed out and not yet settled.
    pub fn in_flight(&self) -> usize {
        self.shared.in_flight.load(Ordering::SeqCst)
    }

    /// Remove and return the next waiting payload without a consumer.
    pub fn take_ready(&self) -> Option<Vec<u8>> {
        self.shared
            .ready
            .lock()
            .pop_front()
            .map(|envelope| envelope.payload)
    }
}

#[async_trait]
impl Queue for MemoryQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn publish(&self, payload: &[u8]) -> Result<(), QueueError> {
        self.shared.push_back(Envelope {
            payload: payload.to_vec(),
            redelivered: false,
        });
        Ok(())
    }

    async fn consume(&self, auto_ack: bool) -> Result<DeliveryStream, QueueError> {
        let shared = Arc::clone(&self.shared);
        let deliveries = stream::unfold(shared, move |shared| async move {
            let envelope = shared.next().await;
            let acker = if auto_ack {
                Acker::Auto
            } else {
                shared.in_flight.fetch_add(1, Ordering::SeqCst);
                Acker::Memory(Pending {
                    shared: Arc::clone(&shared),
                    envelope: Some(envelope.clone()),
                })
            };
            let delivery = Delivery::new(envelope.payload, envelope.redelivered, acker);
            Some((Ok(delivery), shared))
        });
        Ok(deliveries.boxed())
    }
}
