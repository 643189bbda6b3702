//! Connection registry and broadcast hub.
//!
//! Every viewer gets a bounded outbound buffer. One dispatch task drains the
//! hub inbox and offers each message to every registered connection with a
//! non-blocking send. A connection whose buffer is full is considered too slow:
//! it is removed from the registry and its buffer closed, so one stalled viewer
//! never holds up the others.
//!
//! Connection lifecycle:
//!
//! ```text
//! Connecting -> Registered -> (Draining | Closing) -> Removed
//! ```
//!
//! `Removed` is terminal. It is reached on a read error, a write error, a full
//! buffer or an explicit close, and a removed id is never handed out again.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use log::{debug, info, warn};
use quotechat_protocol::{ANONYMOUS_LABEL, BroadcastMessage};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Mutex, mpsc};

/// Default size of the per-connection send buffer.
pub const DEFAULT_CONNECTION_BUFFER: usize = 64;

/// Default size of the hub inbox.
pub const DEFAULT_INBOX_BUFFER: usize = 256;

/// Message as queued for a connection. Shared between all receivers.
pub type Outbound = Arc<BroadcastMessage>;

/// Hub sizing.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Messages buffered per connection before it is dropped as too slow.
    pub connection_buffer: usize,
    /// Messages buffered ahead of the dispatch task.
    pub inbox_buffer: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            connection_buffer: DEFAULT_CONNECTION_BUFFER,
            inbox_buffer: DEFAULT_INBOX_BUFFER,
        }
    }
}

/// Opaque identity of a registered connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// The user behind a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Viewer {
    /// `None` for anonymous viewers.
    pub user_id: Option<i64>,
    pub username: String,
}

impl Viewer {
    pub fn user(user_id: i64, username: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id),
            username: username.into(),
        }
    }

    pub fn anonymous() -> Self {
        Self {
            user_id: None,
            username: ANONYMOUS_LABEL.to_string(),
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.user_id.is_none()
    }
}

/// Handed to the caller of [`Registry::register`].
///
/// The caller owns the receiving end of the outbound buffer and must drain it
/// to the transport. `None` from the receiver means the hub dropped the
/// connection.
#[derive(Debug)]
pub struct Subscription {
    pub id: ConnectionId,
    pub viewer: Viewer,
    pub outbound: mpsc::Receiver<Outbound>,
}

/// What happened to one broadcast.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Connections that accepted the message.
    pub delivered: usize,
    /// Connections skipped because they authored the message.
    pub skipped: usize,
    /// Connections removed because their buffer was full or closed.
    pub dropped: Vec<ConnectionId>,
}

struct Registration {
    viewer: Viewer,
    tx: mpsc::Sender<Outbound>,
}

/// The set of live connections.
///
/// Membership changes and broadcast iteration all happen under one lock.
pub struct Registry {
    connections: Mutex<HashMap<ConnectionId, Registration>>,
    next_id: AtomicU64,
    buffer: usize,
}

impl Registry {
    /// Create an empty registry whose connections buffer `buffer` messages.
    pub fn new(buffer: usize) -> Self {
        Self {
            connections: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            buffer: buffer.max(1),
        }
    }

    /// Register a new connection. Always succeeds.
    pub async fn register(&self, viewer: Viewer) -> Subscription {
        let (tx, rx) = mpsc::channel(self.buffer);
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));

        let mut connections = self.connections.lock().await;
        connections.insert(
            id,
            Registration {
                viewer: viewer.clone(),
                tx,
            },
        );
        info!(
            "Registered connection {} for {} ({} live)",
            id,
            viewer.username,
            connections.len()
        );

        Subscription {
            id,
            viewer,
            outbound: rx,
        }
    }

    /// Remove a connection. Returns `false` if it was already gone.
    pub async fn unregister(&self, id: ConnectionId) -> bool {
        let mut connections = self.connections.lock().await;
        match connections.remove(&id) {
            Some(registration) => {
                info!(
                    "Unregistered connection {} for {} ({} live)",
                    id,
                    registration.viewer.username,
                    connections.len()
                );
                true
            }
            None => {
                debug!("Connection {} already unregistered", id);
                false
            }
        }
    }

    pub async fn contains(&self, id: ConnectionId) -> bool {
        self.connections.lock().await.contains_key(&id)
    }

    pub async fn len(&self) -> usize {
        self.connections.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Offer `message` to every connection except its author.
    ///
    /// Never waits on a connection: a full or closed buffer removes the
    /// connection instead.
    pub async fn deliver(&self, message: &Outbound) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        let mut connections = self.connections.lock().await;

        connections.retain(|id, registration| {
            if message.is_authored_by(registration.viewer.user_id) {
                report.skipped += 1;
                return true;
            }

            match registration.tx.try_send(Arc::clone(message)) {
                Ok(()) => {
                    report.delivered += 1;
                    true
                }
                Err(TrySendError::Full(_)) => {
                    warn!(
                        "Connection {} for {} is not keeping up, dropping it",
                        id, registration.viewer.username
                    );
                    report.dropped.push(*id);
                    false
                }
                Err(TrySendError::Closed(_)) => {
                    debug!("Connection {} closed its buffer, removing it", id);
                    report.dropped.push(*id);
                    false
                }
            }
        });

        report
    }
}

/// Handle to the broadcast hub. Cheap to clone.
///
/// Dropping the last handle stops the dispatch task.
#[derive(Clone)]
pub struct Hub {
    registry: Arc<Registry>,
    inbox: mpsc::Sender<BroadcastMessage>,
}

impl Hub {
    /// Create a hub and spawn its dispatch task on the current runtime.
    pub fn start(config: HubConfig) -> Self {
        let registry = Arc::new(Registry::new(config.connection_buffer));
        let (inbox, rx) = mpsc::channel(config.inbox_buffer.max(1));
        tokio::spawn(dispatch(Arc::clone(&registry), rx));
        Self { registry, inbox }
    }

    pub async fn register(&self, viewer: Viewer) -> Subscription {
        self.registry.register(viewer).await
    }

    pub async fn unregister(&self, id: ConnectionId) -> bool {
        self.registry.unregister(id).await
    }

    /// Queue `message` for every connection except its author.
    pub async fn broadcast(&self, message: BroadcastMessage) {
        if self.inbox.send(message).await.is_err() {
            warn!("Hub dispatcher has stopped, dropping broadcast");
        }
    }

    pub async fn connection_count(&self) -> usize {
        self.registry.len().await
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }
}

async fn dispatch(registry: Arc<Registry>, mut inbox: mpsc::Receiver<BroadcastMessage>) {
    while let Some(message) = inbox.recv().await {
        let message = Arc::new(message);
        let report = registry.deliver(&message).await;
        debug!(
            "Broadcast from {}: delivered={} skipped={} dropped={}",
            message.user,
            report.delivered,
            report.skipped,
            report.dropped.len()
        );
    }
    debug!("Hub inbox closed, dispatcher exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::time::Duration;
    use tokio::sync::mpsc::error::TryRecvError;
    use tokio::time::timeout;

    fn message(content: &str, author: Option<i64>) -> Outbound {
        Arc::new(BroadcastMessage::new(content, "someone", author, Utc::now()))
    }

    #[tokio::test]
    async fn test_deliver_skips_only_the_author() {
        let registry = Registry::new(8);
        let mut alice = registry.register(Viewer::user(1, "alice")).await;
        let mut bob = registry.register(Viewer::user(2, "bob")).await;
        let mut carol = registry.register(Viewer::user(3, "carol")).await;
        let mut guest = registry.register(Viewer::anonymous()).await;

        let report = registry.deliver(&message("hi", Some(1))).await;

        assert_eq!(report.delivered, 3);
        assert_eq!(report.skipped, 1);
        assert!(report.dropped.is_empty());
        assert!(matches!(alice.outbound.try_recv(), Err(TryRecvError::Empty)));
        assert_eq!(bob.outbound.try_recv().unwrap().content, "hi");
        assert_eq!(carol.outbound.try_recv().unwrap().content, "hi");
        assert_eq!(guest.outbound.try_recv().unwrap().content, "hi");
    }

    #[tokio::test]
    async fn test_every_connection_of_the_author_is_skipped() {
        let registry = Registry::new(8);
        let mut laptop = registry.register(Viewer::user(5, "dave")).await;
        let mut phone = registry.register(Viewer::user(5, "dave")).await;
        let mut other = registry.register(Viewer::user(6, "erin")).await;

        let report = registry.deliver(&message("from dave", Some(5))).await;

        assert_eq!(report.skipped, 2);
        assert!(laptop.outbound.try_recv().is_err());
        assert!(phone.outbound.try_recv().is_err());
        assert_eq!(other.outbound.try_recv().unwrap().content, "from dave");
    }

    #[tokio::test]
    async fn test_anonymous_messages_reach_everyone() {
        let registry = Registry::new(8);
        let mut guest = registry.register(Viewer::anonymous()).await;
        let mut alice = registry.register(Viewer::user(1, "alice")).await;

        let report = registry.deliver(&message("system", None)).await;

        assert_eq!(report.delivered, 2);
        assert!(guest.outbound.try_recv().is_ok());
        assert!(alice.outbound.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_full_buffer_drops_connection_once() {
        let registry = Registry::new(1);
        let mut slow = registry.register(Viewer::user(1, "slow")).await;
        let mut fast = registry.register(Viewer::user(2, "fast")).await;

        registry.deliver(&message("m1", None)).await;
        assert_eq!(fast.outbound.try_recv().unwrap().content, "m1");

        let report = timeout(Duration::from_millis(100), registry.deliver(&message("m2", None)))
            .await
            .expect("deliver must not block on a full buffer");

        assert_eq!(report.dropped, vec![slow.id]);
        assert_eq!(report.delivered, 1);
        assert!(!registry.contains(slow.id).await);
        assert!(registry.contains(fast.id).await);
        assert!(!registry.unregister(slow.id).await);

        // The slow viewer keeps what it had buffered, then sees the close.
        assert_eq!(slow.outbound.recv().await.unwrap().content, "m1");
        assert!(slow.outbound.recv().await.is_none());
        assert_eq!(fast.outbound.try_recv().unwrap().content, "m2");

        let report = registry.deliver(&message("m3", None)).await;
        assert!(report.dropped.is_empty());
    }

    #[tokio::test]
    async fn test_closed_receiver_is_removed() {
        let registry = Registry::new(4);
        let gone = registry.register(Viewer::user(1, "gone")).await;
        let id = gone.id;
        drop(gone);

        let report = registry.deliver(&message("hello", None)).await;

        assert_eq!(report.dropped, vec![id]);
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_unregister_is_idempotent() {
        let registry = Registry::new(4);
        let sub = registry.register(Viewer::user(1, "alice")).await;

        assert!(registry.unregister(sub.id).await);
        assert!(!registry.unregister(sub.id).await);
        assert!(!registry.contains(sub.id).await);
        assert_eq!(registry.len().await, 0);
    }

    #[tokio::test]
    async fn test_connection_ids_are_not_reused() {
        let registry = Registry::new(4);
        let first = registry.register(Viewer::anonymous()).await;
        registry.unregister(first.id).await;
        let second = registry.register(Viewer::anonymous()).await;
        assert_ne!(first.id, second.id);
    }

    #[tokio::test]
    async fn test_hub_preserves_broadcast_order() {
        let hub = Hub::start(HubConfig::default());
        let mut viewer = hub.register(Viewer::user(2, "bob")).await;

        for i in 0..20 {
            hub.broadcast(BroadcastMessage::new(format!("m{i}"), "alice", Some(1), Utc::now()))
                .await;
        }

        for i in 0..20 {
            let received = timeout(Duration::from_secs(1), viewer.outbound.recv())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(received.content, format!("m{i}"));
        }
    }

    #[tokio::test]
    async fn test_hub_does_not_echo_to_author() {
        let hub = Hub::start(HubConfig::default());
        let mut alice = hub.register(Viewer::user(1, "alice")).await;
        let mut bob = hub.register(Viewer::user(2, "bob")).await;

        hub.broadcast(BroadcastMessage::new("hi", "alice", Some(1), Utc::now()))
            .await;
        hub.broadcast(BroadcastMessage::new("hey", "bob", Some(2), Utc::now()))
            .await;

        let at_bob = timeout(Duration::from_secs(1), bob.outbound.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(at_bob.content, "hi");
        assert_eq!(at_bob.user, "alice");

        let at_alice = timeout(Duration::from_secs(1), alice.outbound.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(at_alice.content, "hey");

        assert!(alice.outbound.try_recv().is_err());
        assert!(bob.outbound.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_slow_viewer_does_not_stall_hub() {
        let hub = Hub::start(HubConfig {
            connection_buffer: 2,
            inbox_buffer: 4,
        });
        let stalled = hub.register(Viewer::user(1, "stalled")).await;
        let mut live = hub.register(Viewer::user(2, "live")).await;

        for i in 0..10 {
            hub.broadcast(BroadcastMessage::new(format!("m{i}"), "bot", None, Utc::now()))
                .await;
            let received = timeout(Duration::from_secs(1), live.outbound.recv())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(received.content, format!("m{i}"));
        }

        assert!(!hub.registry().contains(stalled.id).await);
        assert_eq!(hub.connection_count().await, 1);
    }
}
