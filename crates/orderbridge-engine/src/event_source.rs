use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, warn};

use orderbridge_core::events::ChangeEvent;
use orderbridge_core::ids::SubscriptionId;

/// Default fan-out buffer. A listener that falls further behind loses the
/// oldest events and is told how many.
pub const DEFAULT_CAPACITY: usize = 1024;

/// Shared read-only fan-out of decoded change events.
///
/// Listeners only see events emitted after they subscribed; nothing is
/// queued for future listeners.
#[derive(Clone)]
pub struct EventSource {
    topic: Arc<str>,
    tx: broadcast::Sender<Arc<ChangeEvent>>,
}

impl EventSource {
    pub fn new(topic: &str, capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            topic: Arc::from(topic),
            tx,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn subscribe(&self) -> EventSubscription {
        let subscription = EventSubscription {
            id: SubscriptionId::new(),
            rx: self.tx.subscribe(),
        };
        debug!(
            subscription_id = %subscription.id,
            topic = %self.topic,
            listeners = self.listener_count(),
            "listener attached"
        );
        subscription
    }

    /// Listeners currently attached.
    pub fn listener_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Deliver to every attached listener. Returns how many were attached.
    pub fn emit(&self, event: ChangeEvent) -> usize {
        self.tx.send(Arc::new(event)).unwrap_or(0)
    }
}

/// A listener on an [`EventSource`]. Dropping it (or calling `cancel`)
/// detaches the listener immediately.
pub struct EventSubscription {
    id: SubscriptionId,
    rx: broadcast::Receiver<Arc<ChangeEvent>>,
}

impl EventSubscription {
    pub fn id(&self) -> &SubscriptionId {
        &self.id
    }

    /// Next event in emission order. `None` once the source is gone.
    pub async fn recv(&mut self) -> Option<Arc<ChangeEvent>> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(subscription_id = %self.id, skipped, "listener lagged, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    pub fn cancel(self) {}
}

impl Drop for EventSubscription {
    fn drop(&mut self) {
        debug!(subscription_id = %self.id, "listener detached");
    }
}
