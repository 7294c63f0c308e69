use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::mpsc;

use orderbridge_core::ids::SessionId;

pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
pub const CLIENT_TIMEOUT: Duration = Duration::from_secs(90);

/// Outbound half of one connected session.
pub struct Client {
    pub id: SessionId,
    tx: mpsc::Sender<String>,
    last_pong: AtomicU64,
}

impl Client {
    fn new(id: SessionId, tx: mpsc::Sender<String>) -> Self {
        Self {
            id,
            tx,
            last_pong: AtomicU64::new(now_secs()),
        }
    }

    pub fn record_pong(&self) {
        self.last_pong.store(now_secs(), Ordering::Relaxed);
    }

    pub fn is_alive(&self, timeout: Duration) -> bool {
        let last = self.last_pong.load(Ordering::Relaxed);
        now_secs().saturating_sub(last) < timeout.as_secs()
    }
}

fn now_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Every session with an open socket, keyed by session id.
pub struct ClientRegistry {
    clients: DashMap<SessionId, Arc<Client>>,
    max_send_queue: usize,
    client_timeout: Duration,
}

impl ClientRegistry {
    pub fn new(max_send_queue: usize) -> Self {
        Self {
            clients: DashMap::new(),
            max_send_queue: max_send_queue.max(1),
            client_timeout: CLIENT_TIMEOUT,
        }
    }

    pub fn with_client_timeout(mut self, timeout: Duration) -> Self {
        self.client_timeout = timeout;
        self
    }

    /// Register a new session and return its id and the receiving end of
    /// its send queue.
    pub fn register(&self) -> (SessionId, mpsc::Receiver<String>) {
        let id = SessionId::new();
        let (tx, rx) = mpsc::channel(self.max_send_queue);
        self.clients
            .insert(id.clone(), Arc::new(Client::new(id.clone(), tx)));
        (id, rx)
    }

    /// Remove a session. Dropping its sender ends the socket writer.
    pub fn unregister(&self, id: &SessionId) -> bool {
        self.clients.remove(id).is_some()
    }

    /// Queue a message for one session. A full queue drops the message.
    pub fn send_to(&self, id: &SessionId, message: String) -> bool {
        let Some(client) = self.clients.get(id).map(|c| Arc::clone(c.value())) else {
            return false;
        };
        match client.tx.try_send(message) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(msg)) => {
                tracing::warn!(
                    session_id = %id,
                    msg_len = msg.len(),
                    "send queue full, dropping message"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    pub fn record_pong(&self, id: &SessionId) {
        if let Some(client) = self.clients.get(id) {
            client.record_pong();
        }
    }

    /// Remove sessions that have not answered a ping within the timeout.
    pub fn cleanup_dead_clients(&self) -> Vec<SessionId> {
        let timeout = self.client_timeout;
        let dead: Vec<SessionId> = self
            .clients
            .iter()
            .filter(|entry| !entry.value().is_alive(timeout))
            .map(|entry| entry.key().clone())
            .collect();

        for id in &dead {
            self.unregister(id);
            tracing::info!(session_id = %id, "cleaned up unresponsive session");
        }
        dead
    }
}

/// Periodically drop sessions that stopped answering pings.
pub fn start_cleanup_task(
    registry: Arc<ClientRegistry>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let removed = registry.cleanup_dead_clients();
            if !removed.is_empty() {
                tracing::info!(removed = removed.len(), "dead session cleanup");
            }
        }
    })
}
