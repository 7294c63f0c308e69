use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::Instant;

/// Entries beyond this trigger a sweep of expired keys.
const SWEEP_THRESHOLD: usize = 4096;

/// Idempotency key for an approval: hex SHA-256 of `recordId:status`.
pub fn idempotency_key(record_id: &str, status: &str) -> String {
    let digest = Sha256::digest(format!("{record_id}:{status}").as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Local TTL cache of recently seen idempotency keys.
pub struct DedupCache {
    window: Duration,
    seen: DashMap<String, Instant>,
}

impl DedupCache {
    /// A zero window disables de-duplication.
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            seen: DashMap::new(),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Record `key` and report whether it was new within the window.
    pub fn first_seen(&self, key: &str) -> bool {
        if self.window.is_zero() {
            return true;
        }
        let now = Instant::now();
        if self.seen.len() > SWEEP_THRESHOLD {
            self.sweep(now);
        }
        match self.seen.entry(key.to_string()) {
            Entry::Occupied(mut e) => {
                if now.duration_since(*e.get()) < self.window {
                    false
                } else {
                    e.insert(now);
                    true
                }
            }
            Entry::Vacant(v) => {
                v.insert(now);
                true
            }
        }
    }

    /// Drop a key so the next attempt is not treated as a duplicate.
    pub fn forget(&self, key: &str) {
        self.seen.remove(key);
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    fn sweep(&self, now: Instant) {
        let window = self.window;
        self.seen.retain(|_, at| now.duration_since(*at) < window);
    }
}

/// Per-key async locks. Holders of the same key run one at a time; entries
/// disappear once nobody holds or waits on them.
#[derive(Default)]
pub struct KeyLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl KeyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, key: &str) -> KeyGuard<'_> {
        let lock = self.locks.entry(key.to_string()).or_default().clone();
        let guard = lock.lock_owned().await;
        KeyGuard {
            locks: &self.locks,
            key: key.to_string(),
            guard: Some(guard),
        }
    }

    /// Keys currently held or waited on.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

pub struct KeyGuard<'a> {
    locks: &'a DashMap<String, Arc<Mutex<()>>>,
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        self.locks
            .remove_if(&self.key, |_, lock| Arc::strong_count(lock) == 1);
    }
}
