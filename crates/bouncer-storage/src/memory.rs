//! Process-local decision store.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio::time::Instant;

use crate::error::{Result, StorageError};
use crate::store::DecisionStore;

/// Minimum spacing between expiry sweeps triggered by writes.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Instant,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// In-memory TTL store.
///
/// Expired entries are invisible to `get` immediately. They are reclaimed by
/// [`DecisionStore::purge_expired`] and by `set`, which sweeps the map at
/// most once per [`SWEEP_INTERVAL`].
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Entry>>,
    next_sweep: Mutex<Instant>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            next_sweep: Mutex::new(Instant::now() + SWEEP_INTERVAL),
        }
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("entries", &self.entries.read().len())
            .finish()
    }
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    fn sweep_due(&self, now: Instant) -> bool {
        let mut next = self.next_sweep.lock();
        if now < *next {
            return false;
        }
        *next = now + SWEEP_INTERVAL;
        true
    }
}

fn drop_expired(entries: &mut HashMap<String, Entry>, now: Instant) -> usize {
    let before = entries.len();
    entries.retain(|_, entry| entry.is_live(now));
    before - entries.len()
}

#[async_trait]
impl DecisionStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<String> {
        let now = Instant::now();
        self.entries
            .read()
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value.clone())
            .ok_or(StorageError::CacheMiss)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let now = Instant::now();
        let mut entries = self.entries.write();
        if self.sweep_due(now) {
            let purged = drop_expired(&mut entries, now);
            if purged > 0 {
                tracing::debug!(purged, remaining = entries.len(), "Swept expired decisions");
            }
        }
        if ttl.is_zero() {
            entries.remove(key);
            return Ok(());
        }
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: now + ttl,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.write().remove(key);
        Ok(())
    }

    async fn purge_expired(&self) -> Result<usize> {
        let now = Instant::now();
        let purged = drop_expired(&mut self.entries.write(), now);
        if purged > 0 {
            tracing::debug!(purged, "Purged expired decisions");
        }
        Ok(purged)
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}
