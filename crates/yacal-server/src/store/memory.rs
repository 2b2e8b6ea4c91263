//! In-process store with lazy expiry and a periodic sweep on write.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::trace;

use super::{KeyValueStore, StoreResult};
use yacal_providers::BoxFuture;

#[derive(Debug, Clone)]
struct Entry {
    value: Vec<u8>,
    expires_at: Instant,
}

impl Entry {
    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// Minimum spacing between two sweeps of expired entries.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Default)]
struct Entries {
    map: HashMap<String, Entry>,
    next_sweep: Option<Instant>,
}

impl Entries {
    /// Drops every expired entry if the last sweep is old enough.
    fn sweep_if_due(&mut self, now: Instant) {
        if self.next_sweep.is_some_and(|at| now < at) {
            return;
        }
        let before = self.map.len();
        self.map.retain(|_, entry| now < entry.expires_at);
        self.next_sweep = Some(now + SWEEP_INTERVAL);
        let swept = before - self.map.len();
        if swept > 0 {
            trace!(swept, remaining = self.map.len(), "swept expired entries");
        }
    }
}

/// A [`KeyValueStore`] living in this process.
///
/// Expired entries are dropped when next read, and writes sweep the whole
/// map at most once per [`SWEEP_INTERVAL`], so keys that are never read
/// again do not accumulate.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Arc<RwLock<Entries>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries.
    pub async fn len(&self) -> usize {
        self.entries
            .read()
            .await
            .map
            .values()
            .filter(|entry| !entry.is_expired())
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Entries held in memory, expired or not.
    #[cfg(test)]
    async fn held(&self) -> usize {
        self.entries.read().await.map.len()
    }
}

impl KeyValueStore for MemoryStore {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, StoreResult<Option<Vec<u8>>>> {
        Box::pin(async move {
            {
                let entries = self.entries.read().await;
                match entries.map.get(key) {
                    None => return Ok(None),
                    Some(entry) if !entry.is_expired() => return Ok(Some(entry.value.clone())),
                    Some(_) => {}
                }
            }

            let mut entries = self.entries.write().await;
            if entries.map.get(key).is_some_and(Entry::is_expired) {
                entries.map.remove(key);
                trace!(key, "evicted expired entry");
            }
            Ok(None)
        })
    }

    fn set<'a>(
        &'a self,
        key: &'a str,
        value: Vec<u8>,
        ttl: Duration,
    ) -> BoxFuture<'a, StoreResult<()>> {
        Box::pin(async move {
            let now = Instant::now();
            let entry = Entry {
                value,
                expires_at: now + ttl,
            };
            let mut entries = self.entries.write().await;
            entries.sweep_if_due(now);
            entries.map.insert(key.to_string(), entry);
            Ok(())
        })
    }

    fn delete<'a>(&'a self, key: &'a str) -> BoxFuture<'a, StoreResult<()>> {
        Box::pin(async move {
            self.entries.write().await.map.remove(key);
            Ok(())
        })
    }
}
