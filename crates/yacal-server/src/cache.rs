//! Snapshot and login caches on top of the shared key-value store.
//!
//! [`ContentCache::get`] is the only place a cached snapshot is decoded: it
//! yields a typed [`CalendarSnapshot`] or a miss. Store failures and
//! undecodable payloads are logged and read as misses.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::SecondsFormat;
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, warn};
use yacal_core::{CalendarSnapshot, SnapshotHash, TimeWindow};
use yacal_protocol::Credentials;

use crate::store::{KeyValueStore, StoreError};

/// Errors raised when writing to a cache.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("failed to encode cache entry: {0}")]
    Encode(#[from] serde_json::Error),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Identifies one cached snapshot.
///
/// Built from the window, program calendar and person only; credentials
/// never take part, so callers with different sessions share an entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(prefix: &str, window: &TimeWindow, calendar_id: i64, person_id: &str) -> Self {
        Self(format!(
            "{prefix}:calendar:{}:{}:{calendar_id}:{person_id}",
            window.start().to_rfc3339_opts(SecondsFormat::Secs, true),
            window.end().to_rfc3339_opts(SecondsFormat::Secs, true),
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Calendar snapshots stored with the events TTL.
#[derive(Clone)]
pub struct ContentCache {
    store: Arc<dyn KeyValueStore>,
    ttl: Duration,
}

impl ContentCache {
    pub fn new(store: Arc<dyn KeyValueStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// The cached snapshot for `key`, or `None` on a miss.
    pub async fn get(&self, key: &CacheKey) -> Option<CalendarSnapshot> {
        let bytes = match self.store.get(key.as_str()).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                debug!(key = %key, "cache miss");
                return None;
            }
            Err(e) => {
                warn!(key = %key, error = %e, "cache read failed, treating as miss");
                return None;
            }
        };

        match serde_json::from_slice(&bytes) {
            Ok(snapshot) => {
                debug!(key = %key, "cache hit");
                Some(snapshot)
            }
            Err(e) => {
                warn!(key = %key, error = %e, "undecodable cache entry, treating as miss");
                None
            }
        }
    }

    /// Overwrites the entry for `key`.
    pub async fn set(&self, key: &CacheKey, snapshot: &CalendarSnapshot) -> Result<(), CacheError> {
        let bytes = serde_json::to_vec(snapshot)?;
        self.store.set(key.as_str(), bytes, self.ttl).await?;
        debug!(key = %key, ttl_secs = self.ttl.as_secs(), "cached snapshot");
        Ok(())
    }

    /// Content digest used for change detection, `None` if it could not
    /// be computed.
    pub fn hash(snapshot: &CalendarSnapshot) -> Option<SnapshotHash> {
        snapshot
            .content_hash()
            .inspect_err(|e| warn!(error = %e, "failed to hash snapshot"))
            .ok()
    }
}

/// Login results stored with the token TTL.
///
/// Keys carry an MD5 of the credentials rather than the credentials.
#[derive(Clone)]
pub struct TokenCache {
    store: Arc<dyn KeyValueStore>,
    prefix: String,
    ttl: Duration,
}

impl TokenCache {
    pub fn new(store: Arc<dyn KeyValueStore>, prefix: impl Into<String>, ttl: Duration) -> Self {
        Self {
            store,
            prefix: prefix.into(),
            ttl,
        }
    }

    pub fn key(&self, service: &str, credentials: &Credentials) -> String {
        let digest = md5::compute(format!(
            "{service}\0{}\0{}",
            credentials.username, credentials.password
        ));
        format!("{}:token:{service}:{digest:x}", self.prefix)
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        match self.store.get(key).await {
            Ok(Some(bytes)) => serde_json::from_slice(&bytes)
                .inspect_err(|e| warn!(error = %e, "undecodable token entry"))
                .ok(),
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, "token cache read failed");
                None
            }
        }
    }

    pub async fn set<T: Serialize>(&self, key: &str, value: &T) -> Result<(), CacheError> {
        let bytes = serde_json::to_vec(value)?;
        self.store.set(key, bytes, self.ttl).await?;
        Ok(())
    }
}
