//! Shared key-value store used by the content cache, the token cache and
//! the rate limiter.
//!
//! Every key may be rewritten by another process between a read and a
//! write; callers accept last-write-wins.

mod memory;
#[cfg(feature = "redis")]
mod redis_impl;

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

pub use memory::MemoryStore;
#[cfg(feature = "redis")]
pub use redis_impl::RedisStore;

use crate::config::{StoreBackend, StoreSettings};
use yacal_providers::BoxFuture;

/// Errors raised by a store backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store connection failed: {0}")]
    ConnectionFailed(String),

    #[error("store operation failed: {0}")]
    OperationFailed(String),

    #[error("store backend {0:?} is not available in this build")]
    Unsupported(&'static str),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Byte-oriented store with per-key expiry.
pub trait KeyValueStore: Send + Sync {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, StoreResult<Option<Vec<u8>>>>;

    /// Overwrites `key`; the entry disappears after `ttl`.
    fn set<'a>(&'a self, key: &'a str, value: Vec<u8>, ttl: Duration)
    -> BoxFuture<'a, StoreResult<()>>;

    fn delete<'a>(&'a self, key: &'a str) -> BoxFuture<'a, StoreResult<()>>;
}

/// Opens the backend selected in the settings.
pub async fn open_store(settings: &StoreSettings) -> StoreResult<Arc<dyn KeyValueStore>> {
    match settings.backend {
        StoreBackend::Memory => Ok(Arc::new(MemoryStore::new())),
        #[cfg(feature = "redis")]
        StoreBackend::Redis => Ok(Arc::new(RedisStore::connect(&settings.redis_url).await?)),
        #[cfg(not(feature = "redis"))]
        StoreBackend::Redis => Err(StoreError::Unsupported("redis")),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// A store whose every call fails.
    pub(crate) struct BrokenStore;

    fn down() -> StoreError {
        StoreError::ConnectionFailed("down".into())
    }

    impl KeyValueStore for BrokenStore {
        fn get<'a>(&'a self, _key: &'a str) -> BoxFuture<'a, StoreResult<Option<Vec<u8>>>> {
            Box::pin(async { Err(down()) })
        }

        fn set<'a>(
            &'a self,
            _key: &'a str,
            _value: Vec<u8>,
            _ttl: Duration,
        ) -> BoxFuture<'a, StoreResult<()>> {
            Box::pin(async { Err(down()) })
        }

        fn delete<'a>(&'a self, _key: &'a str) -> BoxFuture<'a, StoreResult<()>> {
            Box::pin(async { Err(down()) })
        }
    }
}
