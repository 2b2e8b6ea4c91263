//! Webinar links attached to Modeus lessons.
//!
//! A link lives under `{prefix}:mtslink:{lesson id}` for the events TTL;
//! saving again replaces it.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};
use url::Url;
use uuid::Uuid;

use crate::store::{KeyValueStore, StoreResult};

#[derive(Clone)]
pub struct LinkStore {
    store: Arc<dyn KeyValueStore>,
    prefix: String,
    ttl: Duration,
}

impl LinkStore {
    pub fn new(store: Arc<dyn KeyValueStore>, prefix: impl Into<String>, ttl: Duration) -> Self {
        Self {
            store,
            prefix: prefix.into(),
            ttl,
        }
    }

    fn key(&self, lesson_id: Uuid) -> String {
        format!("{}:mtslink:{lesson_id}", self.prefix)
    }

    pub async fn save(&self, lesson_id: Uuid, url: &Url) -> StoreResult<()> {
        let key = self.key(lesson_id);
        self.store
            .set(&key, url.as_str().as_bytes().to_vec(), self.ttl)
            .await?;
        debug!(key = %key, ttl_secs = self.ttl.as_secs(), "saved lesson link");
        Ok(())
    }

    /// The saved link, `None` if there is none or it no longer parses.
    pub async fn get(&self, lesson_id: Uuid) -> StoreResult<Option<Url>> {
        let key = self.key(lesson_id);
        let Some(bytes) = self.store.get(&key).await? else {
            return Ok(None);
        };
        let url = std::str::from_utf8(&bytes)
            .ok()
            .and_then(|raw| Url::parse(raw).ok());
        if url.is_none() {
            warn!(key = %key, "undecodable lesson link");
        }
        Ok(url)
    }
}
