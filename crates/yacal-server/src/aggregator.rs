//! Concurrent fan-out to the upstreams, merged into one cached snapshot.
//!
//! # Fan-out
//!
//! Every fetcher the caller holds a credential for runs as its own task in a
//! [`JoinSet`]. The first failure aborts the siblings and becomes the
//! result; a partial calendar is never merged or cached. The whole fan-out
//! is bounded by one timeout, and dropping the future also aborts every
//! task.
//!
//! # Concurrent misses
//!
//! With single-flight enabled, the first cache miss for a key runs the
//! fan-out and every concurrent miss for that key waits for its outcome,
//! success or failure, instead of fetching again. A failure is never cached,
//! so the next miss after it starts a new fan-out.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use yacal_core::{CalendarSnapshot, IcsExporter, TimeWindow, TimezoneProjector};
use yacal_providers::{
    Credential, FetchRequest, Identity, ProviderError, Upstream, UpstreamFetcher,
};

use crate::cache::{CacheKey, ContentCache};
use crate::clock::{Clock, SystemClock};
use crate::error::{EngineError, EngineResult};

/// Default bound on one fan-out, retries included.
pub const DEFAULT_FAN_OUT_TIMEOUT: Duration = Duration::from_secs(45);

/// One caller's request for one week.
#[derive(Debug, Clone)]
pub struct CalendarRequest {
    pub window: TimeWindow,
    pub person_id: String,
    pub calendar_id: i64,
    pub page_size: u32,
    pub identity: Identity,
}

impl CalendarRequest {
    fn fetch_request(&self, credential: Credential) -> FetchRequest {
        FetchRequest {
            window: self.window,
            person_id: self.person_id.clone(),
            calendar_id: self.calendar_id,
            page_size: self.page_size,
            credential,
        }
    }
}

/// What the leader of a collapsed miss hands to its waiters.
type Outcome = Result<CalendarSnapshot, Arc<EngineError>>;

/// Misses currently being fetched, one channel per key.
#[derive(Default)]
struct InFlight {
    calls: Mutex<HashMap<CacheKey, watch::Receiver<Option<Outcome>>>>,
}

enum Claim<'a> {
    /// No fetch is running for the key; this caller runs it.
    Leader(Leader<'a>),
    /// Another caller is fetching; wait for its outcome.
    Waiter(watch::Receiver<Option<Outcome>>),
}

impl InFlight {
    fn claim(&self, key: &CacheKey) -> Claim<'_> {
        let mut calls = self.calls.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(rx) = calls.get(key) {
            return Claim::Waiter(rx.clone());
        }
        let (tx, rx) = watch::channel(None);
        calls.insert(key.clone(), rx);
        Claim::Leader(Leader {
            owner: self,
            key: key.clone(),
            tx: Some(tx),
        })
    }

    fn is_empty(&self) -> bool {
        self.calls.lock().unwrap_or_else(|p| p.into_inner()).is_empty()
    }
}

/// The caller running a fetch on behalf of everyone waiting on its key.
///
/// Dropping it unfinished (the request was cancelled) closes the channel,
/// and waiters go back to claiming the key themselves.
struct Leader<'a> {
    owner: &'a InFlight,
    key: CacheKey,
    tx: Option<watch::Sender<Option<Outcome>>>,
}

impl Leader<'_> {
    fn release(&mut self) -> Option<watch::Sender<Option<Outcome>>> {
        let mut calls = self.owner.calls.lock().unwrap_or_else(|p| p.into_inner());
        calls.remove(&self.key);
        self.tx.take()
    }

    /// Publishes the result to the waiters and returns the leader's copy.
    ///
    /// A failure seen by several callers becomes [`EngineError::Shared`].
    fn finish(mut self, result: EngineResult<CalendarSnapshot>) -> EngineResult<CalendarSnapshot> {
        let Some(tx) = self.release() else {
            return result;
        };
        if tx.receiver_count() == 0 {
            return result;
        }
        match result {
            Ok(snapshot) => {
                let _ = tx.send(Some(Ok(snapshot.clone())));
                Ok(snapshot)
            }
            Err(e) => {
                let shared = Arc::new(e);
                let _ = tx.send(Some(Err(Arc::clone(&shared))));
                Err(EngineError::Shared(shared))
            }
        }
    }
}

impl Drop for Leader<'_> {
    fn drop(&mut self) {
        if self.tx.is_some() {
            self.release();
        }
    }
}

/// Builds calendar snapshots from the upstreams and keeps them cached.
pub struct Aggregator {
    fetchers: Vec<Arc<dyn UpstreamFetcher>>,
    cache: ContentCache,
    prefix: String,
    fan_out_timeout: Duration,
    in_flight: Option<InFlight>,
    clock: Arc<dyn Clock>,
    exporter: IcsExporter,
}

impl Aggregator {
    pub fn new(
        fetchers: Vec<Arc<dyn UpstreamFetcher>>,
        cache: ContentCache,
        prefix: impl Into<String>,
    ) -> Self {
        Self {
            fetchers,
            cache,
            prefix: prefix.into(),
            fan_out_timeout: DEFAULT_FAN_OUT_TIMEOUT,
            in_flight: Some(InFlight::default()),
            clock: Arc::new(SystemClock),
            exporter: IcsExporter::new(),
        }
    }

    pub fn with_fan_out_timeout(mut self, timeout: Duration) -> Self {
        self.fan_out_timeout = timeout;
        self
    }

    pub fn with_single_flight(mut self, enabled: bool) -> Self {
        self.in_flight = enabled.then(InFlight::default);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_exporter(mut self, exporter: IcsExporter) -> Self {
        self.exporter = exporter;
        self
    }

    pub fn cache_key(&self, request: &CalendarRequest) -> CacheKey {
        CacheKey::new(
            &self.prefix,
            &request.window,
            request.calendar_id,
            &request.person_id,
        )
    }

    /// Calls every upstream the caller has a credential for and merges the
    /// results. Never touches the cache.
    pub async fn fetch(&self, request: &CalendarRequest) -> EngineResult<CalendarSnapshot> {
        match tokio::time::timeout(self.fan_out_timeout, self.fan_out(request)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    timeout_secs = self.fan_out_timeout.as_secs(),
                    person_id = %request.person_id,
                    "fan-out timed out"
                );
                Err(EngineError::Timeout(self.fan_out_timeout))
            }
        }
    }

    async fn fan_out(&self, request: &CalendarRequest) -> EngineResult<CalendarSnapshot> {
        let mut tasks = JoinSet::new();
        for (index, fetcher) in self.fetchers.iter().enumerate() {
            let upstream = fetcher.upstream();
            let Some(credential) = request.identity.credential_for(upstream) else {
                debug!(%upstream, "no credential, skipping upstream");
                continue;
            };

            let fetcher = Arc::clone(fetcher);
            let fetch_request = request.fetch_request(credential.clone());
            tasks.spawn(async move {
                let events = fetcher
                    .fetch(&fetch_request)
                    .await
                    .map_err(|e| tag(e, upstream))?;
                Ok::<_, ProviderError>((index, upstream, events))
            });
        }

        let mut batches = Vec::with_capacity(tasks.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok((index, upstream, events))) => {
                    debug!(%upstream, count = events.len(), "upstream fetched");
                    batches.push((index, events));
                }
                Ok(Err(e)) => {
                    warn!(error = %e, "upstream failed, cancelling the rest");
                    tasks.abort_all();
                    return Err(e.into());
                }
                Err(e) => {
                    tasks.abort_all();
                    return Err(EngineError::Internal(format!("fetch task failed: {e}")));
                }
            }
        }

        batches.sort_by_key(|(index, _)| *index);
        let snapshot = CalendarSnapshot::from_events(
            batches.into_iter().flat_map(|(_, events)| events),
            self.clock.now(),
        );
        info!(
            person_id = %request.person_id,
            events = snapshot.len(),
            "aggregated calendar"
        );
        Ok(snapshot)
    }

    /// The cached snapshot, or a fresh one that is cached before returning.
    ///
    /// A failed cache write is logged and otherwise ignored.
    pub async fn get_or_fetch(&self, request: &CalendarRequest) -> EngineResult<CalendarSnapshot> {
        let key = self.cache_key(request);
        if let Some(snapshot) = self.cache.get(&key).await {
            return Ok(snapshot);
        }

        let Some(in_flight) = &self.in_flight else {
            return self.fetch_and_store(&key, request).await;
        };

        loop {
            match in_flight.claim(&key) {
                Claim::Leader(leader) => {
                    // The previous leader may have cached it just before leaving.
                    let result = match self.cache.get(&key).await {
                        Some(snapshot) => Ok(snapshot),
                        None => self.fetch_and_store(&key, request).await,
                    };
                    return leader.finish(result);
                }
                Claim::Waiter(mut rx) => {
                    debug!(key = %key, "waiting on a concurrent fetch");
                    let outcome = match rx.wait_for(Option::is_some).await {
                        Ok(outcome) => outcome.clone(),
                        Err(_) => {
                            debug!(key = %key, "concurrent fetch was cancelled, retrying");
                            continue;
                        }
                    };
                    return match outcome {
                        Some(Ok(snapshot)) => Ok(snapshot),
                        Some(Err(shared)) => Err(EngineError::Shared(shared)),
                        None => continue,
                    };
                }
            }
        }
    }

    async fn fetch_and_store(
        &self,
        key: &CacheKey,
        request: &CalendarRequest,
    ) -> EngineResult<CalendarSnapshot> {
        let snapshot = self.fetch(request).await?;
        if let Err(e) = self.cache.set(key, &snapshot).await {
            warn!(key = %key, error = %e, "failed to cache snapshot");
        }
        Ok(snapshot)
    }

    /// Fetches unconditionally, overwrites the cache and reports whether the
    /// content differs from what was cached before.
    ///
    /// A missing or undecodable previous entry counts as changed, as does a
    /// snapshot whose digest cannot be computed. Unlike
    /// [`get_or_fetch`](Self::get_or_fetch), a failed cache write is an error.
    pub async fn refresh(&self, request: &CalendarRequest) -> EngineResult<(CalendarSnapshot, bool)> {
        let key = self.cache_key(request);
        let previous = self
            .cache
            .get(&key)
            .await
            .and_then(|snapshot| ContentCache::hash(&snapshot));

        let snapshot = self.fetch(request).await?;
        let changed = match (previous, ContentCache::hash(&snapshot)) {
            (Some(previous), Some(current)) => previous != current,
            _ => true,
        };

        self.cache
            .set(&key, &snapshot)
            .await
            .map_err(EngineError::CacheWrite)?;
        info!(key = %key, changed, "refreshed calendar");
        Ok((snapshot, changed))
    }

    /// [`get_or_fetch`](Self::get_or_fetch), projected into `zone`.
    pub async fn get_calendar(
        &self,
        request: &CalendarRequest,
        zone: &TimezoneProjector,
    ) -> EngineResult<CalendarSnapshot> {
        let mut snapshot = self.get_or_fetch(request).await?;
        zone.project(&mut snapshot);
        Ok(snapshot)
    }

    /// [`refresh`](Self::refresh), projected into `zone`.
    pub async fn refresh_calendar(
        &self,
        request: &CalendarRequest,
        zone: &TimezoneProjector,
    ) -> EngineResult<(CalendarSnapshot, bool)> {
        let (mut snapshot, changed) = self.refresh(request).await?;
        zone.project(&mut snapshot);
        Ok((snapshot, changed))
    }

    /// The calendar as an iCalendar document.
    pub async fn export_ics(
        &self,
        request: &CalendarRequest,
        zone: &TimezoneProjector,
    ) -> EngineResult<Vec<u8>> {
        let snapshot = self.get_calendar(request, zone).await?;
        Ok(self.exporter.export_bytes(&snapshot, self.clock.now()))
    }
}

fn tag(err: ProviderError, upstream: Upstream) -> ProviderError {
    if err.upstream().is_some() {
        err
    } else {
        err.with_upstream(upstream)
    }
}
