//! Failed-login lockout shared through the key-value store.
//!
//! Each `(endpoint class, client ip)` pair owns one record:
//!
//! ```text
//!  Clear ──failure──▶ Accumulating ──failure × max──▶ Locked
//!    ▲                     │                            │
//!    └──────success────────┘◀───check after lockout─────┘
//! ```
//!
//! Expiry is lazy: a lock is cleared by the first check after it ends. The
//! stored record also carries a TTL equal to the lockout so abandoned
//! records disappear on their own.
//!
//! Store failures are logged and the limiter lets the request through.

use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::http::HeaderMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::error::{EngineError, EngineResult};
use crate::store::KeyValueStore;

/// Bucket used when no client address can be determined.
pub const UNKNOWN_CLIENT: &str = "unknown";

/// Login endpoints that are limited independently of each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointClass {
    NetologyLogin,
    LmsLogin,
    TutorLogin,
}

impl EndpointClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NetologyLogin => "netology",
            Self::LmsLogin => "lms",
            Self::TutorLogin => "tutor",
        }
    }
}

impl fmt::Display for EndpointClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stored failure count and lock deadline (Unix seconds, 0 when unlocked).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitRecord {
    pub count: u32,
    pub locked_until: i64,
}

impl RateLimitRecord {
    pub fn is_locked(&self) -> bool {
        self.locked_until > 0
    }
}

pub struct RateLimiter {
    store: Arc<dyn KeyValueStore>,
    prefix: String,
    max_attempts: u32,
    lockout: Duration,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        prefix: impl Into<String>,
        max_attempts: u32,
        lockout: Duration,
    ) -> Self {
        Self {
            store,
            prefix: prefix.into(),
            max_attempts,
            lockout,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    fn key(&self, class: EndpointClass, ip: &str) -> String {
        format!("{}:{class}_login_attempts:{ip}", self.prefix)
    }

    /// The stored record, if any.
    pub async fn record(&self, class: EndpointClass, ip: &str) -> Option<RateLimitRecord> {
        let key = self.key(class, ip);
        match self.store.get(&key).await {
            Ok(Some(bytes)) => serde_json::from_slice(&bytes)
                .inspect_err(|e| warn!(key = %key, error = %e, "undecodable rate limit record"))
                .ok(),
            Ok(None) => None,
            Err(e) => {
                warn!(key = %key, error = %e, "rate limit store read failed");
                None
            }
        }
    }

    /// Rejects the attempt while a lock is active; clears an expired one.
    pub async fn check_allowed(&self, class: EndpointClass, ip: &str) -> EngineResult<()> {
        let Some(record) = self.record(class, ip).await else {
            return Ok(());
        };
        if !record.is_locked() {
            return Ok(());
        }

        let now = self.clock.now().timestamp();
        if now < record.locked_until {
            let retry_after = Duration::from_secs((record.locked_until - now).unsigned_abs());
            debug!(%class, ip, retry_after_secs = retry_after.as_secs(), "login locked");
            return Err(EngineError::RateLimited { retry_after });
        }

        info!(%class, ip, "lockout expired, clearing");
        self.clear(class, ip).await;
        Ok(())
    }

    /// Counts one failure, locking once the count reaches the maximum.
    pub async fn record_failure(&self, class: EndpointClass, ip: &str) -> RateLimitRecord {
        let mut record = self.record(class, ip).await.unwrap_or_default();
        record.count = record.count.saturating_add(1);

        let now = self.clock.now().timestamp();
        if record.count >= self.max_attempts && record.locked_until <= now {
            record.locked_until = now + self.lockout.as_secs() as i64;
            warn!(
                %class,
                ip,
                attempts = record.count,
                lockout_secs = self.lockout.as_secs(),
                "too many failed logins, locking"
            );
        }

        let key = self.key(class, ip);
        match serde_json::to_vec(&record) {
            Ok(bytes) => {
                if let Err(e) = self.store.set(&key, bytes, self.lockout).await {
                    warn!(key = %key, error = %e, "rate limit store write failed");
                }
            }
            Err(e) => warn!(key = %key, error = %e, "failed to encode rate limit record"),
        }
        record
    }

    pub async fn record_success(&self, class: EndpointClass, ip: &str) {
        self.clear(class, ip).await;
    }

    async fn clear(&self, class: EndpointClass, ip: &str) {
        let key = self.key(class, ip);
        if let Err(e) = self.store.delete(&key).await {
            warn!(key = %key, error = %e, "rate limit store delete failed");
        }
    }

    /// Runs a login operation under the limiter.
    ///
    /// Only authentication failures are counted; any other error passes
    /// through without touching the record.
    pub async fn guarded<T, F, Fut>(&self, class: EndpointClass, ip: &str, op: F) -> EngineResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = EngineResult<T>>,
    {
        self.check_allowed(class, ip).await?;
        match op().await {
            Ok(value) => {
                self.record_success(class, ip).await;
                Ok(value)
            }
            Err(e) if e.is_auth_failure() => {
                let record = self.record_failure(class, ip).await;
                debug!(%class, ip, attempts = record.count, "failed login recorded");
                Err(e)
            }
            Err(e) => Err(e),
        }
    }
}

/// The caller's address: first `X-Forwarded-For` entry, then `X-Real-IP`,
/// then the peer address, then [`UNKNOWN_CLIENT`].
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty());
    if let Some(ip) = forwarded {
        return ip.to_string();
    }

    let real_ip = headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|ip| !ip.is_empty());
    if let Some(ip) = real_ip {
        return ip.to_string();
    }

    peer.map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| UNKNOWN_CLIENT.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use crate::store::MemoryStore;
    use crate::store::testing::BrokenStore;
    use axum::http::HeaderValue;
    use chrono::{TimeZone, Utc};

    const IP: &str = "10.0.0.1";

    fn limiter() -> (RateLimiter, MockClock) {
        let clock = MockClock::new(Utc.with_ymd_and_hms(2024, 9, 23, 12, 0, 0).unwrap());
        let limiter = RateLimiter::new(
            Arc::new(MemoryStore::new()),
            "yacal",
            3,
            Duration::from_secs(900),
        )
        .with_clock(Arc::new(clock.clone()));
        (limiter, clock)
    }

    fn unauthorized() -> EngineError {
        EngineError::Unauthorized {
            upstream: "lms".into(),
            message: "Username/password is incorrect.".into(),
        }
    }

    mod lockout {
        use super::*;

        #[tokio::test]
        async fn locks_after_max_failures() {
            let (limiter, _) = limiter();
            for _ in 0..2 {
                limiter.record_failure(EndpointClass::LmsLogin, IP).await;
                limiter.check_allowed(EndpointClass::LmsLogin, IP).await.unwrap();
            }

            let record = limiter.record_failure(EndpointClass::LmsLogin, IP).await;
            assert_eq!(record.count, 3);
            assert!(record.is_locked());

            let err = limiter
                .check_allowed(EndpointClass::LmsLogin, IP)
                .await
                .unwrap_err();
            assert!(matches!(
                err,
                EngineError::RateLimited { retry_after } if retry_after == Duration::from_secs(900)
            ));
        }

        #[tokio::test]
        async fn lock_clears_after_lockout() {
            let (limiter, clock) = limiter();
            for _ in 0..3 {
                limiter.record_failure(EndpointClass::LmsLogin, IP).await;
            }

            clock.advance(Duration::from_secs(600));
            let err = limiter
                .check_allowed(EndpointClass::LmsLogin, IP)
                .await
                .unwrap_err();
            assert!(matches!(
                err,
                EngineError::RateLimited { retry_after } if retry_after == Duration::from_secs(300)
            ));

            clock.advance(Duration::from_secs(300));
            limiter.check_allowed(EndpointClass::LmsLogin, IP).await.unwrap();
            assert_eq!(limiter.record(EndpointClass::LmsLogin, IP).await, None);

            let record = limiter.record_failure(EndpointClass::LmsLogin, IP).await;
            assert_eq!(record.count, 1);
            assert!(!record.is_locked());
        }

        #[tokio::test]
        async fn success_resets_count() {
            let (limiter, _) = limiter();
            limiter.record_failure(EndpointClass::LmsLogin, IP).await;
            limiter.record_failure(EndpointClass::LmsLogin, IP).await;
            limiter.record_success(EndpointClass::LmsLogin, IP).await;

            assert_eq!(limiter.record(EndpointClass::LmsLogin, IP).await, None);
        }

        #[tokio::test]
        async fn buckets_are_per_class_and_ip() {
            let (limiter, _) = limiter();
            for _ in 0..3 {
                limiter.record_failure(EndpointClass::LmsLogin, IP).await;
            }

            assert!(limiter.check_allowed(EndpointClass::LmsLogin, IP).await.is_err());
            limiter
                .check_allowed(EndpointClass::NetologyLogin, IP)
                .await
                .unwrap();
            limiter
                .check_allowed(EndpointClass::TutorLogin, IP)
                .await
                .unwrap();
            limiter
                .check_allowed(EndpointClass::LmsLogin, "10.0.0.2")
                .await
                .unwrap();
        }

        #[tokio::test(start_paused = true)]
        async fn abandoned_records_expire_with_the_store() {
            let (limiter, _) = limiter();
            limiter.record_failure(EndpointClass::LmsLogin, IP).await;

            tokio::time::advance(Duration::from_secs(901)).await;
            assert_eq!(limiter.record(EndpointClass::LmsLogin, IP).await, None);
        }

        #[tokio::test]
        async fn store_outage_fails_open() {
            let limiter = RateLimiter::new(Arc::new(BrokenStore), "yacal", 1, Duration::from_secs(60));
            limiter.record_failure(EndpointClass::LmsLogin, IP).await;
            limiter.check_allowed(EndpointClass::LmsLogin, IP).await.unwrap();
        }
    }

    mod guarded {
        use super::*;

        #[tokio::test]
        async fn counts_only_auth_failures() {
            let (limiter, _) = limiter();

            let result: EngineResult<()> = limiter
                .guarded(EndpointClass::LmsLogin, IP, || async {
                    Err(EngineError::BadRequest("missing password".into()))
                })
                .await;
            assert!(result.is_err());
            assert_eq!(limiter.record(EndpointClass::LmsLogin, IP).await, None);

            let result: EngineResult<()> = limiter
                .guarded(EndpointClass::LmsLogin, IP, || async {
                    Err(EngineError::AggregationFailed(
                        yacal_providers::ProviderError::network("refused"),
                    ))
                })
                .await;
            assert!(result.is_err());
            assert_eq!(limiter.record(EndpointClass::LmsLogin, IP).await, None);

            let result: EngineResult<()> = limiter
                .guarded(EndpointClass::LmsLogin, IP, || async { Err(unauthorized()) })
                .await;
            assert!(matches!(result, Err(EngineError::Unauthorized { .. })));
            assert_eq!(
                limiter.record(EndpointClass::LmsLogin, IP).await.map(|r| r.count),
                Some(1)
            );
        }

        #[tokio::test]
        async fn locked_client_never_reaches_the_operation() {
            let (limiter, _) = limiter();
            for _ in 0..3 {
                let _ = limiter
                    .guarded(EndpointClass::LmsLogin, IP, || async {
                        Err::<(), _>(unauthorized())
                    })
                    .await;
            }

            let mut called = false;
            let result = limiter
                .guarded(EndpointClass::LmsLogin, IP, || {
                    called = true;
                    async { Ok("token") }
                })
                .await;
            assert!(matches!(result, Err(EngineError::RateLimited { .. })));
            assert!(!called);
        }

        #[tokio::test]
        async fn success_clears_previous_failures() {
            let (limiter, _) = limiter();
            limiter.record_failure(EndpointClass::NetologyLogin, IP).await;

            let token = limiter
                .guarded(EndpointClass::NetologyLogin, IP, || async { Ok("session") })
                .await
                .unwrap();
            assert_eq!(token, "session");
            assert_eq!(limiter.record(EndpointClass::NetologyLogin, IP).await, None);
        }
    }

    mod client_address {
        use super::*;

        fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
            let mut map = HeaderMap::new();
            for (name, value) in pairs {
                map.insert(*name, HeaderValue::from_static(*value));
            }
            map
        }

        #[test]
        fn resolution_order() {
            let peer: SocketAddr = "192.168.1.5:50000".parse().unwrap();

            let h = headers(&[
                ("x-forwarded-for", "203.0.113.7, 10.0.0.1"),
                ("x-real-ip", "198.51.100.2"),
            ]);
            assert_eq!(client_ip(&h, Some(peer)), "203.0.113.7");

            let h = headers(&[("x-real-ip", "198.51.100.2")]);
            assert_eq!(client_ip(&h, Some(peer)), "198.51.100.2");

            assert_eq!(client_ip(&HeaderMap::new(), Some(peer)), "192.168.1.5");
            assert_eq!(client_ip(&HeaderMap::new(), None), UNKNOWN_CLIENT);
        }

        #[test]
        fn blank_headers_are_skipped() {
            let h = headers(&[("x-forwarded-for", " "), ("x-real-ip", "")]);
            assert_eq!(client_ip(&h, None), "unknown");
        }
    }
}
