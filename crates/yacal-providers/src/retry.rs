//! Fixed-delay retry of transport failures.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::ProviderResult;

pub const DEFAULT_RETRY_ATTEMPTS: u32 = 5;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(3);

/// How often and how patiently a transport failure is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of tries, including the first one. Zero behaves as one.
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_RETRY_ATTEMPTS,
            delay: DEFAULT_RETRY_DELAY,
        }
    }
}

impl RetryPolicy {
    pub fn new(attempts: u32, delay: Duration) -> Self {
        Self { attempts, delay }
    }

    /// A policy that never retries.
    pub fn none() -> Self {
        Self::new(1, Duration::ZERO)
    }
}

/// Runs `op` until it succeeds, fails with a non-transport error, or the
/// policy runs out of attempts.
pub async fn retry_transport<T, F, Fut>(policy: RetryPolicy, mut op: F) -> ProviderResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ProviderResult<T>>,
{
    let attempts = policy.attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Err(err) if err.is_transport() && attempt < attempts => {
                warn!(attempt, max = attempts, error = %err, "transport failure, retrying");
                tokio::time::sleep(policy.delay).await;
                attempt += 1;
            }
            result => return result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ProviderError, ProviderErrorCode};
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn retries_transport_errors_until_success() {
        let calls = &AtomicU32::new(0);
        let started = tokio::time::Instant::now();

        let result = retry_transport(RetryPolicy::default(), || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(ProviderError::network("connection refused"))
            } else {
                Ok("payload")
            }
        })
        .await;

        assert_eq!(result.unwrap(), "payload");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(started.elapsed(), Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_configured_attempts() {
        let calls = &AtomicU32::new(0);

        let result: ProviderResult<()> = retry_transport(RetryPolicy::default(), || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ProviderError::network("timed out"))
        })
        .await;

        assert_eq!(result.unwrap_err().code(), ProviderErrorCode::NetworkError);
        assert_eq!(calls.load(Ordering::SeqCst), DEFAULT_RETRY_ATTEMPTS);
    }

    #[tokio::test(start_paused = true)]
    async fn status_errors_are_final() {
        let calls = &AtomicU32::new(0);

        let result: ProviderResult<()> = retry_transport(RetryPolicy::default(), || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ProviderError::server("HTTP 503"))
        })
        .await;

        assert_eq!(result.unwrap_err().code(), ProviderErrorCode::ServerError);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn zero_attempts_still_runs_once() {
        let calls = &AtomicU32::new(0);
        let policy = RetryPolicy::new(0, Duration::ZERO);

        let _: ProviderResult<()> = retry_transport(policy, || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ProviderError::network("down"))
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
