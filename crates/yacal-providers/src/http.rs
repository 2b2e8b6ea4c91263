//! Shared HTTP plumbing for the upstream clients.

use std::time::Duration;

use reqwest::header::HeaderMap;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{trace, warn};
use url::Url;

use crate::error::{ProviderError, ProviderResult};
use crate::fetcher::Upstream;
use crate::retry::{RetryPolicy, retry_transport};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// Longest slice of an error body quoted in a [`ProviderError`] message.
const ERROR_BODY_LIMIT: usize = 512;

/// Settings shared by every upstream client.
#[derive(Debug, Clone)]
pub struct HttpSettings {
    /// Per-call timeout.
    pub timeout: Duration,
    pub retry: RetryPolicy,
    pub user_agent: String,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            retry: RetryPolicy::default(),
            user_agent: format!("yacal/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// A successful (2xx) reply with its body fully read.
#[derive(Debug)]
pub struct HttpReply {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: String,
}

impl HttpReply {
    /// Decodes the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> ProviderResult<T> {
        serde_json::from_str(&self.body).map_err(|e| {
            ProviderError::invalid_response(format!("Failed to decode response: {e}"))
                .with_source(e)
        })
    }
}

/// An HTTP client bound to one upstream's base URL.
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    client: Client,
    base_url: Url,
    retry: RetryPolicy,
    upstream: Upstream,
}

impl UpstreamClient {
    pub fn new(upstream: Upstream, base_url: &str, settings: &HttpSettings) -> ProviderResult<Self> {
        let base_url = Url::parse(base_url).map_err(|e| {
            ProviderError::configuration(format!("Invalid base URL {base_url:?}: {e}"))
                .with_upstream(upstream)
        })?;

        let client = Client::builder()
            .timeout(settings.timeout)
            .user_agent(&settings.user_agent)
            .build()
            .map_err(|e| {
                ProviderError::network(format!("Failed to create HTTP client: {e}"))
                    .with_upstream(upstream)
            })?;

        Ok(Self {
            client,
            base_url,
            retry: settings.retry,
            upstream,
        })
    }

    pub fn upstream(&self) -> Upstream {
        self.upstream
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Resolves `path` against the base URL.
    pub fn endpoint(&self, path: &str) -> ProviderResult<Url> {
        self.base_url.join(path).map_err(|e| {
            ProviderError::configuration(format!("Invalid endpoint {path:?}: {e}"))
                .with_upstream(self.upstream)
        })
    }

    /// Sends the request produced by `build`, retrying transport failures.
    ///
    /// `build` runs once per attempt.
    pub async fn send<F>(&self, build: F) -> ProviderResult<HttpReply>
    where
        F: Fn(&Client) -> RequestBuilder,
    {
        let build = &build;
        let client = &self.client;
        retry_transport(self.retry, || async move {
            let response = build(client).send().await.map_err(transport_error)?;
            handle_response(response).await
        })
        .await
        .map_err(|e| e.with_upstream(self.upstream))
    }

    /// Like [`send`](Self::send), decoding the body as JSON.
    pub async fn send_json<T, F>(&self, build: F) -> ProviderResult<T>
    where
        T: DeserializeOwned,
        F: Fn(&Client) -> RequestBuilder,
    {
        self.send(build)
            .await?
            .json()
            .map_err(|e| e.with_upstream(self.upstream))
    }
}

fn transport_error(err: reqwest::Error) -> ProviderError {
    let message = if err.is_timeout() {
        "Request timed out"
    } else if err.is_connect() {
        "Connection failed"
    } else {
        "Request failed"
    };
    ProviderError::network(format!("{message}: {err}")).with_source(err)
}

async fn handle_response(response: Response) -> ProviderResult<HttpReply> {
    let status = response.status();
    trace!(status = %status, url = %response.url(), "Received response");

    match status {
        s if s.is_success() => {
            let headers = response.headers().clone();
            let body = response.text().await.map_err(|e| {
                ProviderError::network(format!("Failed to read response: {e}")).with_source(e)
            })?;
            Ok(HttpReply {
                status,
                headers,
                body,
            })
        }
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(ProviderError::authentication(
            format!("Credentials rejected ({status})"),
        )),
        StatusCode::NOT_FOUND => Err(ProviderError::not_found("Resource not found")),
        s => {
            let body = response.text().await.unwrap_or_default();
            warn!(status = %s, "Unexpected response status");
            Err(ProviderError::server(format!(
                "Unexpected status {}: {}",
                s,
                truncate(&body, ERROR_BODY_LIMIT)
            )))
        }
    }
}

fn truncate(body: &str, limit: usize) -> &str {
    match body.char_indices().nth(limit) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}
