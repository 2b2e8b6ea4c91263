//! Engine errors and their HTTP rendering.

use std::sync::Arc;
use std::time::Duration;

use axum::Json;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;
use tracing::{error, warn};
use yacal_core::{ProjectionError, ValidationError};
use yacal_protocol::{ErrorCode, ErrorEnvelope, ErrorResponse};
use yacal_providers::{ProviderError, ProviderErrorCode, Upstream};

use crate::cache::CacheError;
use crate::store::StoreError;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Everything a calendar or login request can fail with.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed window or request body.
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// The requested display zone is unknown.
    #[error(transparent)]
    Projection(#[from] ProjectionError),

    /// The body or query could not be decoded.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// An upstream rejected the caller's credentials.
    #[error("{upstream} rejected credentials: {message}")]
    Unauthorized { upstream: String, message: String },

    /// An upstream resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Too many failed logins from this client.
    #[error("too many failed attempts, retry in {}s", retry_after.as_secs())]
    RateLimited { retry_after: Duration },

    /// An upstream failed for any other reason, retries exhausted.
    #[error("aggregation failed: {0}")]
    AggregationFailed(ProviderError),

    /// A refresh completed but its result could not be stored.
    #[error("refreshed calendar could not be cached: {0}")]
    CacheWrite(#[source] CacheError),

    /// The fan-out did not settle in time.
    #[error("aggregation timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    /// A required credential header is absent.
    #[error("missing credential header {header}")]
    MissingCredential { header: &'static str },

    /// The shared tutor password did not match.
    #[error("invalid tutor password")]
    InvalidPassword,

    /// A bearer token we issued is malformed, forged or expired.
    #[error("invalid bearer token: {0}")]
    InvalidToken(String),

    /// The feature needs settings this deployment does not have.
    #[error("{0}")]
    NotConfigured(&'static str),

    /// The shared store could not be read or written.
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("internal error: {0}")]
    Internal(String),

    /// Another request's failure for the same calendar, handed to everyone
    /// who waited on it.
    #[error(transparent)]
    Shared(Arc<EngineError>),
}

impl EngineError {
    pub fn unauthorized(upstream: Upstream, message: impl Into<String>) -> Self {
        Self::Unauthorized {
            upstream: upstream.to_string(),
            message: message.into(),
        }
    }

    /// Whether this failure counts against the login rate limit.
    pub fn is_auth_failure(&self) -> bool {
        match self {
            Self::Shared(inner) => inner.is_auth_failure(),
            other => matches!(other, Self::Unauthorized { .. } | Self::InvalidPassword),
        }
    }

    /// The error with any sharing wrapper removed.
    pub fn root(&self) -> &EngineError {
        match self {
            Self::Shared(inner) => inner.root(),
            other => other,
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) | Self::Projection(_) | Self::BadRequest(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            Self::Unauthorized { .. }
            | Self::MissingCredential { .. }
            | Self::InvalidPassword
            | Self::InvalidToken(_) => StatusCode::UNAUTHORIZED,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::AggregationFailed(_) => StatusCode::BAD_GATEWAY,
            Self::CacheWrite(_) | Self::NotConfigured(_) | Self::Store(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Self::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::Shared(inner) => inner.status(),
        }
    }

    /// The body sent to the caller. Upstream internals never leak past the
    /// generic code description.
    pub fn to_response(&self) -> ErrorResponse {
        match self {
            Self::Validation(e) => {
                let response = ErrorResponse::new(ErrorCode::ValidationError, e.to_string());
                match e.field() {
                    Some(field) => response.with_details(json!({ "field": field })),
                    None => response,
                }
            }
            Self::Projection(e) => ErrorResponse::new(ErrorCode::ValidationError, e.to_string())
                .with_details(json!({ "field": "time_zone" })),
            Self::BadRequest(message) => {
                ErrorResponse::new(ErrorCode::ValidationError, message.clone())
            }
            Self::Unauthorized { upstream, message } => {
                ErrorResponse::new(ErrorCode::Unauthorized, message.clone())
                    .with_details(json!({ "upstream": upstream }))
            }
            Self::MissingCredential { header } => {
                ErrorResponse::new(ErrorCode::Unauthorized, self.to_string())
                    .with_details(json!({ "header": header }))
            }
            Self::InvalidPassword => ErrorResponse::new(ErrorCode::Unauthorized, "Invalid password"),
            Self::InvalidToken(_) => ErrorResponse::new(
                ErrorCode::Unauthorized,
                "Invalid authentication credentials",
            ),
            Self::NotFound(message) => ErrorResponse::new(ErrorCode::NotFound, message.clone()),
            Self::RateLimited { retry_after } => {
                ErrorResponse::new(ErrorCode::RateLimited, self.to_string())
                    .with_details(json!({ "retry_after_secs": retry_after.as_secs() }))
            }
            Self::AggregationFailed(_) => ErrorResponse::from_code(ErrorCode::UpstreamError),
            Self::CacheWrite(_) => ErrorResponse::from_code(ErrorCode::CacheWriteFailed),
            Self::Timeout(_) => ErrorResponse::from_code(ErrorCode::Timeout),
            Self::NotConfigured(message) => ErrorResponse::new(ErrorCode::InternalError, *message),
            Self::Store(_) | Self::Internal(_) => ErrorResponse::from_code(ErrorCode::InternalError),
            Self::Shared(inner) => inner.to_response(),
        }
    }
}

impl From<ProviderError> for EngineError {
    fn from(err: ProviderError) -> Self {
        let upstream = err
            .upstream()
            .map(|u| u.to_string())
            .unwrap_or_else(|| "upstream".to_string());
        match err.code() {
            ProviderErrorCode::AuthenticationFailed => Self::Unauthorized {
                upstream,
                message: err.message().to_string(),
            },
            ProviderErrorCode::NotFound => Self::NotFound(err.message().to_string()),
            _ => Self::AggregationFailed(err),
        }
    }
}

impl IntoResponse for EngineError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self, "request failed");
        } else {
            warn!(error = %self, "request rejected");
        }

        let retry_after = match self.root() {
            Self::RateLimited { retry_after } => Some(retry_after.as_secs().max(1)),
            _ => None,
        };
        let bearer_challenge = matches!(self.root(), Self::InvalidToken(_));

        let mut response =
            (status, Json(ErrorEnvelope::from(self.to_response()))).into_response();
        if let Some(secs) = retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        if bearer_challenge {
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        }
        response
    }
}
