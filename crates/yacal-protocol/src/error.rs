//! Error envelope returned by every endpoint.

use serde::{Deserialize, Serialize};

/// Machine-readable error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// The request was malformed.
    ValidationError,

    /// Upstream credentials are missing, wrong or expired.
    Unauthorized,

    /// An upstream resource does not exist.
    NotFound,

    /// Too many failed login attempts from this client.
    RateLimited,

    /// An upstream failed and the calendar could not be built.
    UpstreamError,

    /// A refresh succeeded but the result could not be cached.
    CacheWriteFailed,

    /// The request took too long.
    Timeout,

    /// Unknown or internal error.
    InternalError,
}

impl ErrorCode {
    /// Returns a human-readable description of the error code.
    pub fn description(&self) -> &'static str {
        match self {
            Self::ValidationError => "The request was invalid",
            Self::Unauthorized => "Credentials expired or invalid",
            Self::NotFound => "Requested resource not found",
            Self::RateLimited => "Too many failed attempts",
            Self::UpstreamError => "Upstream service failed, try again later",
            Self::CacheWriteFailed => "Can't refresh cache",
            Self::Timeout => "The request timed out",
            Self::InternalError => "An internal error occurred",
        }
    }
}

/// Error details.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: ErrorCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ErrorResponse {
    /// Creates a new error response.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    /// Creates an error response carrying only the code's description.
    pub fn from_code(code: ErrorCode) -> Self {
        Self::new(code, code.description())
    }

    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// Top-level body: `{"error": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub error: ErrorResponse,
}

impl From<ErrorResponse> for ErrorEnvelope {
    fn from(error: ErrorResponse) -> Self {
        Self { error }
    }
}
