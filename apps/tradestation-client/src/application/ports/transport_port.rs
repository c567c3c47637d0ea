//! Transport Port (Driven Port)
//!
//! Signed request/response calls against the REST API. Implementations own
//! their timeout and bounded retry for transient failures; callers only see
//! errors that survived it.

use async_trait::async_trait;
use bytes::Bytes;
use serde::de::DeserializeOwned;

use crate::domain::auth::Token;

/// HTTP method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    /// GET.
    Get,
    /// POST.
    Post,
    /// PUT.
    Put,
    /// DELETE.
    Delete,
}

impl HttpMethod {
    /// Method name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
        }
    }
}

/// An API request relative to the environment's base URL.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    /// Method.
    pub method: HttpMethod,
    /// Path beginning with `/`.
    pub path: String,
    /// Query parameters.
    pub query: Vec<(String, String)>,
    /// JSON body.
    pub body: Option<serde_json::Value>,
}

impl ApiRequest {
    /// GET request for `path`.
    #[must_use]
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Get,
            path: path.into(),
            query: Vec::new(),
            body: None,
        }
    }

    /// Add a query parameter.
    #[must_use]
    pub fn param(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((key.into(), value.to_string()));
        self
    }
}

/// A successful response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    /// HTTP status.
    pub status: u16,
    /// Raw body.
    pub body: Bytes,
}

impl ApiResponse {
    /// Decode the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, TransportError> {
        serde_json::from_slice(&self.body).map_err(|e| TransportError::Decode(e.to_string()))
    }
}

/// Transport error, surfaced after the transport's own retries.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The token was rejected (401).
    #[error("unauthorized")]
    Unauthorized,

    /// Non-retryable (or retry-exhausted) error status.
    #[error("API returned status {status}: {message}")]
    Status {
        /// HTTP status.
        status: u16,
        /// Response body or reason.
        message: String,
    },

    /// Network failure after all retry attempts.
    #[error("network error after {attempts} attempts: {message}")]
    Network {
        /// Attempts made.
        attempts: u32,
        /// Last error.
        message: String,
    },

    /// Request timed out after all retry attempts.
    #[error("request timed out after {attempts} attempts")]
    Timeout {
        /// Attempts made.
        attempts: u32,
    },

    /// Response body could not be decoded.
    #[error("failed to decode response: {0}")]
    Decode(String),
}

impl TransportError {
    /// Whether this is a 401.
    #[must_use]
    pub const fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized)
    }

    /// Whether retrying the whole operation later may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::Network { .. } | Self::Timeout { .. } => true,
            Self::Status { status, .. } => *status >= 500 || *status == 429 || *status == 408,
            Self::Unauthorized | Self::Decode(_) => false,
        }
    }
}

/// Signed HTTP calls against the REST API.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Issue `request` authorised with `token`.
    async fn call(&self, request: &ApiRequest, token: &Token)
    -> Result<ApiResponse, TransportError>;
}
