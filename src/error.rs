//! Error types for the OAuth 2.0 client

use std::io;
use std::sync::Arc;

use thiserror::Error;

/// Result type alias for the OAuth 2.0 client
pub type Result<T> = std::result::Result<T, Error>;

/// OAuth 2.0 client errors
#[derive(Error, Debug)]
pub enum Error {
    /// A required endpoint or URI is not configured for the requested operation
    #[error("Configuration error: {0}")]
    Config(String),

    /// A flow-specific parameter (code, credentials, refresh token) is missing
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The token endpoint answered with a non-success status
    #[error("Token exchange failed: {} (HTTP {status})", exchange_detail(.error, .description, .body))]
    TokenExchange {
        /// HTTP status code
        status: u16,
        /// Provider `error` code, if the body was a standard error object
        error: Option<String>,
        /// Provider `error_description`, if present
        description: Option<String>,
        /// Raw response body
        body: String,
    },

    /// Automatic refresh inside `get_token` failed
    ///
    /// Shared between callers that waited on the same refresh.
    #[error("Token refresh failed: {0}")]
    TokenRefresh(#[source] Arc<Error>),

    /// No token is stored
    #[error("No token available")]
    NoToken,

    /// Token persistence failed
    #[error("Storage error: {0}")]
    Storage(String),

    /// The authorization redirect carried an error or failed validation
    #[error("Authorization failed: {0}")]
    Authorization(String),

    /// The token endpoint answered 2xx with something that is not a token response
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Transport error (connection refused, DNS, timeout)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

fn exchange_detail<'a>(
    error: &'a Option<String>,
    description: &'a Option<String>,
    body: &'a str,
) -> &'a str {
    description.as_deref().or(error.as_deref()).unwrap_or(body)
}

impl Error {
    /// HTTP status carried by a token exchange failure, looking through a refresh wrapper
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::TokenExchange { status, .. } => Some(*status),
            Self::TokenRefresh(inner) => inner.status(),
            Self::Http(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Provider error code (`invalid_grant`, ...), looking through a refresh wrapper
    #[must_use]
    pub fn provider_error(&self) -> Option<&str> {
        match self {
            Self::TokenExchange { error, .. } => error.as_deref(),
            Self::TokenRefresh(inner) => inner.provider_error(),
            _ => None,
        }
    }

    /// Whether this error came from an automatic refresh
    #[must_use]
    pub fn is_refresh_failure(&self) -> bool {
        matches!(self, Self::TokenRefresh(_))
    }
}
