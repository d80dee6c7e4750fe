//! Error types for the CLC v2 API client.

use thiserror::Error;

/// Errors raised while talking to the CLC v2 API.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ClcApiError {
    /// Raised when the API answers with a non-2xx status code.
    #[error("{method} {url} returned HTTP {status}: {body}")]
    Http {
        /// HTTP method of the failed request.
        method: String,
        /// Fully qualified request URL.
        url: String,
        /// Status code returned by the API.
        status: u16,
        /// Response body, usually a JSON error document.
        body: String,
    },
    /// Raised when the request never produced a response.
    #[error("transport failure: {message}")]
    Transport {
        /// Message reported by the HTTP client.
        message: String,
    },
    /// Raised when a response body is not the JSON document we expect.
    #[error("failed to decode response from {url}: {message}")]
    Decode {
        /// URL that produced the response.
        url: String,
        /// Parser error message.
        message: String,
    },
    /// Raised when the login exchange fails or no credentials are usable.
    #[error("authentication failed: {message}")]
    Authentication {
        /// Human readable failure description.
        message: String,
    },
}

impl ClcApiError {
    /// Returns `true` when the API reported that the resource does not exist.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::Http { status: 404, .. })
    }

    /// Returns the HTTP status code for API level failures.
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            Self::Transport { .. } | Self::Decode { .. } | Self::Authentication { .. } => None,
        }
    }
}
