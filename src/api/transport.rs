//! HTTP transport seam used by [`ClcClient`](super::ClcClient).
//!
//! The client never talks to `reqwest` directly; it hands an [`ApiRequest`] to
//! a [`Transport`] and interprets the raw [`ApiResponse`]. Production code uses
//! [`HttpTransport`], tests use the scripted double in
//! [`crate::test_support`].

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use reqwest::Method;
use reqwest::header::ACCEPT;
use serde_json::Value;

use super::ClcApiError;

const HTTP_TIMEOUT: Duration = Duration::from_secs(60);
const USER_AGENT: &str = concat!("clc-modules/", env!("CARGO_PKG_VERSION"));

/// Future returned by transport and client operations.
pub type ApiFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ClcApiError>> + Send + 'a>>;

/// A single request against the CLC API.
#[derive(Clone, Debug, PartialEq)]
pub struct ApiRequest {
    /// HTTP method.
    pub method: Method,
    /// Fully qualified URL.
    pub url: String,
    /// Bearer token, absent for the login call.
    pub bearer_token: Option<String>,
    /// Optional JSON body.
    pub body: Option<Value>,
}

/// Raw response returned by a [`Transport`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ApiResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response body as text; empty for `204 No Content`.
    pub body: String,
}

impl ApiResponse {
    /// Returns `true` for 2xx status codes.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }
}

/// Sends [`ApiRequest`]s and returns the raw response.
pub trait Transport: Send + Sync {
    /// Sends the request. Non-2xx responses are returned as values; only
    /// failures to obtain a response at all are errors.
    fn send(&self, request: ApiRequest) -> ApiFuture<'_, ApiResponse>;
}

/// `reqwest` backed transport used by the `clc` binary.
#[derive(Clone, Debug)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Builds a transport with the default timeout and user agent.
    ///
    /// # Errors
    ///
    /// Returns [`ClcApiError::Transport`] when the TLS backend cannot be
    /// initialised.
    pub fn new() -> Result<Self, ClcApiError> {
        let client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|err| ClcApiError::Transport {
                message: err.to_string(),
            })?;
        Ok(Self { client })
    }
}

impl Transport for HttpTransport {
    fn send(&self, request: ApiRequest) -> ApiFuture<'_, ApiResponse> {
        Box::pin(async move {
            let mut builder = self
                .client
                .request(request.method, &request.url)
                .header(ACCEPT, "application/json");
            if let Some(token) = &request.bearer_token {
                builder = builder.bearer_auth(token);
            }
            if let Some(body) = &request.body {
                builder = builder.json(body);
            }

            let response = builder
                .send()
                .await
                .map_err(|err| ClcApiError::Transport {
                    message: err.to_string(),
                })?;
            let status = response.status().as_u16();
            let body = response
                .text()
                .await
                .map_err(|err| ClcApiError::Transport {
                    message: err.to_string(),
                })?;
            Ok(ApiResponse { status, body })
        })
    }
}
