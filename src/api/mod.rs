//! Minimal client for the CenturyLink Cloud v2 REST API.
//!
//! [`ClcClient`] owns an authenticated [`Session`] and a [`Transport`]. All
//! paths passed to the request helpers are either relative to the configured
//! base URL (`servers/ACME/WA1ACMEWEB01`) or absolute hrefs copied from API
//! links (`/v2/operations/ACME/status/wa1-123`).

mod auth;
mod error;
mod transport;
pub mod types;

use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

pub use error::ClcApiError;
pub use transport::{ApiFuture, ApiRequest, ApiResponse, HttpTransport, Transport};

/// Default endpoint of the CLC v2 API.
pub const DEFAULT_API_URL: &str = "https://api.ctl.io/v2";

/// Credentials and account context obtained from login or configuration.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Session {
    /// Bearer token sent with every request.
    pub bearer_token: String,
    /// Account alias used in resource paths.
    pub account_alias: String,
    /// Default datacenter, when known.
    pub location: Option<String>,
}

/// Authenticated CLC v2 API client.
#[derive(Clone, Debug)]
pub struct ClcClient<T = HttpTransport> {
    transport: T,
    base_url: String,
    session: Session,
}

impl<T: Transport> ClcClient<T> {
    /// Creates a client from an already established session.
    #[must_use]
    pub fn with_session(transport: T, base_url: impl Into<String>, session: Session) -> Self {
        Self {
            transport,
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            session,
        }
    }

    /// Returns the account alias of the session.
    #[must_use]
    pub fn alias(&self) -> &str {
        &self.session.account_alias
    }

    /// Returns the session's default datacenter.
    #[must_use]
    pub fn location(&self) -> Option<&str> {
        self.session.location.as_deref()
    }

    /// Returns the session.
    #[must_use]
    pub const fn session(&self) -> &Session {
        &self.session
    }

    /// Returns the transport, mainly for test inspection.
    #[must_use]
    pub const fn transport(&self) -> &T {
        &self.transport
    }

    /// Resolves `path` against the base URL. Absolute paths (leading `/`) are
    /// resolved against the origin so link hrefs can be followed verbatim.
    #[must_use]
    pub fn url(&self, path: &str) -> String {
        resolve_url(&self.base_url, path)
    }

    /// Issues a request and decodes the JSON response. Empty bodies decode to
    /// [`Value::Null`].
    ///
    /// # Errors
    ///
    /// Returns [`ClcApiError::Http`] for non-2xx responses,
    /// [`ClcApiError::Decode`] when the body is not JSON and
    /// [`ClcApiError::Transport`] when no response was received.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, ClcApiError> {
        let url = self.url(path);
        debug!(%method, %url, "sending CLC API request");
        let response = self
            .transport
            .send(ApiRequest {
                method: method.clone(),
                url: url.clone(),
                bearer_token: Some(self.session.bearer_token.clone()),
                body,
            })
            .await?;
        decode_response(&method, &url, &response)
    }

    /// Sends `GET path`.
    ///
    /// # Errors
    ///
    /// See [`ClcClient::request`].
    pub async fn get(&self, path: &str) -> Result<Value, ClcApiError> {
        self.request(Method::GET, path, None).await
    }

    /// Sends `GET path`, mapping `404 Not Found` to `None`.
    ///
    /// # Errors
    ///
    /// See [`ClcClient::request`]; 404 is not an error here.
    pub async fn get_optional(&self, path: &str) -> Result<Option<Value>, ClcApiError> {
        match self.get(path).await {
            Ok(value) => Ok(Some(value)),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Sends `GET path` and deserialises the body into `R`.
    ///
    /// # Errors
    ///
    /// See [`ClcClient::request`]; shape mismatches map to
    /// [`ClcApiError::Decode`].
    pub async fn get_as<R: DeserializeOwned>(&self, path: &str) -> Result<R, ClcApiError> {
        let value = self.get(path).await?;
        serde_json::from_value(value).map_err(|err| ClcApiError::Decode {
            url: self.url(path),
            message: err.to_string(),
        })
    }

    /// Sends `POST path` with a JSON body.
    ///
    /// # Errors
    ///
    /// See [`ClcClient::request`].
    pub async fn post(&self, path: &str, body: Value) -> Result<Value, ClcApiError> {
        self.request(Method::POST, path, Some(body)).await
    }

    /// Sends `PUT path` with a JSON body.
    ///
    /// # Errors
    ///
    /// See [`ClcClient::request`].
    pub async fn put(&self, path: &str, body: Value) -> Result<Value, ClcApiError> {
        self.request(Method::PUT, path, Some(body)).await
    }

    /// Sends `PATCH path` with a JSON body.
    ///
    /// # Errors
    ///
    /// See [`ClcClient::request`].
    pub async fn patch(&self, path: &str, body: Value) -> Result<Value, ClcApiError> {
        self.request(Method::PATCH, path, Some(body)).await
    }

    /// Sends `DELETE path`.
    ///
    /// # Errors
    ///
    /// See [`ClcClient::request`].
    pub async fn delete(&self, path: &str) -> Result<Value, ClcApiError> {
        self.request(Method::DELETE, path, None).await
    }
}

fn decode_response(
    method: &Method,
    url: &str,
    response: &ApiResponse,
) -> Result<Value, ClcApiError> {
    if !response.is_success() {
        return Err(ClcApiError::Http {
            method: method.to_string(),
            url: url.to_owned(),
            status: response.status,
            body: response.body.clone(),
        });
    }
    if response.body.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(&response.body).map_err(|err| ClcApiError::Decode {
        url: url.to_owned(),
        message: err.to_string(),
    })
}

/// Joins `path` onto `base`. Paths beginning with `/` replace the base path
/// and keep only its origin.
#[must_use]
pub fn resolve_url(base: &str, path: &str) -> String {
    if path.starts_with("http://") || path.starts_with("https://") {
        return path.to_owned();
    }
    let trimmed_base = base.trim_end_matches('/');
    if path.starts_with('/') {
        return format!("{}{path}", origin(trimmed_base));
    }
    format!("{trimmed_base}/{path}")
}

fn origin(base: &str) -> &str {
    let scheme_end = base.find("://").map_or(0, |idx| idx + 3);
    base.get(scheme_end..)
        .and_then(|rest| rest.find('/'))
        .and_then(|idx| base.get(..scheme_end + idx))
        .unwrap_or(base)
}
