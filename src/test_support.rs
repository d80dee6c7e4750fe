//! Test support utilities shared across unit and integration tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use reqwest::Method;
use serde_json::Value;

use crate::api::{ApiFuture, ApiRequest, ApiResponse, ClcApiError, ClcClient, Session, Transport};
use crate::modules::ModuleContext;
use crate::operation::PollSettings;

/// Account alias used by [`scripted_client`].
pub const TEST_ALIAS: &str = "ACME";
/// Datacenter used by [`scripted_client`].
pub const TEST_LOCATION: &str = "WA1";
/// Base URL used by [`scripted_client`].
pub const TEST_BASE_URL: &str = "https://api.test/v2";

/// A response queued on a [`ScriptedTransport`].
#[derive(Clone, Debug, PartialEq)]
struct ScriptedResponse {
    method: Method,
    path: String,
    status: u16,
    body: Value,
}

#[derive(Debug, Default)]
struct Script {
    responses: VecDeque<ScriptedResponse>,
    requests: Vec<RecordedRequest>,
}

/// Records a single request made through [`ScriptedTransport`].
#[derive(Clone, Debug, PartialEq)]
pub struct RecordedRequest {
    /// HTTP method.
    pub method: Method,
    /// Path relative to the API root, without query string.
    pub path: String,
    /// Full URL as sent.
    pub url: String,
    /// JSON body, if any.
    pub body: Option<Value>,
}

/// Transport double answering pre-seeded responses.
///
/// Each request consumes the first queued response whose method and path
/// match, so responses for different endpoints can be queued in any order
/// while responses for the same endpoint are returned FIFO. Paths are
/// compared relative to the API root: `/v2/servers/ACME/X?uuid=true` and
/// `https://api.test/v2/servers/ACME/X` both match `servers/ACME/X`.
#[derive(Clone, Debug, Default)]
pub struct ScriptedTransport {
    script: Arc<Mutex<Script>>,
}

impl ScriptedTransport {
    /// Creates a transport with no queued responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queues a response with an explicit status code. A [`Value::Null`] body
    /// is sent as an empty response.
    #[expect(
        clippy::must_use_candidate,
        reason = "returns the transport only so scripts can be chained"
    )]
    pub fn respond(&self, method: Method, path: &str, status: u16, body: Value) -> &Self {
        self.lock().responses.push_back(ScriptedResponse {
            method,
            path: path.to_owned(),
            status,
            body,
        });
        self
    }

    /// Queues a `200 OK` response.
    #[expect(
        clippy::must_use_candidate,
        reason = "returns the transport only so scripts can be chained"
    )]
    pub fn ok(&self, method: Method, path: &str, body: Value) -> &Self {
        self.respond(method, path, 200, body)
    }

    /// Queues a `404 Not Found` response.
    #[expect(
        clippy::must_use_candidate,
        reason = "returns the transport only so scripts can be chained"
    )]
    pub fn not_found(&self, method: Method, path: &str) -> &Self {
        self.respond(
            method,
            path,
            404,
            serde_json::json!({ "message": "resource not found" }),
        )
    }

    /// Queues one status document per entry of `statuses`, returned in order.
    #[expect(
        clippy::must_use_candidate,
        reason = "returns the transport only so scripts can be chained"
    )]
    pub fn operation_status(&self, operation_id: &str, statuses: &[&str]) -> &Self {
        let path = format!("operations/{TEST_ALIAS}/status/{operation_id}");
        for status in statuses {
            self.ok(
                Method::GET,
                &path,
                serde_json::json!({ "status": status }),
            );
        }
        self
    }

    /// Returns every request received so far.
    #[must_use]
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.lock().requests.clone()
    }

    /// Returns the requests with the given method and path.
    #[must_use]
    pub fn requests_to(&self, method: &Method, path: &str) -> Vec<RecordedRequest> {
        self.lock()
            .requests
            .iter()
            .filter(|request| &request.method == method && request.path == path)
            .cloned()
            .collect()
    }

    /// Returns the requests that would have changed remote state.
    #[must_use]
    pub fn mutations(&self) -> Vec<RecordedRequest> {
        self.lock()
            .requests
            .iter()
            .filter(|request| request.method != Method::GET)
            .cloned()
            .collect()
    }

    /// Number of queued responses not consumed yet.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.lock().responses.len()
    }
}

impl Transport for ScriptedTransport {
    fn send(&self, request: ApiRequest) -> ApiFuture<'_, ApiResponse> {
        Box::pin(async move {
            let path = relative_path(&request.url);
            let mut script = self.lock();
            script.requests.push(RecordedRequest {
                method: request.method.clone(),
                path: path.clone(),
                url: request.url.clone(),
                body: request.body.clone(),
            });

            let position = script
                .responses
                .iter()
                .position(|response| response.method == request.method && response.path == path);
            let Some(response) = position.and_then(|index| script.responses.remove(index)) else {
                return Err(ClcApiError::Transport {
                    message: format!("no scripted response for {} {path}", request.method),
                });
            };

            let body = if response.body.is_null() {
                String::new()
            } else {
                response.body.to_string()
            };
            Ok(ApiResponse {
                status: response.status,
                body,
            })
        })
    }
}

/// Reduces a URL to the path relative to the API root, without the query.
#[must_use]
pub fn relative_path(url: &str) -> String {
    let without_scheme = url.split_once("://").map_or(url, |(_, rest)| rest);
    let full_path = without_scheme.split_once('/').map_or("", |(_, rest)| rest);
    let trimmed = full_path.split('?').next().unwrap_or_default();
    trimmed.strip_prefix("v2/").unwrap_or(trimmed).to_owned()
}

/// Builds a client with a fixed session over `transport`.
#[must_use]
pub fn scripted_client(transport: ScriptedTransport) -> ClcClient<ScriptedTransport> {
    ClcClient::with_session(
        transport,
        TEST_BASE_URL,
        Session {
            bearer_token: String::from("test-token"),
            account_alias: String::from(TEST_ALIAS),
            location: Some(String::from(TEST_LOCATION)),
        },
    )
}

/// Builds a module context over `transport` that polls without sleeping.
#[must_use]
pub fn scripted_context(transport: ScriptedTransport) -> ModuleContext<ScriptedTransport> {
    ModuleContext::new(scripted_client(transport)).with_poll_settings(PollSettings {
        interval: std::time::Duration::ZERO,
        max_polls: 5,
    })
}
