//! Polling of asynchronous CLC operations.
//!
//! Mutating CLC calls answer with one or more status links. Each link names an
//! operation whose state is read from `operations/{alias}/status/{id}` until it
//! reaches a terminal state or the poll budget runs out. Operations are polled
//! one after another; nothing here runs concurrently.

use std::time::Duration;

use serde_json::Value;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::api::{ClcApiError, ClcClient, Transport};

/// Default delay between two status polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);
/// Default number of status polls per operation.
pub const DEFAULT_MAX_POLLS: u32 = 300;

/// Polling cadence for asynchronous operations.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PollSettings {
    /// Delay between two polls of the same operation.
    pub interval: Duration,
    /// Maximum number of status polls per operation.
    pub max_polls: u32,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            max_polls: DEFAULT_MAX_POLLS,
        }
    }
}

/// Status reported by the operations endpoint.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum OperationStatus {
    /// Queued but not yet picked up.
    NotStarted,
    /// Running.
    Executing,
    /// Resumed after a pause.
    Resumed,
    /// Finished successfully.
    Succeeded,
    /// Finished with an error.
    Failed,
    /// Any status string this crate does not know; treated as pending.
    Unknown(String),
}

impl OperationStatus {
    /// Parses the `status` field of an operation document.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        match raw {
            "notStarted" => Self::NotStarted,
            "executing" => Self::Executing,
            "resumed" => Self::Resumed,
            "succeeded" => Self::Succeeded,
            "failed" => Self::Failed,
            other => Self::Unknown(other.to_owned()),
        }
    }

    /// Returns `true` for `succeeded` and `failed`.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

/// Outcome of polling a single operation.
#[derive(Clone, Debug, PartialEq)]
pub struct OperationPoll {
    /// Last status observed.
    pub status: OperationStatus,
    /// Last status document returned by the API.
    pub document: Value,
    /// Number of status calls spent on this operation.
    pub status_calls: u32,
}

impl OperationPoll {
    /// Returns `true` when the operation reached a terminal state.
    #[must_use]
    pub const fn is_settled(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Aggregate outcome of [`wait_on_completed_operations`].
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PollReport {
    /// Operations that succeeded.
    pub succeeded: Vec<String>,
    /// Operations that reported `failed`.
    pub failed: Vec<String>,
    /// Operations still pending when the poll budget ran out.
    pub unresolved: Vec<String>,
    /// Total number of status calls made.
    pub status_calls: u32,
}

impl PollReport {
    /// Number of operations that did not succeed (failed or unresolved).
    #[must_use]
    pub const fn failed_count(&self) -> usize {
        self.failed.len() + self.unresolved.len()
    }

    /// Number of operations polled.
    #[must_use]
    pub const fn total(&self) -> usize {
        self.succeeded.len() + self.failed_count()
    }
}

/// Errors raised while waiting for operations.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum OperationError {
    /// Raised when a status call itself fails.
    #[error("failed to read operation status: {0}")]
    Api(#[from] ClcApiError),
    /// Raised when operations did not succeed within the poll budget.
    #[error("{failed} of {total} operation(s) did not complete successfully: {ids}")]
    Failed {
        /// Operations that failed or never settled.
        failed: usize,
        /// Operations polled.
        total: usize,
        /// Comma separated ids of the unsuccessful operations.
        ids: String,
    },
}

/// Extracts operation ids from the response of a mutating call.
///
/// Understands bare status links (`{"rel": "status", "id": ...}`), objects
/// carrying a `links` array, network claim responses (`{"operationId": ...}`)
/// and arrays of any of those.
#[must_use]
pub fn operation_ids(response: &Value) -> Vec<String> {
    let mut ids = Vec::new();
    collect_operation_ids(response, &mut ids);
    ids
}

fn collect_operation_ids(value: &Value, ids: &mut Vec<String>) {
    match value {
        Value::Array(entries) => {
            for entry in entries {
                collect_operation_ids(entry, ids);
            }
        }
        Value::Object(map) => {
            if map.get("rel").and_then(Value::as_str) == Some("status") {
                if let Some(id) = status_link_id(value) {
                    ids.push(id);
                }
            } else if let Some(Value::Array(links)) = map.get("links") {
                ids.extend(
                    links
                        .iter()
                        .filter(|link| link.get("rel").and_then(Value::as_str) == Some("status"))
                        .filter_map(status_link_id),
                );
            } else if let Some(id) = map.get("operationId").and_then(Value::as_str) {
                ids.push(id.to_owned());
            }
        }
        _ => {}
    }
}

fn status_link_id(link: &Value) -> Option<String> {
    if let Some(id) = link.get("id").and_then(Value::as_str) {
        return Some(id.to_owned());
    }
    link.get("href")
        .and_then(Value::as_str)
        .and_then(|href| href.trim_end_matches('/').rsplit('/').next())
        .filter(|segment| !segment.is_empty())
        .map(str::to_owned)
}

/// Polls one operation until it settles or `settings.max_polls` status calls
/// have been made.
///
/// # Errors
///
/// Returns [`ClcApiError`] when a status call fails.
pub async fn poll_operation<T: Transport>(
    client: &ClcClient<T>,
    operation_id: &str,
    settings: PollSettings,
) -> Result<OperationPoll, ClcApiError> {
    let path = format!("operations/{}/status/{operation_id}", client.alias());
    let mut poll = OperationPoll {
        status: OperationStatus::NotStarted,
        document: Value::Null,
        status_calls: 0,
    };

    while poll.status_calls < settings.max_polls {
        poll.document = client.get(&path).await?;
        poll.status_calls += 1;
        poll.status = OperationStatus::parse(
            poll.document
                .get("status")
                .and_then(Value::as_str)
                .unwrap_or_default(),
        );
        debug!(operation_id, status = ?poll.status, calls = poll.status_calls, "polled operation");
        if poll.is_settled() {
            break;
        }
        if poll.status_calls < settings.max_polls {
            sleep(settings.interval).await;
        }
    }

    Ok(poll)
}

/// Polls every operation in turn and reports which ones succeeded, failed or
/// never settled.
///
/// # Errors
///
/// Returns [`ClcApiError`] when a status call fails; unsuccessful operations
/// are reported in the [`PollReport`] rather than as errors.
pub async fn wait_on_completed_operations<T: Transport>(
    client: &ClcClient<T>,
    operation_ids: &[String],
    settings: PollSettings,
) -> Result<PollReport, ClcApiError> {
    let mut report = PollReport::default();
    for id in operation_ids {
        let poll = poll_operation(client, id, settings).await?;
        report.status_calls += poll.status_calls;
        match poll.status {
            OperationStatus::Succeeded => report.succeeded.push(id.clone()),
            OperationStatus::Failed => {
                warn!(operation_id = %id, "operation failed");
                report.failed.push(id.clone());
            }
            _ => {
                warn!(operation_id = %id, polls = poll.status_calls, "operation did not settle");
                report.unresolved.push(id.clone());
            }
        }
    }
    Ok(report)
}

/// Like [`wait_on_completed_operations`] but fails unless every operation
/// succeeded.
///
/// # Errors
///
/// Returns [`OperationError::Failed`] when any operation failed or did not
/// settle, and [`OperationError::Api`] when a status call fails.
pub async fn wait_for_success<T: Transport>(
    client: &ClcClient<T>,
    operation_ids: &[String],
    settings: PollSettings,
) -> Result<PollReport, OperationError> {
    let report = wait_on_completed_operations(client, operation_ids, settings).await?;
    if report.failed_count() > 0 {
        let ids = report
            .failed
            .iter()
            .chain(&report.unresolved)
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(", ");
        return Err(OperationError::Failed {
            failed: report.failed_count(),
            total: report.total(),
            ids,
        });
    }
    Ok(report)
}
