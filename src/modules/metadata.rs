//! Metadata records attached to a reference (a server, a group, a job run).
//!
//! Records are keyed by reference id plus name; `present` creates the record
//! or brings its job, execution, description and data in line.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::api::Transport;
use crate::api::types::decode_items;

use super::{ApiContext, ModuleContext, ModuleError, ModuleOutcome, Presence};

/// Metadata record as returned by the API.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataRecord {
    /// Record identifier; absent before creation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Resource the record describes.
    pub reference_id: String,
    /// Job that produced the record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    /// Job execution that produced the record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<String>,
    /// Record name, unique per reference.
    pub name: String,
    /// Free-form description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Arbitrary JSON payload.
    #[serde(default)]
    pub data: Value,
}

/// Parameters of the `metadata` module.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct MetadataParams {
    /// Resource the record describes.
    pub reference_id: String,
    /// Record name.
    pub name: String,
    /// Job that produced the record.
    #[serde(default)]
    pub job_id: Option<String>,
    /// Job execution that produced the record.
    #[serde(default)]
    pub execution_id: Option<String>,
    /// Free-form description.
    #[serde(default)]
    pub description: Option<String>,
    /// Arbitrary JSON payload.
    #[serde(default)]
    pub data: Option<Value>,
    /// Desired state.
    #[serde(default)]
    pub state: Presence,
}

fn values_path(alias: &str, reference_id: &str) -> String {
    format!("metadata/{alias}/references/{reference_id}/values")
}

fn merge(current: &MetadataRecord, params: &MetadataParams) -> MetadataRecord {
    let mut desired = current.clone();
    if params.job_id.is_some() {
        desired.job_id.clone_from(&params.job_id);
    }
    if params.execution_id.is_some() {
        desired.execution_id.clone_from(&params.execution_id);
    }
    if params.description.is_some() {
        desired.description.clone_from(&params.description);
    }
    if let Some(data) = &params.data {
        desired.data.clone_from(data);
    }
    desired
}

/// Ensures the record exists with the requested fields, or is gone.
///
/// # Errors
///
/// Returns [`ModuleError`] for empty keys or failed API calls.
pub async fn run<T: Transport>(
    ctx: &ModuleContext<T>,
    params: &MetadataParams,
) -> Result<ModuleOutcome, ModuleError> {
    if params.reference_id.trim().is_empty() || params.name.trim().is_empty() {
        return Err(ModuleError::validation(
            "reference_id and name must not be empty",
        ));
    }
    let path = values_path(ctx.alias(), &params.reference_id);
    let body = ctx
        .client()
        .get_optional(&path)
        .await
        .with_context(|| format!("failed to list metadata of {}", params.reference_id))?;
    let records: Vec<MetadataRecord> = decode_items(body.unwrap_or(Value::Null))?;
    let existing = records.into_iter().find(|record| record.name == params.name);

    match (params.state, existing) {
        (Presence::Present, None) => {
            let record = merge(
                &MetadataRecord {
                    reference_id: params.reference_id.clone(),
                    name: params.name.clone(),
                    ..MetadataRecord::default()
                },
                params,
            );
            if ctx.check_mode() {
                return ModuleOutcome::new(true).with("metadata", &record);
            }
            info!(reference = %params.reference_id, name = %params.name, "creating metadata record");
            let created = ctx
                .client()
                .post(&path, serde_json::to_value(&record)?)
                .await
                .with_context(|| format!("failed to create metadata record {}", params.name))?;
            ModuleOutcome::new(true).with("metadata", created)
        }
        (Presence::Present, Some(current)) => {
            let desired = merge(&current, params);
            if desired == current {
                return ModuleOutcome::new(false).with("metadata", &current);
            }
            if !ctx.check_mode() {
                let id = record_id(&current)?;
                info!(reference = %params.reference_id, id, "updating metadata record");
                ctx.client()
                    .put(&format!("{path}/{id}"), serde_json::to_value(&desired)?)
                    .await
                    .with_context(|| format!("failed to update metadata record {}", params.name))?;
            }
            ModuleOutcome::new(true).with("metadata", &desired)
        }
        (Presence::Absent, Some(current)) => {
            if !ctx.check_mode() {
                let id = record_id(&current)?;
                info!(reference = %params.reference_id, id, "deleting metadata record");
                ctx.client()
                    .delete(&format!("{path}/{id}"))
                    .await
                    .with_context(|| format!("failed to delete metadata record {}", params.name))?;
            }
            ModuleOutcome::new(true).with("metadata", &current)
        }
        (Presence::Absent, None) => ModuleOutcome::new(false).with("metadata", Value::Null),
    }
}

fn record_id(record: &MetadataRecord) -> Result<&str, ModuleError> {
    record.id.as_deref().ok_or_else(|| {
        ModuleError::Serialization(format!("metadata record {} has no id", record.name))
    })
}
