//! Server snapshots. CLC keeps at most one snapshot per server.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::info;

use crate::api::Transport;
use crate::api::types::Server;

use super::lookup::{require_servers, server_path};
use super::{ApiContext, ModuleContext, ModuleError, ModuleOutcome, default_true};

/// Longest snapshot lifetime the API accepts, in days.
pub const MAX_EXPIRATION_DAYS: u32 = 10;

/// Desired snapshot state.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotState {
    /// Each server has a snapshot.
    #[default]
    Present,
    /// No server has a snapshot.
    Absent,
    /// Each server is rolled back to its snapshot.
    Restore,
}

/// Parameters of the `server_snapshot` module.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub struct ServerSnapshotParams {
    /// Servers to manage.
    pub server_ids: Vec<String>,
    /// Snapshot lifetime in days, 1 to 10.
    #[serde(default = "default_expiration_days")]
    pub expiration_days: u32,
    /// Desired state.
    #[serde(default)]
    pub state: SnapshotState,
    /// Wait for the operations to finish.
    #[serde(default = "default_true")]
    pub wait: bool,
}

const fn default_expiration_days() -> u32 {
    7
}

/// Applies the requested snapshot state to every server.
///
/// # Errors
///
/// Returns [`ModuleError`] for invalid lifetimes, missing servers, failed
/// API calls or unsuccessful operations.
pub async fn run<T: Transport>(
    ctx: &ModuleContext<T>,
    params: &ServerSnapshotParams,
) -> Result<ModuleOutcome, ModuleError> {
    if !(1..=MAX_EXPIRATION_DAYS).contains(&params.expiration_days) {
        return Err(ModuleError::Validation(format!(
            "expiration_days must be between 1 and {MAX_EXPIRATION_DAYS}"
        )));
    }
    let servers = require_servers(ctx, &params.server_ids).await?;
    let (changed_ids, responses) = match params.state {
        SnapshotState::Present => create_snapshots(ctx, params, &servers).await?,
        SnapshotState::Absent => delete_snapshots(ctx, &servers).await?,
        SnapshotState::Restore => restore_snapshots(ctx, &servers).await?,
    };
    ctx.settle(&responses, params.wait).await?;
    ModuleOutcome::new(!changed_ids.is_empty()).with("server_ids", changed_ids)
}

async fn create_snapshots<T: Transport>(
    ctx: &ModuleContext<T>,
    params: &ServerSnapshotParams,
    servers: &[Server],
) -> Result<(Vec<String>, Vec<Value>), ModuleError> {
    let targets: Vec<String> = servers
        .iter()
        .filter(|server| server.snapshot().is_none())
        .map(|server| server.id.clone())
        .collect();
    if targets.is_empty() || ctx.check_mode() {
        return Ok((targets, Vec::new()));
    }
    info!(servers = ?targets, days = params.expiration_days, "creating snapshots");
    let response = ctx
        .client()
        .post(
            &format!("operations/{}/servers/createSnapshot", ctx.alias()),
            json!({
                "serverIds": targets,
                "snapshotExpirationDays": params.expiration_days,
            }),
        )
        .await
        .with_context(|| String::from("failed to create snapshots"))?;
    Ok((targets, vec![response]))
}

fn snapshot_id(server: &Server) -> Result<Option<&str>, ModuleError> {
    let Some(snapshot) = server.snapshot() else {
        return Ok(None);
    };
    snapshot.id().map(Some).ok_or_else(|| {
        ModuleError::Serialization(format!(
            "snapshot {} of server {} has no numeric self link",
            snapshot.name, server.id
        ))
    })
}

async fn delete_snapshots<T: Transport>(
    ctx: &ModuleContext<T>,
    servers: &[Server],
) -> Result<(Vec<String>, Vec<Value>), ModuleError> {
    let mut changed = Vec::new();
    let mut responses = Vec::new();
    for server in servers {
        let Some(id) = snapshot_id(server)? else {
            continue;
        };
        changed.push(server.id.clone());
        if ctx.check_mode() {
            continue;
        }
        info!(server = %server.id, snapshot = id, "deleting snapshot");
        let path = format!("{}/snapshots/{id}", server_path(ctx.alias(), &server.id));
        responses.push(
            ctx.client()
                .delete(&path)
                .await
                .with_context(|| format!("failed to delete snapshot of {}", server.id))?,
        );
    }
    Ok((changed, responses))
}

async fn restore_snapshots<T: Transport>(
    ctx: &ModuleContext<T>,
    servers: &[Server],
) -> Result<(Vec<String>, Vec<Value>), ModuleError> {
    let mut changed = Vec::new();
    let mut responses = Vec::new();
    for server in servers {
        let Some(id) = snapshot_id(server)? else {
            continue;
        };
        changed.push(server.id.clone());
        if ctx.check_mode() {
            continue;
        }
        info!(server = %server.id, snapshot = id, "restoring snapshot");
        let path = format!(
            "{}/snapshots/{id}/restore",
            server_path(ctx.alias(), &server.id)
        );
        responses.push(
            ctx.client()
                .post(&path, json!({ "targetGroupId": server.group_id }))
                .await
                .with_context(|| format!("failed to restore snapshot of {}", server.id))?,
        );
    }
    Ok((changed, responses))
}
