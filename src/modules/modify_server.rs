//! Changes to existing servers: CPU and memory, alert policy and
//! anti-affinity policy membership.

use serde::Deserialize;
use serde_json::{Value, json};
use tracing::info;

use crate::api::Transport;
use crate::api::types::Server;

use super::lookup::{require_servers, server_path};
use super::{
    ApiContext, ModuleContext, ModuleError, ModuleOutcome, Presence, aa_policy, alert_policy,
    default_true,
};

/// Largest CPU count a server accepts.
pub const MAX_CPU: u32 = 16;
/// Largest memory size a server accepts, in gigabytes.
pub const MAX_MEMORY_GB: u32 = 128;

/// Parameters of the `modify_server` module.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub struct ModifyServerParams {
    /// Servers to modify.
    pub server_ids: Vec<String>,
    /// CPU count.
    #[serde(default)]
    pub cpu: Option<u32>,
    /// Memory in gigabytes.
    #[serde(default)]
    pub memory: Option<u32>,
    /// Anti-affinity policy id.
    #[serde(default)]
    pub anti_affinity_policy_id: Option<String>,
    /// Anti-affinity policy name.
    #[serde(default)]
    pub anti_affinity_policy_name: Option<String>,
    /// Alert policy id.
    #[serde(default)]
    pub alert_policy_id: Option<String>,
    /// Alert policy name.
    #[serde(default)]
    pub alert_policy_name: Option<String>,
    /// `present` applies the settings, `absent` detaches the policies.
    #[serde(default)]
    pub state: Presence,
    /// Wait for the operations to finish.
    #[serde(default = "default_true")]
    pub wait: bool,
}

/// Checks CPU and memory against the limits the API enforces.
///
/// # Errors
///
/// Returns [`ModuleError::Validation`] naming the offending setting.
pub fn validate_hardware(cpu: Option<u32>, memory: Option<u32>) -> Result<(), ModuleError> {
    if let Some(count) = cpu {
        if !(1..=MAX_CPU).contains(&count) {
            return Err(ModuleError::Validation(format!(
                "cpu must be between 1 and {MAX_CPU}, got {count}"
            )));
        }
    }
    if let Some(size) = memory {
        if !(1..=MAX_MEMORY_GB).contains(&size) {
            return Err(ModuleError::Validation(format!(
                "memory must be between 1 and {MAX_MEMORY_GB} GB, got {size}"
            )));
        }
    }
    Ok(())
}

fn hardware_patch(server: &Server, cpu: Option<u32>, memory: Option<u32>) -> Vec<Value> {
    let mut ops = Vec::new();
    if let Some(count) = cpu.filter(|count| *count != server.details.cpu) {
        ops.push(json!({ "op": "set", "member": "cpu", "value": count.to_string() }));
    }
    if let Some(size) = memory.filter(|size| u64::from(*size) != server.memory_gb()) {
        ops.push(json!({ "op": "set", "member": "memory", "value": size.to_string() }));
    }
    ops
}

/// Applies the requested changes to every server.
///
/// # Errors
///
/// Returns [`ModuleError`] for invalid settings, unknown servers or policies,
/// failed API calls or unsuccessful operations.
pub async fn run<T: Transport>(
    ctx: &ModuleContext<T>,
    params: &ModifyServerParams,
) -> Result<ModuleOutcome, ModuleError> {
    validate_hardware(params.cpu, params.memory)?;
    let servers = require_servers(ctx, &params.server_ids).await?;
    let alert_policy_id = resolve_alert_policy(
        ctx,
        params
            .alert_policy_id
            .as_deref()
            .or(params.alert_policy_name.as_deref()),
    )
    .await?;
    let aa_policy_id = resolve_aa_policy(
        ctx,
        params
            .anti_affinity_policy_id
            .as_deref()
            .or(params.anti_affinity_policy_name.as_deref()),
    )
    .await?;

    let mut changed_ids = Vec::new();
    let mut responses = Vec::new();
    for server in &servers {
        let mut changed = false;
        if params.state == Presence::Present {
            let ops = hardware_patch(server, params.cpu, params.memory);
            if !ops.is_empty() {
                changed = true;
                if !ctx.check_mode() {
                    info!(server = %server.id, ops = ops.len(), "updating server hardware");
                    responses.push(
                        ctx.client()
                            .patch(&server_path(ctx.alias(), &server.id), Value::Array(ops))
                            .await
                            .with_context(|| format!("failed to update server {}", server.id))?,
                    );
                }
            }
        }
        if let Some(policy_id) = &alert_policy_id {
            changed |= apply_alert_policy(ctx, params.state, server, policy_id).await?;
        }
        if let Some(policy_id) = &aa_policy_id {
            changed |= apply_aa_policy(ctx, params.state, server, policy_id).await?;
        }
        if changed {
            changed_ids.push(server.id.clone());
        }
    }

    ctx.settle(&responses, params.wait).await?;
    ModuleOutcome::new(!changed_ids.is_empty()).with("server_ids", changed_ids)
}

/// Resolves an alert policy given by id or name to its id.
pub(crate) async fn resolve_alert_policy<T: Transport>(
    ctx: &ModuleContext<T>,
    id_or_name: Option<&str>,
) -> Result<Option<String>, ModuleError> {
    let Some(key) = id_or_name else {
        return Ok(None);
    };
    let policies = alert_policy::list_policies(ctx, ctx.alias()).await?;
    let policy = alert_policy::find_policy(&policies, key)?
        .ok_or_else(|| ModuleError::NotFound(format!("alert policy {key} does not exist")))?;
    Ok(Some(policy.id.clone()))
}

/// Resolves an anti-affinity policy given by id or name to its id.
pub(crate) async fn resolve_aa_policy<T: Transport>(
    ctx: &ModuleContext<T>,
    id_or_name: Option<&str>,
) -> Result<Option<String>, ModuleError> {
    let Some(key) = id_or_name else {
        return Ok(None);
    };
    let policies = aa_policy::list_policies(ctx).await?;
    let policy = aa_policy::find_policy(&policies, key)?.ok_or_else(|| {
        ModuleError::NotFound(format!("anti-affinity policy {key} does not exist"))
    })?;
    Ok(Some(policy.id.clone()))
}

/// Attaches or detaches an alert policy; returns whether anything changed.
pub(crate) async fn apply_alert_policy<T: Transport>(
    ctx: &ModuleContext<T>,
    state: Presence,
    server: &Server,
    policy_id: &str,
) -> Result<bool, ModuleError> {
    let attached = server
        .details
        .alert_policies
        .iter()
        .any(|policy| policy.id == policy_id);
    let path = format!("{}/alertPolicies", server_path(ctx.alias(), &server.id));
    match (state, attached) {
        (Presence::Present, false) => {
            if !ctx.check_mode() {
                info!(server = %server.id, policy = policy_id, "attaching alert policy");
                ctx.client()
                    .post(&path, json!({ "id": policy_id }))
                    .await
                    .with_context(|| format!("failed to attach alert policy to {}", server.id))?;
            }
            Ok(true)
        }
        (Presence::Absent, true) => {
            if !ctx.check_mode() {
                info!(server = %server.id, policy = policy_id, "detaching alert policy");
                ctx.client()
                    .delete(&format!("{path}/{policy_id}"))
                    .await
                    .with_context(|| format!("failed to detach alert policy from {}", server.id))?;
            }
            Ok(true)
        }
        _ => Ok(false),
    }
}

async fn apply_aa_policy<T: Transport>(
    ctx: &ModuleContext<T>,
    state: Presence,
    server: &Server,
    policy_id: &str,
) -> Result<bool, ModuleError> {
    let path = format!("{}/antiAffinityPolicy", server_path(ctx.alias(), &server.id));
    let current = ctx
        .client()
        .get_optional(&path)
        .await
        .with_context(|| format!("failed to read anti-affinity policy of {}", server.id))?;
    let current_id = current
        .as_ref()
        .and_then(|policy| policy.get("id"))
        .and_then(Value::as_str);

    match state {
        Presence::Present if current_id != Some(policy_id) => {
            if !ctx.check_mode() {
                info!(server = %server.id, policy = policy_id, "setting anti-affinity policy");
                ctx.client()
                    .put(&path, json!({ "id": policy_id }))
                    .await
                    .with_context(|| format!("failed to set anti-affinity policy on {}", server.id))?;
            }
            Ok(true)
        }
        Presence::Absent if current_id == Some(policy_id) => {
            if !ctx.check_mode() {
                info!(server = %server.id, policy = policy_id, "removing anti-affinity policy");
                ctx.client()
                    .delete(&path)
                    .await
                    .with_context(|| {
                        format!("failed to remove anti-affinity policy from {}", server.id)
                    })?;
            }
            Ok(true)
        }
        _ => Ok(false),
    }
}
