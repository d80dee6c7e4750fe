//! Blueprint package execution on existing servers.

use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::info;

use crate::api::Transport;

use super::lookup::require_servers;
use super::{ApiContext, ModuleContext, ModuleError, ModuleOutcome, default_true};

/// Parameters of the `blueprint_package` module.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub struct BlueprintPackageParams {
    /// Servers to run the package on.
    pub server_ids: Vec<String>,
    /// Package identifier.
    pub package_id: String,
    /// Package parameters, passed through unchanged.
    #[serde(default)]
    pub package_params: Map<String, Value>,
    /// Only `present` is supported.
    #[serde(default = "default_state")]
    pub state: String,
    /// Wait for the executions to finish.
    #[serde(default = "default_true")]
    pub wait: bool,
}

fn default_state() -> String {
    String::from("present")
}

/// Executes the package on every server. Package execution is not
/// idempotent, so every run reports a change.
///
/// # Errors
///
/// Returns [`ModuleError`] for unsupported states, missing servers, failed
/// API calls or unsuccessful executions.
pub async fn run<T: Transport>(
    ctx: &ModuleContext<T>,
    params: &BlueprintPackageParams,
) -> Result<ModuleOutcome, ModuleError> {
    if params.state != "present" {
        return Err(ModuleError::Validation(format!(
            "unsupported state '{}': only present is supported",
            params.state
        )));
    }
    if params.package_id.trim().is_empty() {
        return Err(ModuleError::validation("package_id must not be empty"));
    }
    let servers = require_servers(ctx, &params.server_ids).await?;
    let server_ids: Vec<&str> = servers.iter().map(|server| server.id.as_str()).collect();

    if !ctx.check_mode() {
        info!(package = %params.package_id, servers = ?server_ids, "executing package");
        let response = ctx
            .client()
            .post(
                &format!("operations/{}/servers/executePackage", ctx.alias()),
                json!({
                    "servers": server_ids,
                    "package": {
                        "packageId": params.package_id,
                        "parameters": params.package_params,
                    },
                }),
            )
            .await
            .with_context(|| format!("failed to execute package {}", params.package_id))?;
        ctx.settle(&[response], params.wait).await?;
    }
    ModuleOutcome::new(true).with("server_ids", server_ids)
}
