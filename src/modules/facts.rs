//! Read-only modules that report server and group details.

use serde::Deserialize;
use serde_json::Value;

use crate::api::Transport;
use crate::group_tree::{Group, GroupTree};

use super::lookup::{fetch_server, server_path};
use super::{ApiContext, ModuleContext, ModuleError, ModuleOutcome};

/// Parameters of the `server_facts` module.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub struct ServerFactsParams {
    /// Server to describe.
    pub server_id: String,
    /// Also read the server's administrator credentials.
    #[serde(default)]
    pub credentials: bool,
}

/// Parameters of the `group_facts` module.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub struct GroupFactsParams {
    /// Group to describe.
    pub group_id: String,
}

/// Reports a server, optionally with its credentials. Never changes anything.
///
/// # Errors
///
/// Returns [`ModuleError::NotFound`] for unknown servers and
/// [`ModuleError::Api`] for failed calls.
pub async fn server_facts<T: Transport>(
    ctx: &ModuleContext<T>,
    params: &ServerFactsParams,
) -> Result<ModuleOutcome, ModuleError> {
    let server = fetch_server(ctx, &params.server_id)
        .await?
        .ok_or_else(|| {
            ModuleError::NotFound(format!("server {} does not exist", params.server_id))
        })?;
    let public_ips: Vec<&str> = server.public_ips().collect();
    let outcome = ModuleOutcome::new(false)
        .with("server", &server)?
        .with("public_ips", public_ips)?;
    if !params.credentials {
        return Ok(outcome);
    }
    let credentials = ctx
        .client()
        .get(&format!(
            "{}/credentials",
            server_path(ctx.alias(), &params.server_id)
        ))
        .await
        .with_context(|| format!("failed to read credentials of {}", params.server_id))?;
    outcome.with("credentials", credentials)
}

/// Reports a group, its direct child groups and the ids of its servers.
///
/// # Errors
///
/// Returns [`ModuleError::NotFound`] for unknown groups and
/// [`ModuleError::Api`] for failed calls.
pub async fn group_facts<T: Transport>(
    ctx: &ModuleContext<T>,
    params: &GroupFactsParams,
) -> Result<ModuleOutcome, ModuleError> {
    let body = ctx
        .client()
        .get_optional(&format!("groups/{}/{}", ctx.alias(), params.group_id))
        .await
        .with_context(|| format!("failed to read group {}", params.group_id))?
        .ok_or_else(|| ModuleError::NotFound(format!("group {} does not exist", params.group_id)))?;
    let group: Group = serde_json::from_value(body)?;
    let tree = GroupTree::from_root(group);
    let Some(root) = tree.root() else {
        return ModuleOutcome::new(false).with("group", Value::Null);
    };
    let children: Vec<_> = tree.children_of(root).collect();
    ModuleOutcome::new(false)
        .with("group", root)?
        .with("children", children)?
        .with("server_ids", root.server_ids().collect::<Vec<_>>())
}
