//! Server groups: create a group under a parent, or delete it.

use serde::Deserialize;
use serde_json::{Value, json};
use tracing::info;

use crate::api::Transport;
use crate::group_tree::{DEFAULT_GROUP, GroupTree};

use super::{ApiContext, ModuleContext, ModuleError, ModuleOutcome, Presence, default_true};

/// Parameters of the `group` module.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub struct GroupParams {
    /// Group name.
    pub name: String,
    /// Description; defaults to the name.
    #[serde(default)]
    pub description: Option<String>,
    /// Name of the parent group.
    #[serde(default = "default_parent")]
    pub parent: String,
    /// Datacenter; defaults to the session location.
    #[serde(default)]
    pub location: Option<String>,
    /// Desired state.
    #[serde(default)]
    pub state: Presence,
    /// Wait for deletion to finish.
    #[serde(default = "default_true")]
    pub wait: bool,
}

fn default_parent() -> String {
    DEFAULT_GROUP.to_owned()
}

/// Ensures the group exists (or not) under its parent.
///
/// # Errors
///
/// Returns [`ModuleError`] when the parent is missing, a lookup is ambiguous
/// or an API call fails.
pub async fn run<T: Transport>(
    ctx: &ModuleContext<T>,
    params: &GroupParams,
) -> Result<ModuleOutcome, ModuleError> {
    if params.name.trim().is_empty() {
        return Err(ModuleError::validation("name must not be empty"));
    }
    let location = ctx.location(params.location.as_deref())?;
    let tree = GroupTree::fetch(ctx.client(), &location).await?;
    let existing = tree.find_group(&params.name, Some(&params.parent))?;

    match (params.state, existing) {
        (Presence::Present, Some(group)) => ModuleOutcome::new(false).with("group", group),
        (Presence::Present, None) => create_group(ctx, &tree, params).await,
        (Presence::Absent, Some(group)) => {
            if !ctx.check_mode() {
                info!(group = %group.name, id = %group.id, "deleting group");
                let response = ctx
                    .client()
                    .delete(&format!("groups/{}/{}", ctx.alias(), group.id))
                    .await
                    .with_context(|| format!("failed to delete group {}", group.name))?;
                ctx.settle(&[response], params.wait).await?;
            }
            ModuleOutcome::new(true).with("group", group)
        }
        (Presence::Absent, None) => ModuleOutcome::new(false).with("group", Value::Null),
    }
}

async fn create_group<T: Transport>(
    ctx: &ModuleContext<T>,
    tree: &GroupTree,
    params: &GroupParams,
) -> Result<ModuleOutcome, ModuleError> {
    let parent = tree
        .find_group(&params.parent, None)?
        .ok_or_else(|| {
            ModuleError::NotFound(format!("parent group {} does not exist", params.parent))
        })?;
    if ctx.check_mode() {
        return ModuleOutcome::new(true).with("group", Value::Null);
    }

    info!(group = %params.name, parent = %parent.name, "creating group");
    let created = ctx
        .client()
        .post(
            &format!("groups/{}", ctx.alias()),
            json!({
                "name": params.name,
                "description": params.description.as_deref().unwrap_or(&params.name),
                "parentGroupId": parent.id,
            }),
        )
        .await
        .with_context(|| format!("failed to create group {}", params.name))?;
    ModuleOutcome::new(true).with("group", created)
}
