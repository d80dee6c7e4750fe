//! Server lookups shared by the server-centric modules.

use crate::api::Transport;
use crate::api::types::Server;

use super::{ApiContext, ModuleContext, ModuleError};

pub(crate) fn server_path(alias: &str, server_id: &str) -> String {
    format!("servers/{alias}/{server_id}")
}

/// Fetches a server, returning `None` when it does not exist.
pub(crate) async fn fetch_server<T: Transport>(
    ctx: &ModuleContext<T>,
    server_id: &str,
) -> Result<Option<Server>, ModuleError> {
    let value = ctx
        .client()
        .get_optional(&server_path(ctx.alias(), server_id))
        .await
        .with_context(|| format!("failed to read server {server_id}"))?;
    value
        .map(serde_json::from_value)
        .transpose()
        .map_err(ModuleError::from)
}

/// Fetches every server in `server_ids`, failing on the first missing one.
pub(crate) async fn require_servers<T: Transport>(
    ctx: &ModuleContext<T>,
    server_ids: &[String],
) -> Result<Vec<Server>, ModuleError> {
    if server_ids.is_empty() {
        return Err(ModuleError::validation(
            "server_ids must be a non-empty list of server ids",
        ));
    }
    let mut servers = Vec::with_capacity(server_ids.len());
    for server_id in server_ids {
        let server = fetch_server(ctx, server_id)
            .await?
            .ok_or_else(|| ModuleError::NotFound(format!("server {server_id} does not exist")))?;
        servers.push(server);
    }
    Ok(servers)
}
