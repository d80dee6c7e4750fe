//! Servers: create, reconcile a group to an exact count, delete, and power
//! on or off.

mod create;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::info;

use crate::api::Transport;
use crate::api::types::Server;
use crate::group_tree::DEFAULT_GROUP;

use super::lookup::{fetch_server, require_servers, server_path};
use super::modify_server::validate_hardware;
use super::publicip::PortSpec;
use super::{ApiContext, ModuleContext, ModuleError, ModuleOutcome, default_true};

/// Longest server name the API accepts; it appends a sequence number.
pub const MAX_NAME_LEN: usize = 6;

/// Desired server state.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerState {
    /// Servers exist (`count` new ones, or `exact_count` in `count_group`).
    #[default]
    Present,
    /// Servers in `server_ids` are deleted.
    Absent,
    /// Servers in `server_ids` are powered on.
    Started,
    /// Servers in `server_ids` are powered off.
    Stopped,
}

/// Server hardware class.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ServerType {
    /// Standard virtual machine.
    #[default]
    Standard,
    /// Hyperscale virtual machine on local SSD storage.
    Hyperscale,
    /// Bare metal host.
    BareMetal,
}

/// Storage class of a server's disks.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum StorageType {
    /// Standard storage.
    #[default]
    Standard,
    /// Premium storage with replication.
    Premium,
    /// Hyperscale local storage.
    Hyperscale,
}

/// Parameters of the `server` module.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub struct ServerParams {
    /// Base name of new servers, 1 to 6 characters.
    #[serde(default)]
    pub name: Option<String>,
    /// Template to build from; matched case-insensitively as a substring.
    #[serde(default)]
    pub template: Option<String>,
    /// Group for new servers, by name or id.
    #[serde(default = "default_group")]
    pub group: String,
    /// Network for new servers, by id or name.
    #[serde(default)]
    pub network_id: Option<String>,
    /// Datacenter; defaults to the session location.
    #[serde(default)]
    pub location: Option<String>,
    /// Let CLC manage the operating system.
    #[serde(default)]
    pub managed_os: bool,
    /// Description of new servers.
    #[serde(default)]
    pub description: Option<String>,
    /// CPU count.
    #[serde(default = "default_cpu")]
    pub cpu: u32,
    /// Memory in gigabytes.
    #[serde(default = "default_memory")]
    pub memory: u32,
    /// Hardware class.
    #[serde(default, rename = "type")]
    pub server_type: ServerType,
    /// Storage class; hyperscale servers default to hyperscale storage.
    #[serde(default)]
    pub storage_type: Option<StorageType>,
    /// Primary DNS server.
    #[serde(default)]
    pub primary_dns: Option<String>,
    /// Secondary DNS server.
    #[serde(default)]
    pub secondary_dns: Option<String>,
    /// Static IP address.
    #[serde(default)]
    pub ip_address: Option<String>,
    /// Administrator password.
    #[serde(default)]
    pub password: Option<String>,
    /// Extra disks, passed through in API form.
    #[serde(default)]
    pub additional_disks: Vec<Value>,
    /// Custom fields, passed through in API form.
    #[serde(default)]
    pub custom_fields: Vec<Value>,
    /// Alert policy to attach, by id.
    #[serde(default)]
    pub alert_policy_id: Option<String>,
    /// Alert policy to attach, by name.
    #[serde(default)]
    pub alert_policy_name: Option<String>,
    /// Anti-affinity policy for hyperscale servers, by id.
    #[serde(default)]
    pub anti_affinity_policy_id: Option<String>,
    /// Anti-affinity policy for hyperscale servers, by name.
    #[serde(default)]
    pub anti_affinity_policy_name: Option<String>,
    /// Add a public IP to new servers.
    #[serde(default)]
    pub add_public_ip: bool,
    /// Default protocol of `public_ip_ports`.
    #[serde(default)]
    pub public_ip_protocol: Option<String>,
    /// Ports opened on the public IP.
    #[serde(default)]
    pub public_ip_ports: Vec<PortSpec>,
    /// Number of servers to create.
    #[serde(default = "default_count")]
    pub count: u32,
    /// Number of servers `count_group` must hold.
    #[serde(default)]
    pub exact_count: Option<u32>,
    /// Group reconciled by `exact_count`.
    #[serde(default)]
    pub count_group: Option<String>,
    /// Servers targeted by `absent`, `started` and `stopped`.
    #[serde(default)]
    pub server_ids: Vec<String>,
    /// Desired state.
    #[serde(default)]
    pub state: ServerState,
    /// Wait for the operations to finish.
    #[serde(default = "default_true")]
    pub wait: bool,
}

fn default_group() -> String {
    DEFAULT_GROUP.to_owned()
}

const fn default_cpu() -> u32 {
    1
}

const fn default_memory() -> u32 {
    1
}

const fn default_count() -> u32 {
    1
}

impl ServerParams {
    /// Storage class sent on creation.
    const fn effective_storage_type(&self) -> StorageType {
        match (self.server_type, self.storage_type) {
            (_, Some(storage)) => storage,
            (ServerType::Hyperscale, None) => StorageType::Hyperscale,
            (_, None) => StorageType::Standard,
        }
    }

    /// Validates the parameters of the `present` state.
    ///
    /// # Errors
    ///
    /// Returns [`ModuleError::Validation`] for a missing template or name, a
    /// name longer than six characters, out-of-range hardware, hyperscale
    /// servers on other storage, or `exact_count` without `count_group`.
    /// With `exact_count`, new servers land in `count_group`, so a `group`
    /// naming a different group is rejected.
    pub fn validate_present(&self) -> Result<(), ModuleError> {
        if self.template.as_deref().is_none_or(|template| template.trim().is_empty()) {
            return Err(ModuleError::validation("template is required when state is present"));
        }
        let name = self.name.as_deref().map(str::trim).unwrap_or_default();
        if name.is_empty() || name.chars().count() > MAX_NAME_LEN {
            return Err(ModuleError::Validation(format!(
                "name must be 1 to {MAX_NAME_LEN} characters long"
            )));
        }
        validate_hardware(Some(self.cpu), Some(self.memory))?;
        if self.server_type == ServerType::Hyperscale
            && self.effective_storage_type() != StorageType::Hyperscale
        {
            return Err(ModuleError::validation(
                "hyperscale servers require storage_type hyperscale",
            ));
        }
        if self.exact_count.is_some() && self.count_group.is_none() {
            return Err(ModuleError::validation(
                "count_group is required when exact_count is set",
            ));
        }
        let group_conflicts = self.group != DEFAULT_GROUP
            && self
                .count_group
                .as_deref()
                .is_some_and(|count_group| count_group != self.group);
        if self.exact_count.is_some() && group_conflicts {
            return Err(ModuleError::validation(
                "group must match count_group when exact_count is set",
            ));
        }
        if self.exact_count.is_none() && self.count == 0 {
            return Err(ModuleError::validation("count must be at least 1"));
        }
        if self.add_public_ip && self.public_ip_ports.is_empty() {
            return Err(ModuleError::validation(
                "public_ip_ports must list at least one port when add_public_ip is set",
            ));
        }
        Ok(())
    }
}

/// Applies the requested server state.
///
/// # Errors
///
/// Returns [`ModuleError`] for invalid parameters, unknown servers, groups,
/// templates or networks, failed API calls or unsuccessful operations.
pub async fn run<T: Transport>(
    ctx: &ModuleContext<T>,
    params: &ServerParams,
) -> Result<ModuleOutcome, ModuleError> {
    match params.state {
        ServerState::Present => {
            params.validate_present()?;
            create::ensure_present(ctx, params).await
        }
        ServerState::Absent => delete_servers(ctx, params).await,
        ServerState::Started => set_power_state(ctx, params, PowerState::Started).await,
        ServerState::Stopped => set_power_state(ctx, params, PowerState::Stopped).await,
    }
}

/// Deletes servers; ids that no longer exist are skipped.
async fn delete_servers<T: Transport>(
    ctx: &ModuleContext<T>,
    params: &ServerParams,
) -> Result<ModuleOutcome, ModuleError> {
    if params.server_ids.is_empty() {
        return Err(ModuleError::validation(
            "server_ids must be a non-empty list of server ids",
        ));
    }
    let mut deleted = Vec::new();
    for server_id in &params.server_ids {
        if let Some(server) = fetch_server(ctx, server_id).await? {
            deleted.push(server);
        }
    }
    let responses = remove_servers(ctx, &deleted).await?;
    ctx.settle(&responses, params.wait).await?;
    let ids: Vec<&str> = deleted.iter().map(|server| server.id.as_str()).collect();
    ModuleOutcome::new(!ids.is_empty())
        .with("server_ids", &ids)?
        .with("servers", &deleted)
}

/// Issues `DELETE` for each server unless in check mode.
pub(super) async fn remove_servers<T: Transport>(
    ctx: &ModuleContext<T>,
    servers: &[Server],
) -> Result<Vec<Value>, ModuleError> {
    let mut responses = Vec::new();
    if ctx.check_mode() {
        return Ok(responses);
    }
    for server in servers {
        info!(server = %server.id, "deleting server");
        responses.push(
            ctx.client()
                .delete(&server_path(ctx.alias(), &server.id))
                .await
                .with_context(|| format!("failed to delete server {}", server.id))?,
        );
    }
    Ok(responses)
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum PowerState {
    Started,
    Stopped,
}

impl PowerState {
    const fn api_value(self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::Stopped => "stopped",
        }
    }

    const fn operation(self) -> &'static str {
        match self {
            Self::Started => "powerOn",
            Self::Stopped => "powerOff",
        }
    }
}

async fn set_power_state<T: Transport>(
    ctx: &ModuleContext<T>,
    params: &ServerParams,
    target: PowerState,
) -> Result<ModuleOutcome, ModuleError> {
    let servers = require_servers(ctx, &params.server_ids).await?;
    let pending: Vec<&str> = servers
        .iter()
        .filter(|server| server.details.power_state != target.api_value())
        .map(|server| server.id.as_str())
        .collect();

    if !pending.is_empty() && !ctx.check_mode() {
        info!(servers = ?pending, operation = target.operation(), "changing power state");
        let response = ctx
            .client()
            .post(
                &format!("operations/{}/servers/{}", ctx.alias(), target.operation()),
                json!(pending),
            )
            .await
            .with_context(|| format!("failed to {} servers", target.operation()))?;
        ctx.settle(&[response], params.wait).await?;
    }
    ModuleOutcome::new(!pending.is_empty()).with("server_ids", pending)
}

#[cfg(test)]
mod tests;
