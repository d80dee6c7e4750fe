//! Declarative resource modules.
//!
//! Every module takes a [`ModuleContext`] and a typed parameter struct, reads
//! the current state of its resource, decides whether anything has to change
//! and returns a [`ModuleOutcome`]. In check mode the decision is reported but
//! no mutating request is sent.

pub mod aa_policy;
pub mod alert_policy;
pub mod blueprint_package;
mod error;
pub mod facts;
pub mod firewall_policy;
pub mod group;
pub mod loadbalancer;
mod lookup;
pub mod metadata;
pub mod modify_server;
pub mod network;
pub mod publicip;
pub mod server;
pub mod server_snapshot;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::info;

use crate::api::{ClcClient, HttpTransport, Transport};
use crate::operation::{PollSettings, operation_ids, wait_for_success};

pub use error::ModuleError;
pub(crate) use error::ApiContext;

/// Shared state handed to every module run.
#[derive(Clone, Debug)]
pub struct ModuleContext<T = HttpTransport> {
    client: ClcClient<T>,
    check_mode: bool,
    poll: PollSettings,
}

impl<T: Transport> ModuleContext<T> {
    /// Creates a context that mutates remote state and polls with the
    /// default cadence.
    #[must_use]
    pub fn new(client: ClcClient<T>) -> Self {
        Self {
            client,
            check_mode: false,
            poll: PollSettings::default(),
        }
    }

    /// Enables or disables check (dry-run) mode.
    #[must_use]
    pub const fn with_check_mode(mut self, check_mode: bool) -> Self {
        self.check_mode = check_mode;
        self
    }

    /// Overrides the polling cadence.
    #[must_use]
    pub const fn with_poll_settings(mut self, poll: PollSettings) -> Self {
        self.poll = poll;
        self
    }

    /// Returns the API client.
    #[must_use]
    pub const fn client(&self) -> &ClcClient<T> {
        &self.client
    }

    /// Returns `true` in check mode.
    #[must_use]
    pub const fn check_mode(&self) -> bool {
        self.check_mode
    }

    /// Returns the polling cadence.
    #[must_use]
    pub const fn poll_settings(&self) -> PollSettings {
        self.poll
    }

    /// Returns the account alias of the session.
    #[must_use]
    pub fn alias(&self) -> &str {
        self.client.alias()
    }

    /// Returns the requested datacenter, falling back to the session's.
    pub(crate) fn location(&self, requested: Option<&str>) -> Result<String, ModuleError> {
        requested
            .map(str::trim)
            .filter(|location| !location.is_empty())
            .or_else(|| self.client.location())
            .map(str::to_owned)
            .ok_or_else(|| {
                ModuleError::validation("location is required: pass 'location' or set CLC_LOCATION")
            })
    }

    /// Waits for every operation referenced by `responses` when `wait` is set.
    pub(crate) async fn settle(&self, responses: &[Value], wait: bool) -> Result<(), ModuleError> {
        if !wait {
            return Ok(());
        }
        let ids: Vec<String> = responses.iter().flat_map(operation_ids).collect();
        if ids.is_empty() {
            return Ok(());
        }
        info!(operations = ids.len(), "waiting for operations to complete");
        wait_for_success(&self.client, &ids, self.poll).await?;
        Ok(())
    }
}

/// Desired state shared by modules that only create or delete.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Presence {
    /// The resource must exist.
    #[default]
    Present,
    /// The resource must not exist.
    Absent,
}

pub(crate) const fn default_true() -> bool {
    true
}

/// Result of a module run: the `changed` flag plus a resource payload.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ModuleOutcome {
    /// Whether remote state changed (or would change in check mode).
    pub changed: bool,
    /// Resource specific payload, merged into the result object.
    pub data: Map<String, Value>,
}

impl ModuleOutcome {
    /// Creates an outcome with the given `changed` flag and no payload.
    #[must_use]
    pub fn new(changed: bool) -> Self {
        Self {
            changed,
            data: Map::new(),
        }
    }

    /// Adds a payload entry.
    ///
    /// # Errors
    ///
    /// Returns [`ModuleError::Serialization`] when `value` cannot be
    /// represented as JSON.
    pub fn with(mut self, key: &str, value: impl Serialize) -> Result<Self, ModuleError> {
        self.data.insert(key.to_owned(), serde_json::to_value(value)?);
        Ok(self)
    }

    /// Returns a payload entry.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// Renders the Ansible style result object.
    #[must_use]
    pub fn to_json(&self) -> Value {
        let mut object = self.data.clone();
        object.insert(String::from("changed"), Value::Bool(self.changed));
        Value::Object(object)
    }
}

/// Every module the crate implements.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ModuleKind {
    /// Anti-affinity policies.
    AaPolicy,
    /// Alert policies.
    AlertPolicy,
    /// Blueprint package execution.
    BlueprintPackage,
    /// Firewall policies.
    FirewallPolicy,
    /// Server groups.
    Group,
    /// Read-only group details.
    GroupFacts,
    /// Shared load balancers.
    LoadBalancer,
    /// Metadata records.
    Metadata,
    /// CPU, memory and policy changes on existing servers.
    ModifyServer,
    /// Networks.
    Network,
    /// Public IP addresses.
    PublicIp,
    /// Servers.
    Server,
    /// Read-only server details.
    ServerFacts,
    /// Server snapshots.
    ServerSnapshot,
}

fn parse<P: DeserializeOwned>(args: Value) -> Result<P, ModuleError> {
    serde_json::from_value(args).map_err(|err| ModuleError::Arguments(err.to_string()))
}

/// Deserialises `args` for `kind` and runs the module.
///
/// # Errors
///
/// Returns [`ModuleError::Arguments`] when `args` do not match the module's
/// parameters and whatever error the module itself raises.
pub async fn run_module<T: Transport>(
    ctx: &ModuleContext<T>,
    kind: ModuleKind,
    args: Value,
) -> Result<ModuleOutcome, ModuleError> {
    info!(module = ?kind, check_mode = ctx.check_mode(), "running module");
    match kind {
        ModuleKind::AaPolicy => aa_policy::run(ctx, &parse(args)?).await,
        ModuleKind::AlertPolicy => alert_policy::run(ctx, &parse(args)?).await,
        ModuleKind::BlueprintPackage => blueprint_package::run(ctx, &parse(args)?).await,
        ModuleKind::FirewallPolicy => firewall_policy::run(ctx, &parse(args)?).await,
        ModuleKind::Group => group::run(ctx, &parse(args)?).await,
        ModuleKind::GroupFacts => facts::group_facts(ctx, &parse(args)?).await,
        ModuleKind::LoadBalancer => loadbalancer::run(ctx, &parse(args)?).await,
        ModuleKind::Metadata => metadata::run(ctx, &parse(args)?).await,
        ModuleKind::ModifyServer => modify_server::run(ctx, &parse(args)?).await,
        ModuleKind::Network => network::run(ctx, &parse(args)?).await,
        ModuleKind::PublicIp => publicip::run(ctx, &parse(args)?).await,
        ModuleKind::Server => server::run(ctx, &parse(args)?).await,
        ModuleKind::ServerFacts => facts::server_facts(ctx, &parse(args)?).await,
        ModuleKind::ServerSnapshot => server_snapshot::run(ctx, &parse(args)?).await,
    }
}

#[cfg(test)]
mod tests;
