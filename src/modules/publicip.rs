//! Public IP addresses on servers.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::info;

use crate::api::Transport;
use crate::api::types::Server;

use super::lookup::{require_servers, server_path};
use super::{ApiContext, ModuleContext, ModuleError, ModuleOutcome, Presence, default_true};

/// Transport protocol of a public IP port mapping.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Protocol {
    /// TCP.
    #[default]
    Tcp,
    /// UDP.
    Udp,
    /// ICMP.
    Icmp,
}

impl Protocol {
    /// Parses a protocol name, ignoring case.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "TCP" => Some(Self::Tcp),
            "UDP" => Some(Self::Udp),
            "ICMP" => Some(Self::Icmp),
            _ => None,
        }
    }

    /// Parses `raw` when given, falling back to `default`.
    pub(crate) fn parse_or(raw: Option<&str>, default: Self) -> Result<Self, ModuleError> {
        raw.map_or(Ok(default), |name| {
            Self::parse(name).ok_or_else(|| {
                ModuleError::Validation(format!(
                    "invalid protocol '{name}': valid protocols are TCP, UDP and ICMP"
                ))
            })
        })
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Tcp => "TCP",
            Self::Udp => "UDP",
            Self::Icmp => "ICMP",
        })
    }
}

/// A port mapping as supplied by the caller.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq)]
pub struct PortSpec {
    /// Port to open.
    #[serde(default)]
    pub port: Option<u16>,
    /// Protocol; defaults to the module's `protocol`.
    #[serde(default)]
    pub protocol: Option<String>,
    /// Upper bound of a port range.
    #[serde(default, alias = "portTo")]
    pub port_to: Option<u16>,
}

/// A validated port mapping in the shape the API expects.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct PortMapping {
    /// Port to open.
    pub port: u16,
    /// Protocol.
    pub protocol: Protocol,
    /// Upper bound of a port range.
    #[serde(rename = "portTo", default, skip_serializing_if = "Option::is_none")]
    pub port_to: Option<u16>,
}

/// Validates port mappings, injecting `default_protocol` where none is given.
///
/// # Errors
///
/// Returns [`ModuleError::Validation`] when an entry has no port, names an
/// unknown protocol or has a range that ends before it starts.
pub fn validate_ports(
    ports: &[PortSpec],
    default_protocol: Protocol,
) -> Result<Vec<PortMapping>, ModuleError> {
    ports
        .iter()
        .map(|spec| {
            let port = spec
                .port
                .ok_or_else(|| ModuleError::validation("You must provide a port"))?;
            let protocol = Protocol::parse_or(spec.protocol.as_deref(), default_protocol)?;
            if let Some(port_to) = spec.port_to {
                if port_to < port {
                    return Err(ModuleError::Validation(format!(
                        "port range {port}-{port_to} ends before it starts"
                    )));
                }
            }
            Ok(PortMapping {
                port,
                protocol,
                port_to: spec.port_to,
            })
        })
        .collect()
}

/// Parameters of the `publicip` module.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub struct PublicIpParams {
    /// Servers to manage.
    pub server_ids: Vec<String>,
    /// Default protocol for `ports` entries without one.
    #[serde(default)]
    pub protocol: Option<String>,
    /// Ports to open on the public IP.
    #[serde(default)]
    pub ports: Vec<PortSpec>,
    /// CIDR blocks allowed to reach the public IP.
    #[serde(default)]
    pub source_restrictions: Vec<String>,
    /// Desired state.
    #[serde(default)]
    pub state: Presence,
    /// Wait for the operations to finish.
    #[serde(default = "default_true")]
    pub wait: bool,
}

impl PublicIpParams {
    fn default_protocol(&self) -> Result<Protocol, ModuleError> {
        Protocol::parse_or(self.protocol.as_deref(), Protocol::Tcp)
    }
}

/// Ensures each server has (or has no) public IP address.
///
/// # Errors
///
/// Returns [`ModuleError`] on invalid ports, missing servers, API failures or
/// operations that do not succeed.
pub async fn run<T: Transport>(
    ctx: &ModuleContext<T>,
    params: &PublicIpParams,
) -> Result<ModuleOutcome, ModuleError> {
    let servers = require_servers(ctx, &params.server_ids).await?;
    match params.state {
        Presence::Present => {
            let ports = validate_ports(&params.ports, params.default_protocol()?)?;
            if ports.is_empty() {
                return Err(ModuleError::validation(
                    "ports must list at least one port when state is present",
                ));
            }
            ensure_public_ips(ctx, params, &servers, &ports).await
        }
        Presence::Absent => remove_public_ips(ctx, params, &servers).await,
    }
}

async fn ensure_public_ips<T: Transport>(
    ctx: &ModuleContext<T>,
    params: &PublicIpParams,
    servers: &[Server],
    ports: &[PortMapping],
) -> Result<ModuleOutcome, ModuleError> {
    let targets: Vec<&Server> = servers
        .iter()
        .filter(|server| server.public_ips().next().is_none())
        .collect();
    let mut responses = Vec::new();
    if !ctx.check_mode() {
        for server in &targets {
            responses
                .push(add_public_ip(ctx, &server.id, ports, &params.source_restrictions).await?);
        }
    }
    ctx.settle(&responses, params.wait).await?;
    let changed_ids: Vec<&str> = targets.iter().map(|server| server.id.as_str()).collect();
    ModuleOutcome::new(!changed_ids.is_empty()).with("server_ids", changed_ids)
}

async fn remove_public_ips<T: Transport>(
    ctx: &ModuleContext<T>,
    params: &PublicIpParams,
    servers: &[Server],
) -> Result<ModuleOutcome, ModuleError> {
    let mut changed_ids = Vec::new();
    let mut responses = Vec::new();
    for server in servers {
        let addresses: Vec<&str> = server.public_ips().collect();
        if addresses.is_empty() {
            continue;
        }
        changed_ids.push(server.id.as_str());
        if ctx.check_mode() {
            continue;
        }
        for address in addresses {
            info!(server = %server.id, address, "removing public IP");
            let path = format!(
                "{}/publicIPAddresses/{address}",
                server_path(ctx.alias(), &server.id)
            );
            responses.push(ctx.client().delete(&path).await.with_context(|| {
                format!("failed to remove public IP {address} from {}", server.id)
            })?);
        }
    }
    ctx.settle(&responses, params.wait).await?;
    ModuleOutcome::new(!changed_ids.is_empty()).with("server_ids", changed_ids)
}

/// Adds a public IP to `server_id` and returns the status link response.
pub(crate) async fn add_public_ip<T: Transport>(
    ctx: &ModuleContext<T>,
    server_id: &str,
    ports: &[PortMapping],
    source_restrictions: &[String],
) -> Result<Value, ModuleError> {
    info!(server = %server_id, ports = ports.len(), "adding public IP");
    let restrictions: Vec<Value> = source_restrictions
        .iter()
        .map(|cidr| json!({ "cidr": cidr }))
        .collect();
    ctx.client()
        .post(
            &format!("{}/publicIPAddresses", server_path(ctx.alias(), server_id)),
            json!({ "ports": ports, "sourceRestrictions": restrictions }),
        )
        .await
        .with_context(|| format!("failed to add public IP to {server_id}"))
}
