//! Cross-account firewall policies between two account aliases in one
//! datacenter.
//!
//! A policy is identified either by `firewall_policy_id` or, when no id is
//! given, by its source, destination and port lists compared as sets. That
//! makes repeated `present` runs with the same lists converge on one policy.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::time::sleep;
use tracing::{debug, info};

use crate::api::Transport;
use crate::api::types::{Link, decode_items, find_link};
use crate::operation::OperationError;

use super::{ApiContext, ModuleContext, ModuleError, ModuleOutcome, Presence, default_true};

/// Firewall policy as returned by the API.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FirewallPolicy {
    /// Policy identifier.
    pub id: String,
    /// Provisioning status (`active`, `pending`, `deleted`).
    #[serde(default)]
    pub status: String,
    /// Whether the policy is enforced.
    #[serde(default)]
    pub enabled: bool,
    /// Source CIDR blocks.
    #[serde(default)]
    pub source: Vec<String>,
    /// Destination CIDR blocks.
    #[serde(default)]
    pub destination: Vec<String>,
    /// Destination account alias.
    #[serde(default)]
    pub destination_account: String,
    /// Allowed ports (`any`, `icmp`, `tcp/80`, `udp/1000-1010`).
    #[serde(default)]
    pub ports: Vec<String>,
    /// Hypermedia links.
    #[serde(default)]
    pub links: Vec<Link>,
}

impl FirewallPolicy {
    fn matches(&self, source: &[String], destination: &[String], ports: &[String]) -> bool {
        as_set(&self.source) == as_set(source)
            && as_set(&self.destination) == as_set(destination)
            && as_set(&self.ports) == as_set(ports)
    }
}

fn as_set(values: &[String]) -> BTreeSet<&str> {
    values.iter().map(String::as_str).collect()
}

/// Parameters of the `firewall_policy` module.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub struct FirewallPolicyParams {
    /// Datacenter; defaults to the session location.
    #[serde(default)]
    pub location: Option<String>,
    /// Account owning the source network.
    pub source_account_alias: String,
    /// Account owning the destination network; defaults to the source.
    #[serde(default)]
    pub destination_account_alias: Option<String>,
    /// Existing policy to manage.
    #[serde(default)]
    pub firewall_policy_id: Option<String>,
    /// Source CIDR blocks.
    #[serde(default)]
    pub source: Option<Vec<String>>,
    /// Destination CIDR blocks.
    #[serde(default)]
    pub destination: Option<Vec<String>>,
    /// Allowed ports.
    #[serde(default)]
    pub ports: Option<Vec<String>>,
    /// Whether the policy is enforced.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Desired state.
    #[serde(default)]
    pub state: Presence,
    /// Wait until the policy leaves the `pending` status.
    #[serde(default = "default_true")]
    pub wait: bool,
}

impl FirewallPolicyParams {
    fn destination_account(&self) -> &str {
        self.destination_account_alias
            .as_deref()
            .unwrap_or(&self.source_account_alias)
    }
}

/// Validates and normalises a firewall port expression.
///
/// # Errors
///
/// Returns [`ModuleError::Validation`] unless `raw` is `any`, `icmp`, or
/// `tcp`/`udp` followed by a port or an ascending port range.
pub fn normalize_port(raw: &str) -> Result<String, ModuleError> {
    let lowered = raw.trim().to_ascii_lowercase();
    if lowered == "any" || lowered == "icmp" {
        return Ok(lowered);
    }
    let invalid = || {
        ModuleError::Validation(format!(
            "invalid firewall port '{raw}': use any, icmp, tcp/<port>[-<port>] or udp/<port>[-<port>]"
        ))
    };
    let (protocol, range) = lowered.split_once('/').ok_or_else(invalid)?;
    if protocol != "tcp" && protocol != "udp" {
        return Err(invalid());
    }
    let (low, high) = range.split_once('-').unwrap_or((range, range));
    let first: u16 = low.parse().map_err(|_| invalid())?;
    let last: u16 = high.parse().map_err(|_| invalid())?;
    if first == 0 || last < first {
        return Err(invalid());
    }
    Ok(lowered)
}

fn normalize_ports(ports: &[String]) -> Result<Vec<String>, ModuleError> {
    ports.iter().map(|port| normalize_port(port)).collect()
}

struct PolicyApi<'a, T> {
    ctx: &'a ModuleContext<T>,
    base: String,
    destination_account: &'a str,
}

impl<'a, T: Transport> PolicyApi<'a, T> {
    fn new(
        ctx: &'a ModuleContext<T>,
        params: &'a FirewallPolicyParams,
        location: &str,
    ) -> Self {
        Self {
            ctx,
            base: format!(
                "/v2-experimental/firewallPolicies/{}/{location}",
                params.source_account_alias
            ),
            destination_account: params.destination_account(),
        }
    }

    fn policy_path(&self, id: &str) -> String {
        format!("{}/{id}", self.base)
    }

    async fn get(&self, id: &str) -> Result<Option<FirewallPolicy>, ModuleError> {
        let value = self
            .ctx
            .client()
            .get_optional(&self.policy_path(id))
            .await
            .with_context(|| format!("failed to read firewall policy {id}"))?;
        value
            .map(serde_json::from_value)
            .transpose()
            .map_err(ModuleError::from)
    }

    async fn list(&self) -> Result<Vec<FirewallPolicy>, ModuleError> {
        let body = self
            .ctx
            .client()
            .get(&format!(
                "{}?destinationAccount={}",
                self.base, self.destination_account
            ))
            .await
            .with_context(|| String::from("failed to list firewall policies"))?;
        Ok(decode_items(body)?)
    }

    async fn create(
        &self,
        source: &[String],
        destination: &[String],
        ports: &[String],
        enabled: bool,
    ) -> Result<String, ModuleError> {
        let response = self
            .ctx
            .client()
            .post(
                &self.base,
                json!({
                    "destinationAccount": self.destination_account,
                    "source": source,
                    "destination": destination,
                    "ports": ports,
                    "enabled": enabled,
                }),
            )
            .await
            .with_context(|| String::from("failed to create firewall policy"))?;
        created_policy_id(&response).ok_or_else(|| {
            ModuleError::Serialization(String::from(
                "firewall policy response carried no self link",
            ))
        })
    }

    async fn update(&self, id: &str, body: Value) -> Result<(), ModuleError> {
        self.ctx
            .client()
            .put(&self.policy_path(id), body)
            .await
            .with_context(|| format!("failed to update firewall policy {id}"))?;
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), ModuleError> {
        self.ctx
            .client()
            .delete(&self.policy_path(id))
            .await
            .with_context(|| format!("failed to delete firewall policy {id}"))?;
        Ok(())
    }

    async fn wait_until_active(&self, id: &str) -> Result<Option<FirewallPolicy>, ModuleError> {
        let settings = self.ctx.poll_settings();
        for attempt in 1..=settings.max_polls {
            let policy = self.get(id).await?;
            match &policy {
                Some(current) if current.status == "pending" => {
                    debug!(policy = id, attempt, "firewall policy still pending");
                }
                _ => return Ok(policy),
            }
            if attempt < settings.max_polls {
                sleep(settings.interval).await;
            }
        }
        Err(OperationError::Failed {
            failed: 1,
            total: 1,
            ids: id.to_owned(),
        }
        .into())
    }
}

fn created_policy_id(response: &Value) -> Option<String> {
    let links: Vec<Link> = match response {
        Value::Array(_) => serde_json::from_value(response.clone()).ok()?,
        other => serde_json::from_value(other.get("links")?.clone()).ok()?,
    };
    find_link(&links, "self")
        .and_then(Link::trailing_segment)
        .map(str::to_owned)
}

/// Ensures the firewall policy exists with the requested lists, or is gone.
///
/// # Errors
///
/// Returns [`ModuleError`] for invalid ports, an unknown policy id, API
/// failures or a policy that never leaves `pending`.
pub async fn run<T: Transport>(
    ctx: &ModuleContext<T>,
    params: &FirewallPolicyParams,
) -> Result<ModuleOutcome, ModuleError> {
    if params.source_account_alias.trim().is_empty() {
        return Err(ModuleError::validation(
            "source_account_alias must not be empty",
        ));
    }
    let location = ctx.location(params.location.as_deref())?;
    let api = PolicyApi::new(ctx, params, &location);
    let ports = params.ports.as_deref().map(normalize_ports).transpose()?;

    let existing = match &params.firewall_policy_id {
        Some(id) => {
            let policy = api.get(id).await?;
            if policy.is_none() && params.state == Presence::Present {
                return Err(ModuleError::NotFound(format!(
                    "Unable to find the firewall policy id: {id}"
                )));
            }
            policy
        }
        None => find_matching(&api, params, ports.as_deref()).await?,
    };

    match params.state {
        Presence::Present => ensure_present(&api, params, existing, ports).await,
        Presence::Absent => ensure_absent(&api, existing).await,
    }
}

async fn find_matching<T: Transport>(
    api: &PolicyApi<'_, T>,
    params: &FirewallPolicyParams,
    ports: Option<&[String]>,
) -> Result<Option<FirewallPolicy>, ModuleError> {
    let (Some(source), Some(destination), Some(port_list)) =
        (params.source.as_deref(), params.destination.as_deref(), ports)
    else {
        return Ok(None);
    };
    let policies = api.list().await?;
    Ok(policies
        .into_iter()
        .find(|policy| policy.matches(source, destination, port_list)))
}

async fn ensure_present<T: Transport>(
    api: &PolicyApi<'_, T>,
    params: &FirewallPolicyParams,
    existing: Option<FirewallPolicy>,
    ports: Option<Vec<String>>,
) -> Result<ModuleOutcome, ModuleError> {
    let Some(policy) = existing else {
        let (Some(source), Some(destination), Some(port_list)) =
            (params.source.as_deref(), params.destination.as_deref(), ports)
        else {
            return Err(ModuleError::validation(
                "source, destination and ports are required to create a firewall policy",
            ));
        };
        if source.is_empty() || destination.is_empty() || port_list.is_empty() {
            return Err(ModuleError::validation(
                "source, destination and ports must not be empty",
            ));
        }
        if api.ctx.check_mode() {
            return ModuleOutcome::new(true)
                .with("firewall_policy_id", Value::Null)?
                .with("firewall_policy", Value::Null);
        }
        info!(destination_account = api.destination_account, "creating firewall policy");
        let id = api
            .create(source, destination, &port_list, params.enabled)
            .await?;
        let created = if params.wait {
            api.wait_until_active(&id).await?
        } else {
            api.get(&id).await?
        };
        return ModuleOutcome::new(true)
            .with("firewall_policy_id", &id)?
            .with("firewall_policy", created);
    };

    let mut changes = serde_json::Map::new();
    let mut desired = policy.clone();
    if let Some(source) = &params.source {
        if as_set(source) != as_set(&policy.source) {
            desired.source.clone_from(source);
            changes.insert(String::from("source"), json!(source));
        }
    }
    if let Some(destination) = &params.destination {
        if as_set(destination) != as_set(&policy.destination) {
            desired.destination.clone_from(destination);
            changes.insert(String::from("destination"), json!(destination));
        }
    }
    if let Some(port_list) = &ports {
        if as_set(port_list) != as_set(&policy.ports) {
            desired.ports.clone_from(port_list);
            changes.insert(String::from("ports"), json!(port_list));
        }
    }
    if params.enabled != policy.enabled {
        desired.enabled = params.enabled;
        changes.insert(String::from("enabled"), json!(params.enabled));
    }

    if changes.is_empty() {
        return ModuleOutcome::new(false)
            .with("firewall_policy_id", &policy.id)?
            .with("firewall_policy", &policy);
    }
    if api.ctx.check_mode() {
        return ModuleOutcome::new(true)
            .with("firewall_policy_id", &policy.id)?
            .with("firewall_policy", &desired);
    }

    info!(policy = %policy.id, fields = ?changes.keys().collect::<Vec<_>>(), "updating firewall policy");
    api.update(
        &policy.id,
        json!({
            "destinationAccount": api.destination_account,
            "source": desired.source,
            "destination": desired.destination,
            "ports": desired.ports,
            "enabled": desired.enabled,
        }),
    )
    .await?;
    let updated = if params.wait {
        api.wait_until_active(&policy.id).await?
    } else {
        Some(desired)
    };
    ModuleOutcome::new(true)
        .with("firewall_policy_id", &policy.id)?
        .with("firewall_policy", updated)
}

async fn ensure_absent<T: Transport>(
    api: &PolicyApi<'_, T>,
    existing: Option<FirewallPolicy>,
) -> Result<ModuleOutcome, ModuleError> {
    let Some(policy) = existing else {
        return ModuleOutcome::new(false)
            .with("firewall_policy_id", Value::Null)?
            .with("firewall_policy", Value::Null);
    };
    if !api.ctx.check_mode() {
        info!(policy = %policy.id, "deleting firewall policy");
        api.delete(&policy.id).await?;
    }
    ModuleOutcome::new(true)
        .with("firewall_policy_id", &policy.id)?
        .with("firewall_policy", &policy)
}
