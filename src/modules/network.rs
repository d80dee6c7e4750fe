//! Datacenter networks: claim and name a network, update it, or release it.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::info;

use crate::api::Transport;
use crate::api::types::{Link, decode_items, find_link};
use crate::operation::{OperationError, OperationStatus, poll_operation};

use super::{ApiContext, ModuleContext, ModuleError, ModuleOutcome, Presence, default_true};

/// Network as returned by the API.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Network {
    /// Network identifier.
    pub id: String,
    /// Address block.
    #[serde(default)]
    pub cidr: Option<String>,
    /// Description.
    #[serde(default)]
    pub description: Option<String>,
    /// Gateway address.
    #[serde(default)]
    pub gateway: Option<String>,
    /// Name.
    #[serde(default)]
    pub name: String,
    /// Netmask.
    #[serde(default)]
    pub netmask: Option<String>,
    /// `private` or `public`.
    #[serde(default, rename = "type")]
    pub network_type: Option<String>,
    /// VLAN number.
    #[serde(default)]
    pub vlan: Option<u32>,
    /// Hypermedia links.
    #[serde(default)]
    pub links: Vec<Link>,
}

/// Parameters of the `network` module.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub struct NetworkParams {
    /// Network to manage.
    #[serde(default)]
    pub id: Option<String>,
    /// Name to look up by or to assign.
    #[serde(default)]
    pub name: Option<String>,
    /// Description to assign.
    #[serde(default)]
    pub description: Option<String>,
    /// Datacenter; defaults to the session location.
    #[serde(default)]
    pub location: Option<String>,
    /// Desired state.
    #[serde(default)]
    pub state: Presence,
    /// Wait for the claim to finish.
    #[serde(default = "default_true")]
    pub wait: bool,
}

struct NetworkApi<'a, T> {
    ctx: &'a ModuleContext<T>,
    base: String,
}

impl<'a, T: Transport> NetworkApi<'a, T> {
    fn new(ctx: &'a ModuleContext<T>, location: &str) -> Self {
        Self {
            ctx,
            base: format!("/v2-experimental/networks/{}/{location}", ctx.alias()),
        }
    }

    async fn list(&self) -> Result<Vec<Network>, ModuleError> {
        let body = self
            .ctx
            .client()
            .get(&self.base)
            .await
            .with_context(|| String::from("failed to list networks"))?;
        Ok(decode_items(body)?)
    }

    async fn fetch(&self, href: &str) -> Result<Network, ModuleError> {
        let body = self
            .ctx
            .client()
            .get(href)
            .await
            .with_context(|| format!("failed to read network {href}"))?;
        Ok(serde_json::from_value(body)?)
    }

    async fn claim(&self) -> Result<Value, ModuleError> {
        info!(base = %self.base, "claiming network");
        self.ctx
            .client()
            .post(&format!("{}/claim", self.base), json!({}))
            .await
            .with_context(|| String::from("failed to claim a network"))
    }

    async fn update(&self, network: &Network) -> Result<(), ModuleError> {
        info!(network = %network.id, name = %network.name, "updating network");
        self.ctx
            .client()
            .put(
                &format!("{}/{}", self.base, network.id),
                json!({ "name": network.name, "description": network.description }),
            )
            .await
            .with_context(|| format!("failed to update network {}", network.id))?;
        Ok(())
    }

    async fn release(&self, network: &Network) -> Result<(), ModuleError> {
        info!(network = %network.id, "releasing network");
        self.ctx
            .client()
            .post(&format!("{}/{}/release", self.base, network.id), json!({}))
            .await
            .with_context(|| format!("failed to release network {}", network.id))?;
        Ok(())
    }
}

/// Ensures the network is claimed with the given name and description, or
/// released.
///
/// # Errors
///
/// Returns [`ModuleError`] for unknown ids, failed claims or API failures.
pub async fn run<T: Transport>(
    ctx: &ModuleContext<T>,
    params: &NetworkParams,
) -> Result<ModuleOutcome, ModuleError> {
    let location = ctx.location(params.location.as_deref())?;
    let api = NetworkApi::new(ctx, &location);
    let networks = api.list().await?;
    let existing = find_network(&networks, params);

    match params.state {
        Presence::Present => match existing {
            Some(network) => update_network(&api, params, network).await,
            None if params.id.is_some() => Err(ModuleError::NotFound(format!(
                "network {} does not exist in {location}",
                params.id.as_deref().unwrap_or_default()
            ))),
            None => claim_network(&api, params).await,
        },
        Presence::Absent => {
            let Some(network) = existing else {
                return ModuleOutcome::new(false).with("network", Value::Null);
            };
            if !ctx.check_mode() {
                api.release(network).await?;
            }
            ModuleOutcome::new(true).with("network", network)
        }
    }
}

fn find_network<'a>(networks: &'a [Network], params: &NetworkParams) -> Option<&'a Network> {
    if let Some(id) = &params.id {
        return networks.iter().find(|network| &network.id == id);
    }
    let name = params.name.as_deref()?;
    networks.iter().find(|network| network.name == name)
}

async fn update_network<T: Transport>(
    api: &NetworkApi<'_, T>,
    params: &NetworkParams,
    network: &Network,
) -> Result<ModuleOutcome, ModuleError> {
    let mut desired = network.clone();
    if let Some(name) = &params.name {
        desired.name.clone_from(name);
    }
    if params.description.is_some() {
        desired.description.clone_from(&params.description);
    }
    if &desired == network {
        return ModuleOutcome::new(false).with("network", network);
    }
    if !api.ctx.check_mode() {
        api.update(&desired).await?;
    }
    ModuleOutcome::new(true).with("network", &desired)
}

async fn claim_network<T: Transport>(
    api: &NetworkApi<'_, T>,
    params: &NetworkParams,
) -> Result<ModuleOutcome, ModuleError> {
    if api.ctx.check_mode() {
        return ModuleOutcome::new(true).with("network", Value::Null);
    }
    let response = api.claim().await?;
    let operation_id = response
        .get("operationId")
        .and_then(Value::as_str)
        .ok_or_else(|| {
            ModuleError::Serialization(String::from("claim response carried no operationId"))
        })?
        .to_owned();
    if !params.wait {
        return ModuleOutcome::new(true)
            .with("network", Value::Null)?
            .with("operation_id", &operation_id);
    }

    let poll = poll_operation(api.ctx.client(), &operation_id, api.ctx.poll_settings())
        .await
        .map_err(OperationError::from)?;
    if poll.status != OperationStatus::Succeeded {
        return Err(OperationError::Failed {
            failed: 1,
            total: 1,
            ids: operation_id,
        }
        .into());
    }
    let href = claimed_network_href(&poll.document).ok_or_else(|| {
        ModuleError::Serialization(format!(
            "operation {operation_id} did not reference the claimed network"
        ))
    })?;
    let claimed = api.fetch(&href).await?;
    if params.name.is_none() && params.description.is_none() {
        return ModuleOutcome::new(true).with("network", &claimed);
    }

    let mut named = claimed;
    if let Some(name) = &params.name {
        named.name.clone_from(name);
    }
    if params.description.is_some() {
        named.description.clone_from(&params.description);
    }
    api.update(&named).await?;
    ModuleOutcome::new(true).with("network", &named)
}

fn claimed_network_href(document: &Value) -> Option<String> {
    let links: Vec<Link> =
        serde_json::from_value(document.get("summary")?.get("links")?.clone()).ok()?;
    find_link(&links, "network").map(|link| link.href.clone())
}
