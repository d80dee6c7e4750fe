//! Shared load balancers, their per-port pools and pool node lists.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::info;

use crate::api::Transport;
use crate::api::types::{Link, decode_items};

use super::{ApiContext, ModuleContext, ModuleError, ModuleOutcome};

/// Ports a shared load balancer pool may listen on.
pub const ALLOWED_PORTS: [u16; 2] = [80, 443];

/// Balancing method of a pool.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum LbMethod {
    /// Send traffic to the node with the fewest connections.
    LeastConnection,
    /// Rotate through the nodes.
    #[default]
    RoundRobin,
}

/// Session persistence of a pool.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Persistence {
    /// No stickiness.
    #[default]
    Standard,
    /// Pin clients to a node.
    Sticky,
}

/// Administrative status of a load balancer.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum LbStatus {
    /// Serving traffic.
    #[default]
    Enabled,
    /// Not serving traffic.
    Disabled,
}

/// Desired state of the `loadbalancer` module.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LbState {
    /// Load balancer, pool and node list exist as given.
    #[default]
    Present,
    /// Load balancer is deleted.
    Absent,
    /// Pool for `port` is deleted.
    PortAbsent,
    /// The given nodes are members of the pool.
    NodesPresent,
    /// The given nodes are not members of the pool.
    NodesAbsent,
}

/// Pool member.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    /// Private address of the member.
    #[serde(alias = "ip_address")]
    pub ip_address: String,
    /// Port traffic is forwarded to.
    #[serde(alias = "private_port")]
    pub private_port: u16,
    /// Member status (`enabled`, `disabled`, `deleted`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

impl Node {
    fn same_member(&self, other: &Self) -> bool {
        self.ip_address == other.ip_address && self.private_port == other.private_port
    }

    fn same_as(&self, other: &Self) -> bool {
        self.same_member(other)
            && (self.status.is_none() || other.status.is_none() || self.status == other.status)
    }
}

/// Listener of a load balancer on one port.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Pool {
    /// Pool identifier.
    pub id: String,
    /// Public port.
    pub port: u16,
    /// Balancing method.
    #[serde(default)]
    pub method: LbMethod,
    /// Session persistence.
    #[serde(default)]
    pub persistence: Persistence,
    /// Members.
    #[serde(default)]
    pub nodes: Vec<Node>,
    /// Hypermedia links.
    #[serde(default)]
    pub links: Vec<Link>,
}

/// Shared load balancer.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadBalancer {
    /// Load balancer identifier.
    pub id: String,
    /// Name, unique per datacenter.
    pub name: String,
    /// Description.
    #[serde(default)]
    pub description: Option<String>,
    /// Public address.
    #[serde(default)]
    pub ip_address: Option<String>,
    /// Status (`enabled`, `disabled`).
    #[serde(default)]
    pub status: Option<String>,
    /// Pools.
    #[serde(default)]
    pub pools: Vec<Pool>,
    /// Hypermedia links.
    #[serde(default)]
    pub links: Vec<Link>,
}

/// Parameters of the `loadbalancer` module.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub struct LoadBalancerParams {
    /// Load balancer name.
    pub name: String,
    /// Description; defaults to the name on creation.
    #[serde(default)]
    pub description: Option<String>,
    /// Datacenter; defaults to the session location.
    #[serde(default)]
    pub location: Option<String>,
    /// Pool port, 80 or 443.
    #[serde(default)]
    pub port: Option<u16>,
    /// Pool balancing method.
    #[serde(default)]
    pub method: Option<LbMethod>,
    /// Pool session persistence.
    #[serde(default)]
    pub persistence: Option<Persistence>,
    /// Pool members.
    #[serde(default)]
    pub nodes: Vec<Node>,
    /// Load balancer status on creation.
    #[serde(default)]
    pub status: LbStatus,
    /// Desired state.
    #[serde(default)]
    pub state: LbState,
}

impl LoadBalancerParams {
    fn validate(&self) -> Result<(), ModuleError> {
        if self.name.trim().is_empty() {
            return Err(ModuleError::validation("name must not be empty"));
        }
        if let Some(port) = self.port {
            if !ALLOWED_PORTS.contains(&port) {
                return Err(ModuleError::Validation(format!(
                    "invalid port {port}: shared load balancers listen on 80 or 443"
                )));
            }
        }
        let needs_port = matches!(
            self.state,
            LbState::PortAbsent | LbState::NodesPresent | LbState::NodesAbsent
        );
        if needs_port && self.port.is_none() {
            return Err(ModuleError::validation(
                "port is required for port_absent, nodes_present and nodes_absent",
            ));
        }
        if matches!(self.state, LbState::NodesPresent | LbState::NodesAbsent)
            && self.nodes.is_empty()
        {
            return Err(ModuleError::validation(
                "nodes must list at least one node for nodes_present and nodes_absent",
            ));
        }
        Ok(())
    }
}

struct LbApi<'a, T> {
    ctx: &'a ModuleContext<T>,
    base: String,
}

impl<'a, T: Transport> LbApi<'a, T> {
    fn new(ctx: &'a ModuleContext<T>, location: &str) -> Self {
        Self {
            ctx,
            base: format!("sharedLoadBalancers/{}/{location}", ctx.alias()),
        }
    }

    async fn find(&self, name: &str) -> Result<Option<LoadBalancer>, ModuleError> {
        let body = self
            .ctx
            .client()
            .get(&self.base)
            .await
            .with_context(|| String::from("failed to list load balancers"))?;
        let balancers: Vec<LoadBalancer> = decode_items(body)?;
        Ok(balancers.into_iter().find(|lb| lb.name == name))
    }

    async fn create(&self, params: &LoadBalancerParams) -> Result<LoadBalancer, ModuleError> {
        info!(name = %params.name, "creating load balancer");
        let body = self
            .ctx
            .client()
            .post(
                &self.base,
                json!({
                    "name": params.name,
                    "description": params.description.as_deref().unwrap_or(&params.name),
                    "status": params.status,
                }),
            )
            .await
            .with_context(|| format!("failed to create load balancer {}", params.name))?;
        Ok(serde_json::from_value(body)?)
    }

    async fn delete(&self, lb: &LoadBalancer) -> Result<(), ModuleError> {
        info!(name = %lb.name, id = %lb.id, "deleting load balancer");
        self.ctx
            .client()
            .delete(&format!("{}/{}", self.base, lb.id))
            .await
            .with_context(|| format!("failed to delete load balancer {}", lb.name))?;
        Ok(())
    }

    fn pools_path(&self, lb_id: &str) -> String {
        format!("{}/{lb_id}/pools", self.base)
    }

    async fn pools(&self, lb_id: &str) -> Result<Vec<Pool>, ModuleError> {
        let body = self
            .ctx
            .client()
            .get(&self.pools_path(lb_id))
            .await
            .with_context(|| format!("failed to list pools of load balancer {lb_id}"))?;
        Ok(decode_items(body)?)
    }

    async fn create_pool(
        &self,
        lb_id: &str,
        port: u16,
        method: LbMethod,
        persistence: Persistence,
    ) -> Result<Pool, ModuleError> {
        info!(lb = lb_id, port, "creating load balancer pool");
        let body = self
            .ctx
            .client()
            .post(
                &self.pools_path(lb_id),
                json!({ "port": port, "method": method, "persistence": persistence }),
            )
            .await
            .with_context(|| format!("failed to create pool on port {port}"))?;
        Ok(serde_json::from_value(body)?)
    }

    async fn update_pool(
        &self,
        lb_id: &str,
        pool_id: &str,
        method: LbMethod,
        persistence: Persistence,
    ) -> Result<(), ModuleError> {
        info!(lb = lb_id, pool = pool_id, "updating load balancer pool");
        self.ctx
            .client()
            .put(
                &format!("{}/{pool_id}", self.pools_path(lb_id)),
                json!({ "method": method, "persistence": persistence }),
            )
            .await
            .with_context(|| format!("failed to update pool {pool_id}"))?;
        Ok(())
    }

    async fn delete_pool(&self, lb_id: &str, pool_id: &str) -> Result<(), ModuleError> {
        info!(lb = lb_id, pool = pool_id, "deleting load balancer pool");
        self.ctx
            .client()
            .delete(&format!("{}/{pool_id}", self.pools_path(lb_id)))
            .await
            .with_context(|| format!("failed to delete pool {pool_id}"))?;
        Ok(())
    }

    async fn set_nodes(&self, lb_id: &str, pool_id: &str, nodes: &[Node]) -> Result<(), ModuleError> {
        info!(lb = lb_id, pool = pool_id, nodes = nodes.len(), "replacing pool nodes");
        self.ctx
            .client()
            .put(
                &format!("{}/{pool_id}/nodes", self.pools_path(lb_id)),
                serde_json::to_value(nodes)?,
            )
            .await
            .with_context(|| format!("failed to set nodes of pool {pool_id}"))?;
        Ok(())
    }
}

/// Applies the requested load balancer state.
///
/// # Errors
///
/// Returns [`ModuleError`] for invalid parameters or failed API calls.
pub async fn run<T: Transport>(
    ctx: &ModuleContext<T>,
    params: &LoadBalancerParams,
) -> Result<ModuleOutcome, ModuleError> {
    params.validate()?;
    let location = ctx.location(params.location.as_deref())?;
    let api = LbApi::new(ctx, &location);
    let existing = api.find(&params.name).await?;

    match params.state {
        LbState::Present => ensure_present(&api, params, existing).await,
        LbState::Absent => {
            let Some(lb) = existing else {
                return ModuleOutcome::new(false).with("loadbalancer", Value::Null);
            };
            if !ctx.check_mode() {
                api.delete(&lb).await?;
            }
            ModuleOutcome::new(true).with("loadbalancer", &lb)
        }
        LbState::PortAbsent => ensure_port_absent(&api, params, existing).await,
        LbState::NodesPresent | LbState::NodesAbsent => {
            ensure_nodes(&api, params, existing).await
        }
    }
}

async fn ensure_present<T: Transport>(
    api: &LbApi<'_, T>,
    params: &LoadBalancerParams,
    existing: Option<LoadBalancer>,
) -> Result<ModuleOutcome, ModuleError> {
    let (mut lb, mut changed) = match existing {
        Some(lb) => (lb, false),
        None if api.ctx.check_mode() => {
            return ModuleOutcome::new(true).with("loadbalancer", Value::Null);
        }
        None => (api.create(params).await?, true),
    };

    if let Some(port) = params.port {
        let pools = api.pools(&lb.id).await?;
        let pool = match pools.into_iter().find(|candidate| candidate.port == port) {
            Some(mut pool) => {
                let method = params.method.unwrap_or(pool.method);
                let persistence = params.persistence.unwrap_or(pool.persistence);
                if method != pool.method || persistence != pool.persistence {
                    changed = true;
                    if !api.ctx.check_mode() {
                        api.update_pool(&lb.id, &pool.id, method, persistence).await?;
                    }
                    pool.method = method;
                    pool.persistence = persistence;
                }
                pool
            }
            None if api.ctx.check_mode() => {
                return ModuleOutcome::new(true).with("loadbalancer", &lb);
            }
            None => {
                changed = true;
                api.create_pool(
                    &lb.id,
                    port,
                    params.method.unwrap_or_default(),
                    params.persistence.unwrap_or_default(),
                )
                .await?
            }
        };

        let synced = if params.nodes.is_empty() || same_nodes(&pool.nodes, &params.nodes) {
            pool
        } else {
            changed = true;
            if !api.ctx.check_mode() {
                api.set_nodes(&lb.id, &pool.id, &params.nodes).await?;
            }
            Pool {
                nodes: params.nodes.clone(),
                ..pool
            }
        };
        lb.pools.retain(|existing_pool| existing_pool.port != port);
        lb.pools.push(synced);
    }

    ModuleOutcome::new(changed).with("loadbalancer", &lb)
}

/// Node lists are equal when each side holds the other's members, with the
/// same multiplicity.
fn same_nodes(current: &[Node], desired: &[Node]) -> bool {
    let covers = |left: &[Node], right: &[Node]| {
        right.iter().all(|node| {
            let wanted = right.iter().filter(|other| other.same_as(node)).count();
            left.iter().filter(|other| other.same_as(node)).count() == wanted
        })
    };
    current.len() == desired.len() && covers(current, desired) && covers(desired, current)
}

async fn existing_pool<T: Transport>(
    api: &LbApi<'_, T>,
    lb: &LoadBalancer,
    port: u16,
) -> Result<Option<Pool>, ModuleError> {
    Ok(api
        .pools(&lb.id)
        .await?
        .into_iter()
        .find(|pool| pool.port == port))
}

async fn ensure_port_absent<T: Transport>(
    api: &LbApi<'_, T>,
    params: &LoadBalancerParams,
    existing: Option<LoadBalancer>,
) -> Result<ModuleOutcome, ModuleError> {
    let (Some(lb), Some(port)) = (existing, params.port) else {
        return ModuleOutcome::new(false).with("loadbalancer", Value::Null);
    };
    let Some(pool) = existing_pool(api, &lb, port).await? else {
        return ModuleOutcome::new(false).with("loadbalancer", &lb);
    };
    if !api.ctx.check_mode() {
        api.delete_pool(&lb.id, &pool.id).await?;
    }
    let remaining = LoadBalancer {
        pools: lb.pools.iter().filter(|p| p.id != pool.id).cloned().collect(),
        ..lb.clone()
    };
    ModuleOutcome::new(true).with("loadbalancer", &remaining)
}

async fn ensure_nodes<T: Transport>(
    api: &LbApi<'_, T>,
    params: &LoadBalancerParams,
    existing: Option<LoadBalancer>,
) -> Result<ModuleOutcome, ModuleError> {
    let lb = existing.ok_or_else(|| {
        ModuleError::NotFound(format!("load balancer {} does not exist", params.name))
    })?;
    let port = params
        .port
        .ok_or_else(|| ModuleError::validation("port is required to manage nodes"))?;
    let pool = existing_pool(api, &lb, port).await?.ok_or_else(|| {
        ModuleError::NotFound(format!(
            "load balancer {} has no pool on port {port}",
            params.name
        ))
    })?;

    let nodes: Vec<Node> = if params.state == LbState::NodesPresent {
        let mut merged = pool.nodes.clone();
        for node in &params.nodes {
            if !merged.iter().any(|current| current.same_member(node)) {
                merged.push(node.clone());
            }
        }
        merged
    } else {
        pool.nodes
            .iter()
            .filter(|current| !params.nodes.iter().any(|node| node.same_member(current)))
            .cloned()
            .collect()
    };

    if nodes.len() == pool.nodes.len() {
        return ModuleOutcome::new(false)
            .with("loadbalancer", &lb)?
            .with("nodes", &pool.nodes);
    }
    if !api.ctx.check_mode() {
        api.set_nodes(&lb.id, &pool.id, &nodes).await?;
    }
    ModuleOutcome::new(true)
        .with("loadbalancer", &lb)?
        .with("nodes", &nodes)
}
