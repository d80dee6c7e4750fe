//! `present` for servers: plain creation and `exact_count` reconciliation.

use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::{info, warn};

use crate::api::Transport;
use crate::api::types::{Link, Server, find_link};
use crate::group_tree::{GroupLookupError, GroupNode, GroupTree};
use crate::modules::lookup::fetch_server;
use crate::modules::modify_server::{apply_alert_policy, resolve_aa_policy, resolve_alert_policy};
use crate::modules::publicip::{Protocol, add_public_ip, validate_ports};
use crate::modules::{ApiContext, ModuleContext, ModuleError, ModuleOutcome, Presence};

use super::{ServerParams, ServerType, remove_servers};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeploymentCapabilities {
    #[serde(default)]
    templates: Vec<Template>,
    #[serde(default)]
    deployable_networks: Vec<DeployableNetwork>,
}

#[derive(Debug, Deserialize)]
struct Template {
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeployableNetwork {
    network_id: String,
    #[serde(default)]
    name: String,
}

fn find_group_node<'a>(tree: &'a GroupTree, key: &str) -> Result<&'a GroupNode, GroupLookupError> {
    tree.by_id(key)
        .map_or_else(|| tree.require_group(key, None), Ok)
}

pub(super) async fn ensure_present<T: Transport>(
    ctx: &ModuleContext<T>,
    params: &ServerParams,
) -> Result<ModuleOutcome, ModuleError> {
    let location = ctx.location(params.location.as_deref())?;
    let tree = GroupTree::fetch(ctx.client(), &location).await?;

    let (Some(exact_count), Some(count_group)) = (params.exact_count, &params.count_group) else {
        let group = find_group_node(&tree, &params.group)?;
        return create_servers(ctx, params, &location, group, params.count).await;
    };

    let group = find_group_node(&tree, count_group)?;
    let mut running = Vec::new();
    for server_id in group.server_ids() {
        match fetch_server(ctx, server_id).await? {
            Some(server) if server.status != "deleted" => running.push(server),
            _ => {}
        }
    }
    let current = u32::try_from(running.len()).unwrap_or(u32::MAX);
    info!(group = %group.name, current, wanted = exact_count, "reconciling server count");

    if current < exact_count {
        return create_servers(ctx, params, &location, group, exact_count - current).await;
    }
    if current == exact_count {
        let ids: Vec<&str> = running.iter().map(|server| server.id.as_str()).collect();
        return ModuleOutcome::new(false)
            .with("server_ids", &ids)?
            .with("servers", &running);
    }

    running.sort_by(|left, right| left.id.cmp(&right.id));
    let keep = usize::try_from(exact_count).unwrap_or(usize::MAX);
    let excess = running.split_off(keep);
    let responses = remove_servers(ctx, &excess).await?;
    ctx.settle(&responses, params.wait).await?;
    let ids: Vec<&str> = excess.iter().map(|server| server.id.as_str()).collect();
    ModuleOutcome::new(true)
        .with("server_ids", &ids)?
        .with("servers", &excess)
}

async fn create_servers<T: Transport>(
    ctx: &ModuleContext<T>,
    params: &ServerParams,
    location: &str,
    group: &GroupNode,
    count: u32,
) -> Result<ModuleOutcome, ModuleError> {
    let default_protocol = Protocol::parse_or(params.public_ip_protocol.as_deref(), Protocol::Tcp)?;
    let ports = validate_ports(&params.public_ip_ports, default_protocol)?;
    let capabilities: DeploymentCapabilities = ctx
        .client()
        .get_as(&format!(
            "datacenters/{}/{location}/deploymentCapabilities",
            ctx.alias()
        ))
        .await
        .with_context(|| format!("failed to read deployment capabilities of {location}"))?;
    let template = find_template(&capabilities, params.template.as_deref().unwrap_or_default())?;
    let network_id = find_network(&capabilities, params.network_id.as_deref(), location)?;
    let alert_policy_id = resolve_alert_policy(
        ctx,
        params
            .alert_policy_id
            .as_deref()
            .or(params.alert_policy_name.as_deref()),
    )
    .await?;
    let aa_policy_id = match params.server_type {
        ServerType::Hyperscale => {
            resolve_aa_policy(
                ctx,
                params
                    .anti_affinity_policy_id
                    .as_deref()
                    .or(params.anti_affinity_policy_name.as_deref()),
            )
            .await?
        }
        _ => None,
    };

    if ctx.check_mode() {
        return ModuleOutcome::new(true)
            .with("server_ids", Vec::<String>::new())?
            .with("servers", Vec::<Value>::new());
    }

    let body = creation_body(params, group, template, network_id, aa_policy_id.as_deref());
    let mut responses = Vec::new();
    for index in 0..count {
        info!(name = ?params.name, group = %group.name, index, "creating server");
        responses.push(
            ctx.client()
                .post(&format!("servers/{}", ctx.alias()), body.clone())
                .await
                .with_context(|| String::from("failed to create server"))?,
        );
    }
    ctx.settle(&responses, params.wait).await?;

    let mut servers = Vec::with_capacity(responses.len());
    for response in &responses {
        servers.push(created_server(ctx, response).await?);
    }

    let mut follow_ups = Vec::new();
    for server in &servers {
        if params.add_public_ip {
            follow_ups.push(add_public_ip(ctx, &server.id, &ports, &[]).await?);
        }
        if let Some(policy_id) = &alert_policy_id {
            apply_alert_policy(ctx, Presence::Present, server, policy_id).await?;
        }
    }
    ctx.settle(&follow_ups, params.wait).await?;

    let ids: Vec<&str> = servers.iter().map(|server| server.id.as_str()).collect();
    ModuleOutcome::new(true)
        .with("server_ids", &ids)?
        .with("servers", &servers)
}

fn find_template<'a>(
    capabilities: &'a DeploymentCapabilities,
    lookup: &str,
) -> Result<&'a str, ModuleError> {
    let wanted = lookup.trim().to_uppercase();
    capabilities
        .templates
        .iter()
        .find(|template| template.name.to_uppercase().contains(&wanted))
        .map(|template| template.name.as_str())
        .ok_or_else(|| ModuleError::NotFound(format!("template {lookup} does not exist")))
}

fn find_network<'a>(
    capabilities: &'a DeploymentCapabilities,
    requested: Option<&str>,
    location: &str,
) -> Result<Option<&'a str>, ModuleError> {
    let networks = &capabilities.deployable_networks;
    match requested {
        Some(key) => networks
            .iter()
            .find(|network| network.network_id == key || network.name == key)
            .map(|network| Some(network.network_id.as_str()))
            .ok_or_else(|| {
                ModuleError::NotFound(format!("network {key} does not exist in {location}"))
            }),
        None => {
            if networks.is_empty() {
                warn!(location, "no deployable network; the API default applies");
            }
            Ok(networks.first().map(|network| network.network_id.as_str()))
        }
    }
}

fn creation_body(
    params: &ServerParams,
    group: &GroupNode,
    template: &str,
    network_id: Option<&str>,
    aa_policy_id: Option<&str>,
) -> Value {
    let mut body = Map::new();
    let mut put = |key: &str, value: Value| {
        if !value.is_null() {
            body.insert(key.to_owned(), value);
        }
    };
    put("name", json!(params.name));
    put("description", json!(params.description));
    put("groupId", json!(group.id));
    put("sourceServerId", json!(template));
    put("isManagedOS", json!(params.managed_os));
    put("primaryDns", json!(params.primary_dns));
    put("secondaryDns", json!(params.secondary_dns));
    put("networkId", json!(network_id));
    put("ipAddress", json!(params.ip_address));
    put("password", json!(params.password));
    put("cpu", json!(params.cpu));
    put("memoryGB", json!(params.memory));
    put("type", json!(params.server_type));
    put("storageType", json!(params.effective_storage_type()));
    put("additionalDisks", json!(params.additional_disks));
    put("customFields", json!(params.custom_fields));
    put("antiAffinityPolicyId", json!(aa_policy_id));
    Value::Object(body)
}

async fn created_server<T: Transport>(
    ctx: &ModuleContext<T>,
    response: &Value,
) -> Result<Server, ModuleError> {
    let links: Vec<Link> = response
        .get("links")
        .cloned()
        .map(serde_json::from_value)
        .transpose()?
        .unwrap_or_default();
    let href = find_link(&links, "self")
        .map(|link| link.href.clone())
        .ok_or_else(|| {
            ModuleError::Serialization(String::from("server creation response had no self link"))
        })?;
    let body = ctx
        .client()
        .get(&href)
        .await
        .with_context(|| format!("failed to read created server {href}"))?;
    Ok(serde_json::from_value(body)?)
}
