//! Anti-affinity policies, which keep a location's servers on separate hosts.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::info;

use crate::api::Transport;
use crate::api::types::{Link, decode_items};

use super::{ApiContext, ModuleContext, ModuleError, ModuleOutcome, Presence};

/// Anti-affinity policy as returned by the API.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct AntiAffinityPolicy {
    /// Policy identifier.
    pub id: String,
    /// Name, unique per account.
    pub name: String,
    /// Datacenter the policy applies to.
    #[serde(default)]
    pub location: Option<String>,
    /// Hypermedia links.
    #[serde(default)]
    pub links: Vec<Link>,
}

/// Parameters of the `aa_policy` module.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
pub struct AaPolicyParams {
    /// Policy name.
    pub name: String,
    /// Datacenter; defaults to the session location.
    #[serde(default)]
    pub location: Option<String>,
    /// Desired state.
    #[serde(default)]
    pub state: Presence,
}

/// Lists the account's anti-affinity policies.
pub(crate) async fn list_policies<T: Transport>(
    ctx: &ModuleContext<T>,
) -> Result<Vec<AntiAffinityPolicy>, ModuleError> {
    let body = ctx
        .client()
        .get(&format!("antiAffinityPolicies/{}", ctx.alias()))
        .await
        .with_context(|| String::from("failed to list anti-affinity policies"))?;
    Ok(decode_items(body)?)
}

/// Finds a policy by id or name, failing when the name is ambiguous.
pub(crate) fn find_policy<'a>(
    policies: &'a [AntiAffinityPolicy],
    id_or_name: &str,
) -> Result<Option<&'a AntiAffinityPolicy>, ModuleError> {
    if let Some(policy) = policies.iter().find(|policy| policy.id == id_or_name) {
        return Ok(Some(policy));
    }
    let mut named = policies.iter().filter(|policy| policy.name == id_or_name);
    let first = named.next();
    if named.next().is_some() {
        return Err(ModuleError::Validation(format!(
            "multiple anti-affinity policies are named {id_or_name}"
        )));
    }
    Ok(first)
}

/// Ensures the named policy exists in the location, or is gone.
///
/// # Errors
///
/// Returns [`ModuleError`] when no location is known or an API call fails.
pub async fn run<T: Transport>(
    ctx: &ModuleContext<T>,
    params: &AaPolicyParams,
) -> Result<ModuleOutcome, ModuleError> {
    if params.name.trim().is_empty() {
        return Err(ModuleError::validation("name must not be empty"));
    }
    let location = ctx.location(params.location.as_deref())?;
    let policies = list_policies(ctx).await?;
    let existing = policies.iter().find(|policy| {
        policy.name == params.name
            && policy
                .location
                .as_deref()
                .is_none_or(|policy_location| policy_location.eq_ignore_ascii_case(&location))
    });

    match (params.state, existing) {
        (Presence::Present, Some(policy)) => ModuleOutcome::new(false).with("policy", policy),
        (Presence::Present, None) => {
            if ctx.check_mode() {
                return ModuleOutcome::new(true).with("policy", Value::Null);
            }
            info!(name = %params.name, %location, "creating anti-affinity policy");
            let created = ctx
                .client()
                .post(
                    &format!("antiAffinityPolicies/{}", ctx.alias()),
                    json!({ "name": params.name, "location": location }),
                )
                .await
                .with_context(|| format!("failed to create anti-affinity policy {}", params.name))?;
            ModuleOutcome::new(true).with("policy", created)
        }
        (Presence::Absent, Some(policy)) => {
            if !ctx.check_mode() {
                info!(policy = %policy.id, "deleting anti-affinity policy");
                ctx.client()
                    .delete(&format!("antiAffinityPolicies/{}/{}", ctx.alias(), policy.id))
                    .await
                    .with_context(|| format!("failed to delete anti-affinity policy {}", policy.name))?;
            }
            ModuleOutcome::new(true).with("policy", policy)
        }
        (Presence::Absent, None) => ModuleOutcome::new(false).with("policy", Value::Null),
    }
}
