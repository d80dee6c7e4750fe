//! Email alert policies on CPU, memory or disk usage.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::info;

use crate::api::Transport;
use crate::api::types::{Link, decode_items};

use super::{ApiContext, ModuleContext, ModuleError, ModuleOutcome, Presence};

/// Metric an alert trigger watches.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    /// CPU usage.
    Cpu,
    /// Memory usage.
    Memory,
    /// Disk usage.
    Disk,
}

/// Threshold crossing that raises an alert.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Trigger {
    /// Watched metric.
    pub metric: Metric,
    /// How long the threshold must be exceeded, `HH:MM:SS`.
    pub duration: String,
    /// Percentage threshold.
    pub threshold: f64,
}

/// Action settings of an email alert.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct ActionSettings {
    /// Email recipients.
    #[serde(default)]
    pub recipients: Vec<String>,
}

/// Action taken when a trigger fires.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Action {
    /// Action type; only `email` exists.
    pub action: String,
    /// Action settings.
    #[serde(default)]
    pub settings: ActionSettings,
}

/// Alert policy as returned by the API.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct AlertPolicy {
    /// Policy identifier.
    pub id: String,
    /// Name, unique per account.
    pub name: String,
    /// Actions.
    #[serde(default)]
    pub actions: Vec<Action>,
    /// Triggers.
    #[serde(default)]
    pub triggers: Vec<Trigger>,
    /// Hypermedia links.
    #[serde(default)]
    pub links: Vec<Link>,
}

/// Parameters of the `alert_policy` module.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct AlertPolicyParams {
    /// Policy name.
    #[serde(default)]
    pub name: Option<String>,
    /// Policy identifier; takes precedence over `name`.
    #[serde(default)]
    pub id: Option<String>,
    /// Account alias; defaults to the session's.
    #[serde(default)]
    pub alias: Option<String>,
    /// Email recipients.
    #[serde(default)]
    pub alert_recipients: Vec<String>,
    /// Watched metric.
    #[serde(default)]
    pub metric: Option<Metric>,
    /// Duration, `HH:MM:SS`.
    #[serde(default)]
    pub duration: Option<String>,
    /// Percentage threshold, 5 to 95.
    #[serde(default)]
    pub threshold: Option<f64>,
    /// Desired state.
    #[serde(default)]
    pub state: Presence,
}

/// Checks a trigger duration has the `HH:MM:SS` shape.
#[must_use]
pub fn is_valid_duration(duration: &str) -> bool {
    let parts: Vec<&str> = duration.split(':').collect();
    let [hours, minutes, seconds] = parts.as_slice() else {
        return false;
    };
    let field = |raw: &str, max: u32| {
        raw.len() == 2 && raw.parse::<u32>().is_ok_and(|value| value <= max)
    };
    field(hours, 99) && field(minutes, 59) && field(seconds, 59)
}

impl AlertPolicyParams {
    fn desired_trigger(&self) -> Result<Trigger, ModuleError> {
        let (Some(metric), Some(duration), Some(threshold)) =
            (self.metric, self.duration.as_ref(), self.threshold)
        else {
            return Err(ModuleError::validation(
                "metric, duration and threshold are required when state is present",
            ));
        };
        if !(5.0..=95.0).contains(&threshold) {
            return Err(ModuleError::Validation(format!(
                "threshold {threshold} is out of range: it must be between 5 and 95"
            )));
        }
        if !is_valid_duration(duration) {
            return Err(ModuleError::Validation(format!(
                "duration '{duration}' must use the HH:MM:SS format"
            )));
        }
        Ok(Trigger {
            metric,
            duration: duration.clone(),
            threshold,
        })
    }

    fn policy_body(&self, name: &str, trigger: &Trigger) -> Value {
        json!({
            "name": name,
            "actions": [{
                "action": "email",
                "settings": { "recipients": self.alert_recipients },
            }],
            "triggers": [trigger],
        })
    }
}

/// Lists the alert policies of `alias`.
pub(crate) async fn list_policies<T: Transport>(
    ctx: &ModuleContext<T>,
    alias: &str,
) -> Result<Vec<AlertPolicy>, ModuleError> {
    let body = ctx
        .client()
        .get(&format!("alertPolicies/{alias}"))
        .await
        .with_context(|| String::from("failed to list alert policies"))?;
    Ok(decode_items(body)?)
}

/// Finds a policy by id or name, failing when the name is ambiguous.
pub(crate) fn find_policy<'a>(
    policies: &'a [AlertPolicy],
    id_or_name: &str,
) -> Result<Option<&'a AlertPolicy>, ModuleError> {
    if let Some(policy) = policies.iter().find(|policy| policy.id == id_or_name) {
        return Ok(Some(policy));
    }
    let mut named = policies.iter().filter(|policy| policy.name == id_or_name);
    let first = named.next();
    if named.next().is_some() {
        return Err(ModuleError::Validation(format!(
            "multiple alert policies are named {id_or_name}"
        )));
    }
    Ok(first)
}

/// Ensures the alert policy exists with the requested trigger and
/// recipients, or is gone.
///
/// # Errors
///
/// Returns [`ModuleError`] for invalid triggers, ambiguous names or API
/// failures.
pub async fn run<T: Transport>(
    ctx: &ModuleContext<T>,
    params: &AlertPolicyParams,
) -> Result<ModuleOutcome, ModuleError> {
    let key = params
        .id
        .as_deref()
        .or(params.name.as_deref())
        .filter(|key| !key.trim().is_empty())
        .ok_or_else(|| ModuleError::validation("either id or name is required"))?;
    let alias = params
        .alias
        .as_deref()
        .unwrap_or_else(|| ctx.alias())
        .to_owned();
    let policies = list_policies(ctx, &alias).await?;
    let existing = find_policy(&policies, key)?;

    match params.state {
        Presence::Present => ensure_present(ctx, params, &alias, existing).await,
        Presence::Absent => {
            let Some(policy) = existing else {
                return ModuleOutcome::new(false).with("policy", Value::Null);
            };
            if !ctx.check_mode() {
                info!(policy = %policy.id, "deleting alert policy");
                ctx.client()
                    .delete(&format!("alertPolicies/{alias}/{}", policy.id))
                    .await
                    .with_context(|| format!("failed to delete alert policy {}", policy.name))?;
            }
            ModuleOutcome::new(true).with("policy", policy)
        }
    }
}

async fn ensure_present<T: Transport>(
    ctx: &ModuleContext<T>,
    params: &AlertPolicyParams,
    alias: &str,
    existing: Option<&AlertPolicy>,
) -> Result<ModuleOutcome, ModuleError> {
    let trigger = params.desired_trigger()?;
    if params.alert_recipients.is_empty() {
        return Err(ModuleError::validation(
            "alert_recipients must list at least one address",
        ));
    }

    let Some(policy) = existing else {
        let name = params.name.as_deref().ok_or_else(|| {
            ModuleError::validation("name is required to create an alert policy")
        })?;
        if ctx.check_mode() {
            return ModuleOutcome::new(true).with("policy", Value::Null);
        }
        info!(name, "creating alert policy");
        let created = ctx
            .client()
            .post(
                &format!("alertPolicies/{alias}"),
                params.policy_body(name, &trigger),
            )
            .await
            .with_context(|| format!("failed to create alert policy {name}"))?;
        return ModuleOutcome::new(true).with("policy", created);
    };

    let name = params.name.as_deref().unwrap_or(&policy.name);
    let recipients_match = policy.actions.iter().all(|action| {
        let mut current = action.settings.recipients.clone();
        let mut desired = params.alert_recipients.clone();
        current.sort();
        desired.sort();
        current == desired
    }) && !policy.actions.is_empty();
    let unchanged = policy.name == name
        && recipients_match
        && policy.triggers.len() == 1
        && policy.triggers.first() == Some(&trigger);
    if unchanged {
        return ModuleOutcome::new(false).with("policy", policy);
    }
    if ctx.check_mode() {
        return ModuleOutcome::new(true).with("policy", policy);
    }
    info!(policy = %policy.id, "updating alert policy");
    let updated = ctx
        .client()
        .put(
            &format!("alertPolicies/{alias}/{}", policy.id),
            params.policy_body(name, &trigger),
        )
        .await
        .with_context(|| format!("failed to update alert policy {}", policy.name))?;
    ModuleOutcome::new(true).with("policy", updated)
}
