//! Serde representations of the CLC resources shared by several modules.
//!
//! Only the fields the modules read are modelled; everything else in the API
//! documents is ignored during deserialisation.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Hypermedia link attached to most CLC resources.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct Link {
    /// Relation name (`self`, `status`, `group`, `server`, ...).
    #[serde(default)]
    pub rel: String,
    /// Link target, usually an absolute path such as `/v2/servers/ACME/WA1ACMEWEB01`.
    #[serde(default)]
    pub href: String,
    /// Identifier of the linked resource when the API provides one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl Link {
    /// Returns the last path segment of `href`, ignoring any query string.
    #[must_use]
    pub fn trailing_segment(&self) -> Option<&str> {
        let path = self.href.split('?').next().unwrap_or_default();
        path.trim_end_matches('/')
            .rsplit('/')
            .next()
            .filter(|segment| !segment.is_empty())
    }

    /// Returns the explicit id or, failing that, the trailing href segment.
    #[must_use]
    pub fn resource_id(&self) -> Option<&str> {
        self.id.as_deref().or_else(|| self.trailing_segment())
    }
}

/// Returns the first link with relation `rel`.
#[must_use]
pub fn find_link<'a>(links: &'a [Link], rel: &str) -> Option<&'a Link> {
    links.iter().find(|link| link.rel == rel)
}

/// Collection wrapper used by list endpoints (`{"items": [...]}`).
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub struct Items<T> {
    /// Returned resources.
    #[serde(default)]
    pub items: Vec<T>,
}

/// Decodes a list endpoint body that is either a bare array or an `items`
/// wrapper.
///
/// # Errors
///
/// Returns the serde error when the body matches neither shape.
pub fn decode_items<T>(body: Value) -> Result<Vec<T>, serde_json::Error>
where
    T: for<'de> Deserialize<'de>,
{
    match body {
        Value::Array(_) => serde_json::from_value(body),
        Value::Null => Ok(Vec::new()),
        other => serde_json::from_value::<Items<T>>(other).map(|wrapper| wrapper.items),
    }
}

/// A CLC server as returned by `GET servers/{alias}/{id}`.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Server {
    /// Server name, which is also its identifier.
    pub id: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Free-form description.
    #[serde(default)]
    pub description: Option<String>,
    /// Identifier of the owning group.
    #[serde(default)]
    pub group_id: String,
    /// Provisioning status (`active`, `underConstruction`, ...).
    #[serde(default)]
    pub status: String,
    /// Datacenter alias.
    #[serde(default)]
    pub location_id: Option<String>,
    /// Hardware and runtime details.
    #[serde(default)]
    pub details: ServerDetails,
    /// Hypermedia links.
    #[serde(default)]
    pub links: Vec<Link>,
}

impl Server {
    /// Returns the public IP addresses attached to the server.
    pub fn public_ips(&self) -> impl Iterator<Item = &str> {
        self.details
            .ip_addresses
            .iter()
            .filter_map(|address| address.public.as_deref())
    }

    /// Returns the server's snapshot, if it has one.
    #[must_use]
    pub fn snapshot(&self) -> Option<&SnapshotRef> {
        self.details.snapshots.first()
    }

    /// Returns the memory size in whole gigabytes.
    #[must_use]
    pub const fn memory_gb(&self) -> u64 {
        self.details.memory_mb.div_euclid(1024)
    }
}

/// Runtime details nested in a [`Server`].
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerDetails {
    /// Power state (`started`, `stopped`, `paused`).
    #[serde(default)]
    pub power_state: String,
    /// Virtual CPU count.
    #[serde(default)]
    pub cpu: u32,
    /// Memory in megabytes.
    #[serde(default, rename = "memoryMB")]
    pub memory_mb: u64,
    /// Total storage in gigabytes.
    #[serde(default, rename = "storageGB")]
    pub storage_gb: u64,
    /// Whether the server is in maintenance mode.
    #[serde(default)]
    pub in_maintenance_mode: bool,
    /// Internal and public addresses.
    #[serde(default)]
    pub ip_addresses: Vec<IpAddressPair>,
    /// Alert policies attached to the server.
    #[serde(default)]
    pub alert_policies: Vec<PolicyRef>,
    /// Attached disks.
    #[serde(default)]
    pub disks: Vec<Disk>,
    /// Snapshots of the server; CLC keeps at most one.
    #[serde(default)]
    pub snapshots: Vec<SnapshotRef>,
    /// Custom field values.
    #[serde(default)]
    pub custom_fields: Vec<Value>,
}

/// One entry of [`ServerDetails::ip_addresses`].
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct IpAddressPair {
    /// Private address.
    #[serde(default)]
    pub internal: Option<String>,
    /// Public NAT address mapped to `internal`.
    #[serde(default)]
    pub public: Option<String>,
}

/// Reference to a policy attached to a server.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct PolicyRef {
    /// Policy identifier.
    pub id: String,
    /// Policy name.
    #[serde(default)]
    pub name: Option<String>,
}

/// Disk attached to a server.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Disk {
    /// Disk identifier (`0:0`, `0:1`, ...).
    #[serde(default)]
    pub id: String,
    /// Size in gigabytes.
    #[serde(default, rename = "sizeGB")]
    pub size_gb: u64,
    /// Mount points on the disk.
    #[serde(default)]
    pub partition_paths: Vec<String>,
}

/// Snapshot entry in [`ServerDetails::snapshots`].
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct SnapshotRef {
    /// Snapshot name, usually a timestamp.
    #[serde(default)]
    pub name: String,
    /// Hypermedia links; the `self` link carries the numeric id.
    #[serde(default)]
    pub links: Vec<Link>,
}

impl SnapshotRef {
    /// Returns the numeric snapshot id taken from the `self` link.
    #[must_use]
    pub fn id(&self) -> Option<&str> {
        find_link(&self.links, "self").and_then(|link| snapshot_id_from_href(&link.href))
    }
}

/// Extracts the numeric suffix of a snapshot link such as
/// `/v2/servers/ACME/WA1ACMEWEB01/snapshots/10`.
#[must_use]
pub fn snapshot_id_from_href(href: &str) -> Option<&str> {
    let path = href.split('?').next().unwrap_or_default();
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|segment| !segment.is_empty() && segment.bytes().all(|byte| byte.is_ascii_digit()))
}
