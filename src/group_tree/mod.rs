//! In-memory tree of CLC server groups.
//!
//! The API returns a datacenter's groups as one nested JSON document. The
//! tree flattens it into an arena where every node keeps the index of its
//! parent, so lookups can match on both a group's name and its parent's name.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::api::types::{Link, find_link};
use crate::api::{ClcApiError, ClcClient, Transport};

/// Name of the group every datacenter starts with.
pub const DEFAULT_GROUP: &str = "Default Group";

/// A group as returned by `GET groups/{alias}/{id}`.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    /// Group identifier.
    pub id: String,
    /// Group name.
    pub name: String,
    /// Description.
    #[serde(default)]
    pub description: Option<String>,
    /// Group type (`default`, `archive`, ...).
    #[serde(default, rename = "type")]
    pub group_type: Option<String>,
    /// Provisioning status.
    #[serde(default)]
    pub status: Option<String>,
    /// Datacenter alias.
    #[serde(default)]
    pub location_id: Option<String>,
    /// Child groups.
    #[serde(default)]
    pub groups: Vec<Self>,
    /// Hypermedia links, including one `server` link per member server.
    #[serde(default)]
    pub links: Vec<Link>,
}

/// A node of a [`GroupTree`].
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct GroupNode {
    /// Group identifier.
    pub id: String,
    /// Group name.
    pub name: String,
    /// Description.
    pub description: Option<String>,
    /// Group type.
    #[serde(rename = "type")]
    pub group_type: Option<String>,
    /// Hypermedia links of the group.
    pub links: Vec<Link>,
    #[serde(skip)]
    parent: Option<usize>,
    #[serde(skip)]
    children: Vec<usize>,
}

impl GroupNode {
    /// Returns the ids of servers directly in this group.
    pub fn server_ids(&self) -> impl Iterator<Item = &str> {
        self.links
            .iter()
            .filter(|link| link.rel == "server")
            .filter_map(Link::resource_id)
    }
}

/// Errors raised by group lookups.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum GroupLookupError {
    /// More than one group matches.
    #[error("found {count} groups named '{name}'; specify a unique parent group")]
    Ambiguous {
        /// Requested group name.
        name: String,
        /// Number of matches.
        count: usize,
    },
    /// No group matches.
    #[error("group '{name}' does not exist")]
    NotFound {
        /// Requested group name.
        name: String,
    },
    /// The datacenter document carries no root group link.
    #[error("datacenter {location} has no root group link")]
    MissingRootGroup {
        /// Datacenter alias.
        location: String,
    },
    /// Fetching the tree failed.
    #[error(transparent)]
    Api(#[from] ClcApiError),
}

/// Arena-backed group hierarchy rooted at a datacenter's root group.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct GroupTree {
    nodes: Vec<GroupNode>,
}

impl GroupTree {
    /// Builds a tree from a nested [`Group`] document.
    #[must_use]
    pub fn from_root(root: Group) -> Self {
        let mut tree = Self { nodes: Vec::new() };
        tree.insert(root, None);
        tree
    }

    fn insert(&mut self, group: Group, parent: Option<usize>) -> usize {
        let index = self.nodes.len();
        self.nodes.push(GroupNode {
            id: group.id,
            name: group.name,
            description: group.description,
            group_type: group.group_type,
            links: group.links,
            parent,
            children: Vec::new(),
        });
        for child in group.groups {
            let child_index = self.insert(child, Some(index));
            if let Some(node) = self.nodes.get_mut(index) {
                node.children.push(child_index);
            }
        }
        index
    }

    /// Fetches the group tree of `location`.
    ///
    /// # Errors
    ///
    /// Returns [`GroupLookupError::MissingRootGroup`] when the datacenter has
    /// no group link and [`GroupLookupError::Api`] when a call fails.
    pub async fn fetch<T: Transport>(
        client: &ClcClient<T>,
        location: &str,
    ) -> Result<Self, GroupLookupError> {
        #[derive(Deserialize)]
        struct Datacenter {
            #[serde(default)]
            links: Vec<Link>,
        }

        let datacenter: Datacenter = client
            .get_as(&format!(
                "datacenters/{}/{location}?groupLinks=true",
                client.alias()
            ))
            .await?;
        let root_id = find_link(&datacenter.links, "group")
            .and_then(Link::resource_id)
            .ok_or_else(|| GroupLookupError::MissingRootGroup {
                location: location.to_owned(),
            })?;
        let root: Group = client
            .get_as(&format!("groups/{}/{root_id}", client.alias()))
            .await?;
        let tree = Self::from_root(root);
        debug!(location, groups = tree.len(), "fetched group tree");
        Ok(tree)
    }

    /// Returns the root node.
    #[must_use]
    pub fn root(&self) -> Option<&GroupNode> {
        self.nodes.first()
    }

    /// Number of groups in the tree.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns `true` when the tree has no groups.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Returns the parent of `node`.
    #[must_use]
    pub fn parent_of(&self, node: &GroupNode) -> Option<&GroupNode> {
        node.parent.and_then(|index| self.nodes.get(index))
    }

    /// Returns the direct children of `node`.
    pub fn children_of<'a>(&'a self, node: &'a GroupNode) -> impl Iterator<Item = &'a GroupNode> {
        node.children
            .iter()
            .filter_map(|index| self.nodes.get(*index))
    }

    /// Returns the group names from the root down to `node`.
    #[must_use]
    pub fn path_of<'a>(&'a self, node: &'a GroupNode) -> Vec<&'a str> {
        let mut names = vec![node.name.as_str()];
        let mut current = self.parent_of(node);
        while let Some(ancestor) = current {
            names.push(ancestor.name.as_str());
            current = self.parent_of(ancestor);
        }
        names.reverse();
        names
    }

    /// Visits every node depth-first, parents before children.
    pub fn walk(&self) -> impl Iterator<Item = &GroupNode> {
        let mut stack: Vec<usize> = if self.nodes.is_empty() { Vec::new() } else { vec![0] };
        std::iter::from_fn(move || {
            let index = stack.pop()?;
            let node = self.nodes.get(index)?;
            stack.extend(node.children.iter().rev());
            Some(node)
        })
    }

    /// Returns the group with the given id.
    #[must_use]
    pub fn by_id(&self, id: &str) -> Option<&GroupNode> {
        self.nodes.iter().find(|node| node.id == id)
    }

    /// Looks up a group by name, optionally requiring its parent's name.
    ///
    /// # Errors
    ///
    /// Returns [`GroupLookupError::Ambiguous`] when several groups match.
    pub fn find_group(
        &self,
        name: &str,
        parent: Option<&str>,
    ) -> Result<Option<&GroupNode>, GroupLookupError> {
        let matches: Vec<&GroupNode> = self
            .walk()
            .filter(|node| node.name == name)
            .filter(|node| {
                parent.is_none_or(|parent_name| {
                    self.parent_of(node)
                        .is_some_and(|parent_node| parent_node.name == parent_name)
                })
            })
            .collect();

        match matches.as_slice() {
            [] => Ok(None),
            [single] => Ok(Some(*single)),
            _ => Err(GroupLookupError::Ambiguous {
                name: name.to_owned(),
                count: matches.len(),
            }),
        }
    }

    /// Like [`GroupTree::find_group`] but treats a missing group as an error.
    ///
    /// # Errors
    ///
    /// Returns [`GroupLookupError::NotFound`] or
    /// [`GroupLookupError::Ambiguous`].
    pub fn require_group(
        &self,
        name: &str,
        parent: Option<&str>,
    ) -> Result<&GroupNode, GroupLookupError> {
        self.find_group(name, parent)?
            .ok_or_else(|| GroupLookupError::NotFound {
                name: name.to_owned(),
            })
    }
}

#[cfg(test)]
mod tests;
