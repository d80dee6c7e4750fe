//! Unit tests for group tree construction and lookup.

use reqwest::Method;
use rstest::{fixture, rstest};
use serde_json::json;

use super::*;
use crate::test_support::{ScriptedTransport, scripted_client};

fn group(id: &str, name: &str, children: Vec<Group>) -> Group {
    Group {
        id: id.to_owned(),
        name: name.to_owned(),
        groups: children,
        ..Group::default()
    }
}

/// ```text
/// WA1 Hardware
/// ├── Default Group
/// │   ├── Web
/// │   └── Db
/// └── Staging
///     ├── Web
///     └── Cache
/// ```
#[fixture]
fn tree() -> GroupTree {
    GroupTree::from_root(group(
        "root",
        "WA1 Hardware",
        vec![
            group(
                "default",
                DEFAULT_GROUP,
                vec![group("web-prod", "Web", vec![]), group("db", "Db", vec![])],
            ),
            group(
                "staging",
                "Staging",
                vec![
                    group("web-staging", "Web", vec![]),
                    group("cache", "Cache", vec![]),
                ],
            ),
        ],
    ))
}

#[rstest]
fn walks_depth_first_parents_before_children(tree: GroupTree) {
    let order: Vec<&str> = tree.walk().map(|node| node.id.as_str()).collect();
    assert_eq!(
        order,
        vec!["root", "default", "web-prod", "db", "staging", "web-staging", "cache"]
    );
    assert_eq!(tree.len(), 7);
}

#[rstest]
#[case("Db", None, Some("db"))]
#[case("Cache", None, Some("cache"))]
#[case("Web", Some(DEFAULT_GROUP), Some("web-prod"))]
#[case("Web", Some("Staging"), Some("web-staging"))]
#[case("Db", Some("Staging"), None)]
#[case("Missing", None, None)]
fn finds_unique_groups(
    tree: GroupTree,
    #[case] name: &str,
    #[case] parent: Option<&str>,
    #[case] expected: Option<&str>,
) {
    let found = tree
        .find_group(name, parent)
        .unwrap_or_else(|err| panic!("lookup should not be ambiguous: {err}"));
    assert_eq!(found.map(|node| node.id.as_str()), expected);
}

#[rstest]
fn duplicate_names_without_parent_are_ambiguous(tree: GroupTree) {
    let err = tree.find_group("Web", None).expect_err("two groups named Web");
    assert_eq!(
        err,
        GroupLookupError::Ambiguous {
            name: String::from("Web"),
            count: 2,
        }
    );
}

#[rstest]
fn require_group_reports_missing_groups(tree: GroupTree) {
    let err = tree
        .require_group("Nope", None)
        .expect_err("group is absent");
    assert_eq!(err.to_string(), "group 'Nope' does not exist");
}

#[rstest]
fn nodes_know_their_ancestry(tree: GroupTree) {
    let cache = tree
        .require_group("Cache", None)
        .unwrap_or_else(|err| panic!("cache group: {err}"));
    assert_eq!(tree.path_of(cache), vec!["WA1 Hardware", "Staging", "Cache"]);
    assert_eq!(
        tree.parent_of(cache).map(|node| node.name.as_str()),
        Some("Staging")
    );

    let staging = tree
        .require_group("Staging", None)
        .unwrap_or_else(|err| panic!("staging group: {err}"));
    let children: Vec<&str> = tree
        .children_of(staging)
        .map(|node| node.name.as_str())
        .collect();
    assert_eq!(children, vec!["Web", "Cache"]);
    assert!(tree.root().is_some_and(|root| tree.parent_of(root).is_none()));
}

#[test]
fn server_links_are_exposed_per_group() {
    let document = json!({
        "id": "g1",
        "name": "Web",
        "links": [
            {"rel": "self", "href": "/v2/groups/ACME/g1"},
            {"rel": "server", "href": "/v2/servers/ACME/WA1ACMEWEB01", "id": "WA1ACMEWEB01"},
            {"rel": "server", "href": "/v2/servers/ACME/WA1ACMEWEB02"}
        ]
    });
    let root: Group =
        serde_json::from_value(document).unwrap_or_else(|err| panic!("group json: {err}"));
    let tree = GroupTree::from_root(root);
    let ids: Vec<&str> = tree
        .root()
        .map(|node| node.server_ids().collect())
        .unwrap_or_default();
    assert_eq!(ids, vec!["WA1ACMEWEB01", "WA1ACMEWEB02"]);
}

#[tokio::test]
async fn fetch_follows_the_datacenter_group_link() {
    let transport = ScriptedTransport::new();
    transport
        .ok(
            Method::GET,
            "datacenters/ACME/WA1",
            json!({"id": "wa1", "links": [{"rel": "group", "href": "/v2/groups/ACME/root", "id": "root"}]}),
        )
        .ok(
            Method::GET,
            "groups/ACME/root",
            json!({"id": "root", "name": "WA1 Hardware", "groups": [{"id": "default", "name": "Default Group"}]}),
        );
    let client = scripted_client(transport);

    let tree = GroupTree::fetch(&client, "WA1")
        .await
        .unwrap_or_else(|err| panic!("fetch should succeed: {err}"));
    assert_eq!(tree.len(), 2);
    assert!(
        tree.find_group(DEFAULT_GROUP, Some("WA1 Hardware"))
            .ok()
            .flatten()
            .is_some()
    );
}

#[tokio::test]
async fn fetch_requires_a_root_group_link() {
    let transport = ScriptedTransport::new();
    transport.ok(Method::GET, "datacenters/ACME/WA1", json!({"id": "wa1", "links": []}));
    let client = scripted_client(transport);

    let err = GroupTree::fetch(&client, "WA1")
        .await
        .expect_err("no group link");
    assert!(matches!(err, GroupLookupError::MissingRootGroup { .. }));
}
