use reqwest::Method;
use serde_json::json;

use super::{check, expect_ok, run, script_group_tree, status_link};
use crate::modules::{ModuleError, ModuleKind};
use crate::test_support::ScriptedTransport;

#[tokio::test]
async fn existing_group_is_unchanged() {
    let transport = ScriptedTransport::new();
    script_group_tree(&transport);

    let outcome = expect_ok(run(&transport, ModuleKind::Group, json!({"name": "Web"})).await);

    assert!(!outcome.changed);
    assert_eq!(outcome.get("group").and_then(|group| group.get("id")), Some(&json!("web")));
    assert!(transport.mutations().is_empty());
}

#[tokio::test]
async fn missing_group_is_created_under_its_parent() {
    let transport = ScriptedTransport::new();
    script_group_tree(&transport);
    transport.ok(
        Method::POST,
        "groups/ACME",
        json!({"id": "db", "name": "Db", "links": []}),
    );

    let outcome = expect_ok(
        run(
            &transport,
            ModuleKind::Group,
            json!({"name": "Db", "parent": "Default Group", "description": "databases"}),
        )
        .await,
    );

    assert!(outcome.changed);
    let posts = transport.requests_to(&Method::POST, "groups/ACME");
    assert_eq!(
        posts.first().and_then(|request| request.body.clone()),
        Some(json!({"name": "Db", "description": "databases", "parentGroupId": "default"}))
    );
}

#[tokio::test]
async fn unknown_parent_fails() {
    let transport = ScriptedTransport::new();
    script_group_tree(&transport);

    let err = run(&transport, ModuleKind::Group, json!({"name": "Db", "parent": "Nope"}))
        .await
        .expect_err("missing parent");
    assert!(matches!(err, ModuleError::NotFound(_)), "unexpected error: {err}");
    assert!(transport.mutations().is_empty());
}

#[tokio::test]
async fn absent_deletes_and_waits() {
    let transport = ScriptedTransport::new();
    script_group_tree(&transport);
    transport
        .ok(Method::DELETE, "groups/ACME/web", status_link("op-del"))
        .operation_status("op-del", &["notStarted", "executing", "succeeded"]);

    let outcome = expect_ok(
        run(&transport, ModuleKind::Group, json!({"name": "Web", "state": "absent"})).await,
    );

    assert!(outcome.changed);
    assert_eq!(transport.pending(), 0);
}

#[tokio::test]
async fn absent_in_check_mode_sends_nothing() {
    let transport = ScriptedTransport::new();
    script_group_tree(&transport);

    let outcome = expect_ok(
        check(&transport, ModuleKind::Group, json!({"name": "Web", "state": "absent"})).await,
    );

    assert!(outcome.changed);
    assert!(transport.mutations().is_empty());
}

#[tokio::test]
async fn group_facts_lists_children_and_servers() {
    let transport = ScriptedTransport::new();
    transport.ok(
        Method::GET,
        "groups/ACME/default",
        json!({
            "id": "default",
            "name": "Default Group",
            "links": [{"rel": "server", "href": "/v2/servers/ACME/WA1ACMEAPP01", "id": "WA1ACMEAPP01"}],
            "groups": [{"id": "web", "name": "Web"}]
        }),
    );

    let outcome = expect_ok(
        run(&transport, ModuleKind::GroupFacts, json!({"group_id": "default"})).await,
    );

    assert!(!outcome.changed);
    assert_eq!(outcome.get("server_ids"), Some(&json!(["WA1ACMEAPP01"])));
    assert_eq!(
        outcome
            .get("children")
            .and_then(|children| children.as_array())
            .map(Vec::len),
        Some(1)
    );
}
