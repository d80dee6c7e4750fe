//! Unit tests for the resource modules, driven through [`run_module`].

mod group;
mod network;
mod servers;

use reqwest::Method;
use rstest::rstest;
use serde_json::{Value, json};

use super::*;
use crate::test_support::{ScriptedTransport, TEST_ALIAS, scripted_context};

/// Runs `kind` against `transport` outside check mode.
async fn run(
    transport: &ScriptedTransport,
    kind: ModuleKind,
    args: Value,
) -> Result<ModuleOutcome, ModuleError> {
    run_module(&scripted_context(transport.clone()), kind, args).await
}

/// Runs `kind` against `transport` in check mode.
async fn check(
    transport: &ScriptedTransport,
    kind: ModuleKind,
    args: Value,
) -> Result<ModuleOutcome, ModuleError> {
    let ctx = scripted_context(transport.clone()).with_check_mode(true);
    run_module(&ctx, kind, args).await
}

fn expect_ok(result: Result<ModuleOutcome, ModuleError>) -> ModuleOutcome {
    result.unwrap_or_else(|err| panic!("module should succeed: {err}"))
}

/// Scripts the WA1 group tree: root, `Default Group` with one server, and
/// `Web` below it.
fn script_group_tree(transport: &ScriptedTransport) {
    transport
        .ok(
            Method::GET,
            "datacenters/ACME/WA1",
            json!({"id": "wa1", "links": [{"rel": "group", "href": "/v2/groups/ACME/root", "id": "root"}]}),
        )
        .ok(
            Method::GET,
            "groups/ACME/root",
            json!({
                "id": "root",
                "name": "WA1 Hardware",
                "groups": [{
                    "id": "default",
                    "name": "Default Group",
                    "links": [{"rel": "server", "href": "/v2/servers/ACME/WA1ACMEAPP01", "id": "WA1ACMEAPP01"}],
                    "groups": [{"id": "web", "name": "Web"}]
                }]
            }),
        );
}

/// A server document in the shape `GET servers/{alias}/{id}` returns.
fn server_doc(id: &str, power_state: &str, public_ip: Option<&str>, snapshot: Option<&str>) -> Value {
    let mut addresses = vec![json!({"internal": "10.0.0.10"})];
    if let Some(address) = public_ip {
        addresses.push(json!({"internal": "10.0.0.10", "public": address}));
    }
    let snapshots: Vec<Value> = snapshot
        .map(|snapshot_id| {
            json!({
                "name": "2026-10-01.10:00:00",
                "links": [{"rel": "self", "href": format!("/v2/servers/ACME/{id}/snapshots/{snapshot_id}")}]
            })
        })
        .into_iter()
        .collect();
    json!({
        "id": id,
        "name": id,
        "groupId": "default",
        "status": "active",
        "details": {
            "powerState": power_state,
            "cpu": 2,
            "memoryMB": 4096,
            "ipAddresses": addresses,
            "snapshots": snapshots
        },
        "links": [{"rel": "self", "href": format!("/v2/servers/ACME/{id}")}]
    })
}

fn status_link(operation_id: &str) -> Value {
    json!({"rel": "status", "href": format!("/v2/operations/{TEST_ALIAS}/status/{operation_id}"), "id": operation_id})
}

#[test]
fn outcome_renders_changed_with_the_payload() {
    let outcome = ModuleOutcome::new(true)
        .with("group", json!({"id": "web"}))
        .unwrap_or_else(|err| panic!("payload should serialise: {err}"));
    assert_eq!(
        outcome.to_json(),
        json!({"changed": true, "group": {"id": "web"}})
    );
}

#[rstest]
#[case::missing_required(ModuleKind::Group, json!({}))]
#[case::wrong_type(ModuleKind::PublicIp, json!({"server_ids": "WA1ACMEWEB01"}))]
#[case::unknown_state(ModuleKind::Network, json!({"state": "claimed"}))]
#[case::unknown_method(ModuleKind::LoadBalancer, json!({"name": "web", "method": "random"}))]
#[tokio::test]
async fn malformed_arguments_are_rejected_before_any_call(
    #[case] kind: ModuleKind,
    #[case] args: Value,
) {
    let transport = ScriptedTransport::new();
    let err = run(&transport, kind, args).await.expect_err("invalid arguments");
    assert!(matches!(err, ModuleError::Arguments(_)), "unexpected error: {err}");
    assert!(transport.requests().is_empty());
}

#[tokio::test]
async fn location_falls_back_to_the_session() {
    let ctx = scripted_context(ScriptedTransport::new());
    assert_eq!(ctx.location(None), Ok(String::from("WA1")));
    assert_eq!(ctx.location(Some(" ")), Ok(String::from("WA1")));
    assert_eq!(ctx.location(Some("UC1")), Ok(String::from("UC1")));
}

#[tokio::test]
async fn settle_skips_polling_without_wait() {
    let transport = ScriptedTransport::new();
    let ctx = scripted_context(transport.clone());
    ctx.settle(&[json!({"links": [status_link("op-1")]})], false)
        .await
        .unwrap_or_else(|err| panic!("settle should succeed: {err}"));
    assert!(transport.requests().is_empty());
}

#[tokio::test]
async fn settle_fails_when_an_operation_fails() {
    let transport = ScriptedTransport::new();
    transport.operation_status("op-1", &["executing", "failed"]);
    let ctx = scripted_context(transport.clone());
    let err = ctx
        .settle(&[json!({"links": [status_link("op-1")]})], true)
        .await
        .expect_err("failed operation");
    assert!(matches!(err, ModuleError::Operation(_)), "unexpected error: {err}");
}
