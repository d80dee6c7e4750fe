//! Unit tests for the server module.

use reqwest::Method;
use rstest::{fixture, rstest};
use serde_json::{Value, json};

use super::*;
use crate::modules::{ModuleKind, run_module};
use crate::test_support::{ScriptedTransport, scripted_context};

#[fixture]
fn present_args() -> Value {
    json!({
        "name": "web",
        "template": "ubuntu-22",
        "group": "Web",
        "cpu": 2,
        "memory": 4
    })
}

fn params(args: Value) -> ServerParams {
    serde_json::from_value(args).unwrap_or_else(|err| panic!("params should parse: {err}"))
}

async fn run_server(transport: &ScriptedTransport, args: Value) -> Result<ModuleOutcome, ModuleError> {
    run_module(&scripted_context(transport.clone()), ModuleKind::Server, args).await
}

fn server(id: &str, power_state: &str) -> Value {
    json!({
        "id": id,
        "name": id,
        "groupId": "web",
        "status": "active",
        "details": {"powerState": power_state, "cpu": 2, "memoryMB": 4096},
        "links": []
    })
}

fn script_tree(transport: &ScriptedTransport, web_servers: &[&str]) {
    let links: Vec<Value> = web_servers
        .iter()
        .map(|id| json!({"rel": "server", "href": format!("/v2/servers/ACME/{id}"), "id": id}))
        .collect();
    transport
        .ok(
            Method::GET,
            "datacenters/ACME/WA1",
            json!({"links": [{"rel": "group", "href": "/v2/groups/ACME/root", "id": "root"}]}),
        )
        .ok(
            Method::GET,
            "groups/ACME/root",
            json!({
                "id": "root",
                "name": "WA1 Hardware",
                "groups": [{"id": "web", "name": "Web", "links": links}]
            }),
        );
}

fn script_capabilities(transport: &ScriptedTransport) {
    transport.ok(
        Method::GET,
        "datacenters/ACME/WA1/deploymentCapabilities",
        json!({
            "templates": [
                {"name": "CENTOS-8-64-TEMPLATE"},
                {"name": "UBUNTU-22-64-TEMPLATE"}
            ],
            "deployableNetworks": [
                {"networkId": "net-1", "name": "vlan_712_10.2.0"},
                {"networkId": "net-2", "name": "backend"}
            ]
        }),
    );
}

fn script_creation(transport: &ScriptedTransport, uuid: &str, operation: &str, server_id: &str) {
    transport
        .ok(
            Method::POST,
            "servers/ACME",
            json!({
                "server": "web",
                "isQueued": true,
                "links": [
                    {"rel": "status", "href": format!("/v2/operations/ACME/status/{operation}"), "id": operation},
                    {"rel": "self", "href": format!("/v2/servers/ACME/{uuid}?uuid=True"), "id": uuid}
                ]
            }),
        )
        .operation_status(operation, &["executing", "succeeded"])
        .ok(Method::GET, &format!("servers/ACME/{uuid}"), server(server_id, "started"));
}

#[rstest]
#[case::missing_template(json!({"name": "web"}))]
#[case::missing_name(json!({"template": "ubuntu"}))]
#[case::long_name(json!({"name": "webserver", "template": "ubuntu"}))]
#[case::cpu(json!({"name": "web", "template": "ubuntu", "cpu": 32}))]
#[case::memory(json!({"name": "web", "template": "ubuntu", "memory": 256}))]
#[case::hyperscale_storage(json!({"name": "web", "template": "ubuntu", "type": "hyperscale", "storage_type": "premium"}))]
#[case::exact_count_group(json!({"name": "web", "template": "ubuntu", "exact_count": 2}))]
#[case::public_ip_ports(json!({"name": "web", "template": "ubuntu", "add_public_ip": true}))]
#[case::group_differs_from_count_group(json!({"name": "web", "template": "ubuntu", "exact_count": 2, "count_group": "Web", "group": "Db"}))]
fn present_validation_rejects(#[case] args: Value) {
    assert!(matches!(
        params(args).validate_present(),
        Err(ModuleError::Validation(_))
    ));
}

#[rstest]
#[case::default_group("Default Group")]
#[case::same_group("Web")]
fn exact_count_accepts_a_group_matching_count_group(present_args: Value, #[case] group: &str) {
    let mut args = present_args;
    args["exact_count"] = json!(2);
    args["count_group"] = json!("Web");
    args["group"] = json!(group);
    assert!(params(args).validate_present().is_ok());
}

#[rstest]
fn hyperscale_defaults_to_hyperscale_storage(present_args: Value) {
    let mut args = present_args;
    args["type"] = json!("hyperscale");
    let parsed = params(args);
    assert_eq!(parsed.effective_storage_type(), StorageType::Hyperscale);
    assert!(parsed.validate_present().is_ok());
}

#[rstest]
#[tokio::test]
async fn present_creates_count_servers(present_args: Value) {
    let transport = ScriptedTransport::new();
    script_tree(&transport, &[]);
    script_capabilities(&transport);
    script_creation(&transport, "uuid1", "op-1", "WA1ACMEWEB01");
    script_creation(&transport, "uuid2", "op-2", "WA1ACMEWEB02");
    let mut args = present_args;
    args["count"] = json!(2);
    args["network_id"] = json!("backend");

    let outcome = run_server(&transport, args)
        .await
        .unwrap_or_else(|err| panic!("creation should succeed: {err}"));

    assert!(outcome.changed);
    assert_eq!(
        outcome.get("server_ids"),
        Some(&json!(["WA1ACMEWEB01", "WA1ACMEWEB02"]))
    );
    let posts = transport.requests_to(&Method::POST, "servers/ACME");
    assert_eq!(posts.len(), 2);
    let body = posts
        .first()
        .and_then(|request| request.body.clone())
        .unwrap_or_default();
    assert_eq!(body["sourceServerId"], json!("UBUNTU-22-64-TEMPLATE"));
    assert_eq!(body["groupId"], json!("web"));
    assert_eq!(body["networkId"], json!("net-2"));
    assert_eq!(body["memoryGB"], json!(4));
    assert_eq!(body["storageType"], json!("standard"));
    assert!(body.get("password").is_none());
    assert_eq!(transport.pending(), 0);
}

#[rstest]
#[tokio::test]
async fn unknown_template_fails_before_posting(present_args: Value) {
    let transport = ScriptedTransport::new();
    script_tree(&transport, &[]);
    script_capabilities(&transport);
    let mut args = present_args;
    args["template"] = json!("windows");

    let err = run_server(&transport, args).await.expect_err("no template");
    assert!(matches!(err, ModuleError::NotFound(_)), "unexpected error: {err}");
    assert!(transport.mutations().is_empty());
}

#[rstest]
#[tokio::test]
async fn exact_count_satisfied_is_unchanged(present_args: Value) {
    let transport = ScriptedTransport::new();
    script_tree(&transport, &["WA1ACMEWEB01", "WA1ACMEWEB02"]);
    transport
        .ok(Method::GET, "servers/ACME/WA1ACMEWEB01", server("WA1ACMEWEB01", "started"))
        .ok(Method::GET, "servers/ACME/WA1ACMEWEB02", server("WA1ACMEWEB02", "started"));
    let mut args = present_args;
    args["exact_count"] = json!(2);
    args["count_group"] = json!("Web");

    let outcome = run_server(&transport, args)
        .await
        .unwrap_or_else(|err| panic!("reconcile should succeed: {err}"));

    assert!(!outcome.changed);
    assert!(transport.mutations().is_empty());
}

#[rstest]
#[tokio::test]
async fn exact_count_removes_the_surplus(present_args: Value) {
    let transport = ScriptedTransport::new();
    script_tree(&transport, &["WA1ACMEWEB02", "WA1ACMEWEB01", "WA1ACMEWEB03"]);
    transport
        .ok(Method::GET, "servers/ACME/WA1ACMEWEB02", server("WA1ACMEWEB02", "started"))
        .ok(Method::GET, "servers/ACME/WA1ACMEWEB01", server("WA1ACMEWEB01", "started"))
        .ok(Method::GET, "servers/ACME/WA1ACMEWEB03", server("WA1ACMEWEB03", "started"))
        .ok(
            Method::DELETE,
            "servers/ACME/WA1ACMEWEB03",
            json!({"rel": "status", "id": "op-del"}),
        )
        .operation_status("op-del", &["succeeded"]);
    let mut args = present_args;
    args["exact_count"] = json!(2);
    args["count_group"] = json!("Web");

    let outcome = run_server(&transport, args)
        .await
        .unwrap_or_else(|err| panic!("reconcile should succeed: {err}"));

    assert!(outcome.changed);
    assert_eq!(outcome.get("server_ids"), Some(&json!(["WA1ACMEWEB03"])));
    assert_eq!(transport.pending(), 0);
}

#[tokio::test]
async fn absent_skips_servers_that_are_already_gone() {
    let transport = ScriptedTransport::new();
    transport
        .ok(Method::GET, "servers/ACME/WA1ACMEWEB01", server("WA1ACMEWEB01", "started"))
        .not_found(Method::GET, "servers/ACME/WA1ACMEWEB09")
        .ok(
            Method::DELETE,
            "servers/ACME/WA1ACMEWEB01",
            json!({"rel": "status", "id": "op-del"}),
        )
        .operation_status("op-del", &["executing", "succeeded"]);

    let outcome = run_server(
        &transport,
        json!({"server_ids": ["WA1ACMEWEB01", "WA1ACMEWEB09"], "state": "absent"}),
    )
    .await
    .unwrap_or_else(|err| panic!("delete should succeed: {err}"));

    assert!(outcome.changed);
    assert_eq!(outcome.get("server_ids"), Some(&json!(["WA1ACMEWEB01"])));
}

#[rstest]
#[case::start("started", "powerOn", json!(["WA1ACMEWEB02"]))]
#[case::stop("stopped", "powerOff", json!(["WA1ACMEWEB01"]))]
#[tokio::test]
async fn power_changes_only_touch_servers_in_the_other_state(
    #[case] state: &str,
    #[case] operation: &str,
    #[case] expected: Value,
) {
    let transport = ScriptedTransport::new();
    let path = format!("operations/ACME/servers/{operation}");
    transport
        .ok(Method::GET, "servers/ACME/WA1ACMEWEB01", server("WA1ACMEWEB01", "started"))
        .ok(Method::GET, "servers/ACME/WA1ACMEWEB02", server("WA1ACMEWEB02", "stopped"))
        .ok(
            Method::POST,
            &path,
            json!([{"server": "x", "isQueued": true, "links": [{"rel": "status", "id": "op-power"}]}]),
        )
        .operation_status("op-power", &["succeeded"]);

    let outcome = run_server(
        &transport,
        json!({"server_ids": ["WA1ACMEWEB01", "WA1ACMEWEB02"], "state": state}),
    )
    .await
    .unwrap_or_else(|err| panic!("power change should succeed: {err}"));

    assert!(outcome.changed);
    assert_eq!(
        transport
            .requests_to(&Method::POST, &path)
            .first()
            .and_then(|request| request.body.clone()),
        Some(expected)
    );
}

#[tokio::test]
async fn check_mode_power_change_sends_nothing() {
    let transport = ScriptedTransport::new();
    transport.ok(Method::GET, "servers/ACME/WA1ACMEWEB01", server("WA1ACMEWEB01", "stopped"));
    let ctx = scripted_context(transport.clone()).with_check_mode(true);

    let outcome = run_module(
        &ctx,
        ModuleKind::Server,
        json!({"server_ids": ["WA1ACMEWEB01"], "state": "started"}),
    )
    .await
    .unwrap_or_else(|err| panic!("check run should succeed: {err}"));

    assert!(outcome.changed);
    assert!(transport.mutations().is_empty());
}
