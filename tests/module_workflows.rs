//! End-to-end module runs against the scripted transport.

use clc_modules::test_support::{ScriptedTransport, scripted_client, scripted_context};
use clc_modules::{
    ModuleError, ModuleKind, OperationError, PollSettings, run_module,
    wait_on_completed_operations,
};
use reqwest::Method;
use rstest::{fixture, rstest};
use serde_json::{Value, json};

#[fixture]
fn transport() -> ScriptedTransport {
    ScriptedTransport::new()
}

fn script_tree(transport: &ScriptedTransport, web_group: Option<Value>) {
    let children: Vec<Value> = web_group.into_iter().collect();
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
                "groups": [{"id": "default", "name": "Default Group", "groups": children}]
            }),
        );
}

fn server(id: &str, public_ip: Option<&str>) -> Value {
    let addresses: Vec<Value> = public_ip
        .map(|ip| json!({"internal": "10.0.0.5", "public": ip}))
        .into_iter()
        .collect();
    json!({
        "id": id,
        "name": id,
        "groupId": "web",
        "status": "active",
        "details": {"powerState": "started", "ipAddresses": addresses},
        "links": []
    })
}

#[rstest]
#[tokio::test]
async fn group_then_public_ip_converges_and_is_idempotent(transport: ScriptedTransport) {
    let ctx = scripted_context(transport.clone());
    script_tree(&transport, None);
    transport.ok(
        Method::POST,
        "groups/ACME",
        json!({"id": "web", "name": "Web", "links": []}),
    );

    let group = run_module(&ctx, ModuleKind::Group, json!({"name": "Web"}))
        .await
        .unwrap_or_else(|err| panic!("group should be created: {err}"));
    assert!(group.changed);

    script_tree(&transport, Some(json!({"id": "web", "name": "Web"})));
    let again = run_module(&ctx, ModuleKind::Group, json!({"name": "Web"}))
        .await
        .unwrap_or_else(|err| panic!("group rerun should succeed: {err}"));
    assert!(!again.changed);

    transport
        .ok(Method::GET, "servers/ACME/WA1ACMEWEB01", server("WA1ACMEWEB01", None))
        .ok(
            Method::POST,
            "servers/ACME/WA1ACMEWEB01/publicIPAddresses",
            json!({"rel": "status", "href": "/v2/operations/ACME/status/op-ip", "id": "op-ip"}),
        )
        .operation_status("op-ip", &["notStarted", "executing", "succeeded"])
        .ok(
            Method::GET,
            "servers/ACME/WA1ACMEWEB01",
            server("WA1ACMEWEB01", Some("64.0.0.1")),
        );
    let args = json!({"server_ids": ["WA1ACMEWEB01"], "ports": [{"port": 443}]});

    let added = run_module(&ctx, ModuleKind::PublicIp, args.clone())
        .await
        .unwrap_or_else(|err| panic!("public IP should be added: {err}"));
    assert!(added.changed);
    let settled = run_module(&ctx, ModuleKind::PublicIp, args)
        .await
        .unwrap_or_else(|err| panic!("public IP rerun should succeed: {err}"));
    assert!(!settled.changed);

    assert_eq!(transport.mutations().len(), 2);
    assert_eq!(transport.pending(), 0);
}

#[rstest]
#[tokio::test]
async fn failed_operation_fails_the_module(transport: ScriptedTransport) {
    let ctx = scripted_context(transport.clone());
    transport
        .ok(Method::GET, "servers/ACME/WA1ACMEWEB01", server("WA1ACMEWEB01", None))
        .ok(
            Method::POST,
            "operations/ACME/servers/powerOff",
            json!([{"server": "WA1ACMEWEB01", "isQueued": true,
                    "links": [{"rel": "status", "id": "op-off"}]}]),
        )
        .operation_status("op-off", &["executing", "failed"]);

    let err = run_module(
        &ctx,
        ModuleKind::Server,
        json!({"server_ids": ["WA1ACMEWEB01"], "state": "stopped"}),
    )
    .await
    .expect_err("the power operation failed");

    assert!(
        matches!(
            err,
            ModuleError::Operation(OperationError::Failed { failed: 1, total: 1, .. })
        ),
        "unexpected error: {err}"
    );
}

#[rstest]
#[tokio::test]
async fn poll_report_separates_outcomes(transport: ScriptedTransport) {
    transport
        .operation_status("op-a", &["succeeded"])
        .operation_status("op-b", &["executing", "failed"])
        .operation_status("op-c", &["executing", "executing"]);
    let client = scripted_client(transport.clone());
    let ids = [String::from("op-a"), String::from("op-b"), String::from("op-c")];

    let report = wait_on_completed_operations(
        &client,
        &ids,
        PollSettings {
            interval: std::time::Duration::ZERO,
            max_polls: 2,
        },
    )
    .await
    .unwrap_or_else(|err| panic!("status calls should succeed: {err}"));

    assert_eq!(report.succeeded, vec![String::from("op-a")]);
    assert_eq!(report.failed, vec![String::from("op-b")]);
    assert_eq!(report.unresolved, vec![String::from("op-c")]);
    assert_eq!(report.status_calls, 5);
    assert_eq!(report.failed_count(), 2);
    assert_eq!(transport.pending(), 0);
}
