//! Snapshot, blueprint package, metadata and server facts modules.

use reqwest::Method;
use serde_json::{Value, json};

use super::{check, expect_ok, run, server_doc, status_link};
use crate::modules::{ModuleError, ModuleKind};
use crate::test_support::ScriptedTransport;

fn script_servers(transport: &ScriptedTransport, snapshot_on_second: bool) {
    transport
        .ok(Method::GET, "servers/ACME/WA1ACMEWEB01", server_doc("WA1ACMEWEB01", "started", None, None))
        .ok(
            Method::GET,
            "servers/ACME/WA1ACMEWEB02",
            server_doc(
                "WA1ACMEWEB02",
                "started",
                None,
                snapshot_on_second.then_some("10"),
            ),
        );
}

fn snapshot_args(state: &str) -> Value {
    json!({"server_ids": ["WA1ACMEWEB01", "WA1ACMEWEB02"], "state": state, "expiration_days": 3})
}

#[tokio::test]
async fn snapshots_are_created_only_where_missing() {
    let transport = ScriptedTransport::new();
    script_servers(&transport, true);
    transport
        .ok(
            Method::POST,
            "operations/ACME/servers/createSnapshot",
            json!([{"server": "WA1ACMEWEB01", "isQueued": true, "links": [status_link("op-snap")]}]),
        )
        .operation_status("op-snap", &["executing", "succeeded"]);

    let outcome = expect_ok(run(&transport, ModuleKind::ServerSnapshot, snapshot_args("present")).await);

    assert!(outcome.changed);
    assert_eq!(outcome.get("server_ids"), Some(&json!(["WA1ACMEWEB01"])));
    let posts = transport.requests_to(&Method::POST, "operations/ACME/servers/createSnapshot");
    assert_eq!(
        posts.first().and_then(|request| request.body.clone()),
        Some(json!({"serverIds": ["WA1ACMEWEB01"], "snapshotExpirationDays": 3}))
    );
}

#[tokio::test]
async fn snapshot_absent_deletes_by_numeric_id() {
    let transport = ScriptedTransport::new();
    script_servers(&transport, true);
    transport
        .ok(
            Method::DELETE,
            "servers/ACME/WA1ACMEWEB02/snapshots/10",
            status_link("op-del"),
        )
        .operation_status("op-del", &["succeeded"]);

    let outcome = expect_ok(run(&transport, ModuleKind::ServerSnapshot, snapshot_args("absent")).await);

    assert!(outcome.changed);
    assert_eq!(outcome.get("server_ids"), Some(&json!(["WA1ACMEWEB02"])));
    assert_eq!(transport.pending(), 0);
}

#[tokio::test]
async fn snapshot_restore_targets_the_current_group() {
    let transport = ScriptedTransport::new();
    script_servers(&transport, true);
    transport
        .ok(
            Method::POST,
            "servers/ACME/WA1ACMEWEB02/snapshots/10/restore",
            status_link("op-restore"),
        )
        .operation_status("op-restore", &["succeeded"]);

    let outcome = expect_ok(run(&transport, ModuleKind::ServerSnapshot, snapshot_args("restore")).await);

    assert!(outcome.changed);
    let restores =
        transport.requests_to(&Method::POST, "servers/ACME/WA1ACMEWEB02/snapshots/10/restore");
    assert_eq!(
        restores.first().and_then(|request| request.body.clone()),
        Some(json!({"targetGroupId": "default"}))
    );
}

#[tokio::test]
async fn snapshot_present_everywhere_is_unchanged() {
    let transport = ScriptedTransport::new();
    transport
        .ok(Method::GET, "servers/ACME/WA1ACMEWEB01", server_doc("WA1ACMEWEB01", "started", None, Some("4")))
        .ok(Method::GET, "servers/ACME/WA1ACMEWEB02", server_doc("WA1ACMEWEB02", "started", None, Some("5")));

    let outcome = expect_ok(run(&transport, ModuleKind::ServerSnapshot, snapshot_args("present")).await);
    assert!(!outcome.changed);
    assert!(transport.mutations().is_empty());
}

#[tokio::test]
async fn snapshot_lifetime_is_bounded() {
    let transport = ScriptedTransport::new();
    let mut request = snapshot_args("present");
    request["expiration_days"] = json!(11);

    let err = run(&transport, ModuleKind::ServerSnapshot, request)
        .await
        .expect_err("lifetime too long");
    assert!(matches!(err, ModuleError::Validation(_)), "unexpected error: {err}");
}

#[tokio::test]
async fn blueprint_package_executes_on_all_servers() {
    let transport = ScriptedTransport::new();
    script_servers(&transport, false);
    transport
        .ok(
            Method::POST,
            "operations/ACME/servers/executePackage",
            json!([
                {"server": "WA1ACMEWEB01", "isQueued": true, "links": [status_link("op-a")]},
                {"server": "WA1ACMEWEB02", "isQueued": true, "links": [status_link("op-b")]}
            ]),
        )
        .operation_status("op-a", &["succeeded"])
        .operation_status("op-b", &["executing", "succeeded"]);

    let outcome = expect_ok(
        run(
            &transport,
            ModuleKind::BlueprintPackage,
            json!({
                "server_ids": ["WA1ACMEWEB01", "WA1ACMEWEB02"],
                "package_id": "pkg-1",
                "package_params": {"T3.Greeting": "hello"}
            }),
        )
        .await,
    );

    assert!(outcome.changed);
    let posts = transport.requests_to(&Method::POST, "operations/ACME/servers/executePackage");
    assert_eq!(
        posts.first().and_then(|request| request.body.clone()),
        Some(json!({
            "servers": ["WA1ACMEWEB01", "WA1ACMEWEB02"],
            "package": {"packageId": "pkg-1", "parameters": {"T3.Greeting": "hello"}}
        }))
    );
    assert_eq!(transport.pending(), 0);
}

const VALUES: &str = "metadata/ACME/references/WA1ACMEWEB01/values";

fn metadata_args() -> Value {
    json!({
        "reference_id": "WA1ACMEWEB01",
        "name": "build",
        "job_id": "job-7",
        "data": {"commit": "abc123"}
    })
}

#[tokio::test]
async fn metadata_record_is_created_then_left_alone() {
    let transport = ScriptedTransport::new();
    let stored = json!({
        "id": "md-1",
        "referenceId": "WA1ACMEWEB01",
        "jobId": "job-7",
        "name": "build",
        "data": {"commit": "abc123"}
    });
    transport
        .ok(Method::GET, VALUES, json!([]))
        .ok(Method::POST, VALUES, stored.clone())
        .ok(Method::GET, VALUES, json!([stored]));

    let first = expect_ok(run(&transport, ModuleKind::Metadata, metadata_args()).await);
    assert!(first.changed);
    let posts = transport.requests_to(&Method::POST, VALUES);
    assert_eq!(
        posts.first().and_then(|request| request.body.clone()),
        Some(json!({
            "referenceId": "WA1ACMEWEB01",
            "jobId": "job-7",
            "name": "build",
            "data": {"commit": "abc123"}
        }))
    );

    let second = expect_ok(run(&transport, ModuleKind::Metadata, metadata_args()).await);
    assert!(!second.changed);
    assert_eq!(transport.mutations().len(), 1);
}

#[tokio::test]
async fn metadata_absent_in_check_mode_sends_nothing() {
    let transport = ScriptedTransport::new();
    transport.ok(
        Method::GET,
        VALUES,
        json!({"items": [{"id": "md-1", "referenceId": "WA1ACMEWEB01", "name": "build"}]}),
    );
    let mut request = metadata_args();
    request["state"] = json!("absent");

    let outcome = expect_ok(check(&transport, ModuleKind::Metadata, request).await);
    assert!(outcome.changed);
    assert!(transport.mutations().is_empty());
}

#[tokio::test]
async fn server_facts_can_include_credentials() {
    let transport = ScriptedTransport::new();
    transport
        .ok(
            Method::GET,
            "servers/ACME/WA1ACMEWEB01",
            server_doc("WA1ACMEWEB01", "started", Some("64.0.0.1"), None),
        )
        .ok(
            Method::GET,
            "servers/ACME/WA1ACMEWEB01/credentials",
            json!({"userName": "root", "password": "s3cret"}),
        );

    let outcome = expect_ok(
        run(
            &transport,
            ModuleKind::ServerFacts,
            json!({"server_id": "WA1ACMEWEB01", "credentials": true}),
        )
        .await,
    );

    assert!(!outcome.changed);
    assert_eq!(outcome.get("public_ips"), Some(&json!(["64.0.0.1"])));
    assert_eq!(
        outcome.get("credentials").and_then(|creds| creds.get("userName")),
        Some(&json!("root"))
    );
}
