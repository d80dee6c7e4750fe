use reqwest::Method;
use serde_json::{Value, json};

use super::{check, expect_ok, run};
use crate::modules::{ModuleError, ModuleKind};
use crate::test_support::ScriptedTransport;

const NETWORKS: &str = "v2-experimental/networks/ACME/WA1";

fn network(name: &str, description: &str) -> Value {
    json!({
        "id": "net-1",
        "cidr": "10.2.0.0/24",
        "description": description,
        "gateway": "10.2.0.1",
        "name": name,
        "netmask": "255.255.255.0",
        "type": "private",
        "vlan": 712
    })
}

#[tokio::test]
async fn present_twice_claims_and_names_once() {
    let transport = ScriptedTransport::new();
    transport
        .ok(Method::GET, NETWORKS, json!([]))
        .ok(
            Method::POST,
            &format!("{NETWORKS}/claim"),
            json!({"operationId": "claim-1", "uri": "/v2-experimental/operations/ACME/status/claim-1"}),
        )
        .ok(Method::GET, "operations/ACME/status/claim-1", json!({"status": "executing"}))
        .ok(
            Method::GET,
            "operations/ACME/status/claim-1",
            json!({"status": "succeeded", "summary": {"links": [
                {"rel": "network", "href": "/v2-experimental/networks/ACME/WA1/net-1"}
            ]}}),
        )
        .ok(Method::GET, &format!("{NETWORKS}/net-1"), network("vlan_712_10.2.0", "vlan_712_10.2.0"))
        .respond(Method::PUT, &format!("{NETWORKS}/net-1"), 204, Value::Null)
        .ok(Method::GET, NETWORKS, json!([network("backend", "backend tier")]));
    let args = json!({"name": "backend", "description": "backend tier"});

    let first = expect_ok(run(&transport, ModuleKind::Network, args.clone()).await);
    assert!(first.changed);
    assert_eq!(first.get("network").and_then(|net| net.get("name")), Some(&json!("backend")));
    let renames = transport.requests_to(&Method::PUT, &format!("{NETWORKS}/net-1"));
    assert_eq!(
        renames.first().and_then(|request| request.body.clone()),
        Some(json!({"name": "backend", "description": "backend tier"}))
    );

    let second = expect_ok(run(&transport, ModuleKind::Network, args).await);
    assert!(!second.changed);
    assert_eq!(transport.mutations().len(), 2);
    assert_eq!(transport.pending(), 0);
}

#[tokio::test]
async fn present_by_id_updates_the_description() {
    let transport = ScriptedTransport::new();
    transport
        .ok(Method::GET, NETWORKS, json!([network("backend", "old")]))
        .respond(Method::PUT, &format!("{NETWORKS}/net-1"), 204, Value::Null);

    let outcome = expect_ok(
        run(
            &transport,
            ModuleKind::Network,
            json!({"id": "net-1", "description": "new"}),
        )
        .await,
    );
    assert!(outcome.changed);
    assert_eq!(transport.mutations().len(), 1);
}

#[tokio::test]
async fn unknown_id_fails() {
    let transport = ScriptedTransport::new();
    transport.ok(Method::GET, NETWORKS, json!([]));

    let err = run(&transport, ModuleKind::Network, json!({"id": "net-404"}))
        .await
        .expect_err("unknown network");
    assert!(matches!(err, ModuleError::NotFound(_)), "unexpected error: {err}");
}

#[tokio::test]
async fn failed_claim_is_reported() {
    let transport = ScriptedTransport::new();
    transport
        .ok(Method::GET, NETWORKS, json!([]))
        .ok(Method::POST, &format!("{NETWORKS}/claim"), json!({"operationId": "claim-2"}))
        .operation_status("claim-2", &["failed"]);

    let err = run(&transport, ModuleKind::Network, json!({"name": "backend"}))
        .await
        .expect_err("claim failed");
    assert!(matches!(err, ModuleError::Operation(_)), "unexpected error: {err}");
}

#[tokio::test]
async fn absent_releases_the_network() {
    let transport = ScriptedTransport::new();
    transport
        .ok(Method::GET, NETWORKS, json!([network("backend", "backend tier")]))
        .respond(Method::POST, &format!("{NETWORKS}/net-1/release"), 204, Value::Null);

    let outcome = expect_ok(
        run(&transport, ModuleKind::Network, json!({"name": "backend", "state": "absent"})).await,
    );
    assert!(outcome.changed);
    assert_eq!(transport.mutations().len(), 1);
}

#[tokio::test]
async fn check_mode_does_not_claim() {
    let transport = ScriptedTransport::new();
    transport.ok(Method::GET, NETWORKS, json!([]));

    let outcome = expect_ok(check(&transport, ModuleKind::Network, json!({"name": "backend"})).await);
    assert!(outcome.changed);
    assert!(transport.mutations().is_empty());
}
