//! End-to-end admission flow through the public API:
//! decode -> route -> label policy -> patch -> encode.

use std::collections::BTreeMap;
use std::sync::Arc;

use admission_core::webhook::mutation::PatchOperation;
use admission_core::webhook::policies::{LABEL_MANAGED_BY, LABEL_NAME};
use admission_core::webhook::types::JSON_MIME;
use admission_core::webhook::{
    DefaultDecision, Dispatcher, LabelPolicy, LabelPolicyConfig, SchemaVersion, WebhookRegistry,
};
use admission_core::Error;
use base64::{engine::general_purpose::STANDARD, Engine};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, LabelSelectorRequirement};
use serde_json::{json, Value};

fn policy() -> LabelPolicy {
    LabelPolicy::new(LabelPolicyConfig {
        name: "managed".to_string(),
        description: "stamps managed-by on web workloads".to_string(),
        path: "/managed".to_string(),
        selector: Some(LabelSelector {
            match_labels: None,
            match_expressions: Some(vec![LabelSelectorRequirement {
                key: "tier".to_string(),
                operator: "In".to_string(),
                values: Some(vec!["web".to_string(), "api".to_string()]),
            }]),
        }),
        labels: BTreeMap::from([(LABEL_MANAGED_BY.to_string(), "admission-core".to_string())]),
        annotations: BTreeMap::new(),
        required_labels: vec![LABEL_NAME.to_string()],
        ignored_namespaces: vec!["kube-system".to_string()],
    })
}

fn dispatcher() -> Dispatcher {
    let registry = WebhookRegistry::builder()
        .register(policy())
        .unwrap()
        .build();
    Dispatcher::new(Arc::new(registry), DefaultDecision::Allow)
}

fn review(api_version: &str, namespace: &str, labels: Value) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "apiVersion": api_version,
        "kind": "AdmissionReview",
        "request": {
            "uid": "7f0b2ab4-1c1d-4a63-a1a4-1b1b2f0c9d11",
            "kind": {"group": "apps", "version": "v1", "kind": "Deployment"},
            "resource": {"group": "apps", "version": "v1", "resource": "deployments"},
            "requestKind": {"group": "apps", "version": "v1", "kind": "Deployment"},
            "name": "frontend",
            "namespace": namespace,
            "operation": "CREATE",
            "userInfo": {"username": "system:serviceaccount:ci:deployer", "groups": ["system:serviceaccounts"]},
            "object": {
                "apiVersion": "apps/v1",
                "kind": "Deployment",
                "metadata": {"name": "frontend", "namespace": namespace, "labels": labels}
            },
            "dryRun": false
        }
    }))
    .unwrap()
}

fn parse(payload: &[u8]) -> Value {
    serde_json::from_slice(payload).unwrap()
}

#[test]
fn legacy_mutation_is_patched_and_answered_in_legacy_schema() {
    let out = dispatcher()
        .dispatch(
            "/managed/mutate",
            Some(JSON_MIME),
            &review("admission.k8s.io/v1beta1", "shop", json!({"tier": "web"})),
        )
        .unwrap();

    assert_eq!(out.schema, SchemaVersion::V1Beta1);
    assert_eq!(out.webhook, "managed");
    assert_eq!(out.action, "mutate");

    let json = parse(&out.payload);
    assert_eq!(json["apiVersion"], "admission.k8s.io/v1beta1");
    assert_eq!(json["kind"], "AdmissionReview");
    let response = &json["response"];
    assert_eq!(response["uid"], "7f0b2ab4-1c1d-4a63-a1a4-1b1b2f0c9d11");
    assert_eq!(response["allowed"], true);
    assert_eq!(response["patchType"], "JSONPatch");

    let patch_bytes = STANDARD.decode(response["patch"].as_str().unwrap()).unwrap();
    let patch: Vec<PatchOperation> = serde_json::from_slice(&patch_bytes).unwrap();
    assert_eq!(
        patch,
        vec![PatchOperation::add(
            "/metadata/labels/app.kubernetes.io~1managed-by",
            "admission-core"
        )]
    );
}

#[test]
fn validation_denies_missing_labels_in_current_schema() {
    let out = dispatcher()
        .dispatch(
            "/managed/validate",
            Some(JSON_MIME),
            &review("admission.k8s.io/v1", "shop", json!({"tier": "api"})),
        )
        .unwrap();

    assert_eq!(out.schema, SchemaVersion::V1);
    assert_eq!(out.allowed, Some(false));
    let json = parse(&out.payload);
    assert_eq!(json["apiVersion"], "admission.k8s.io/v1");
    assert_eq!(json["response"]["status"]["code"], 403);
    assert_eq!(
        json["response"]["status"]["message"],
        "missing required labels: app.kubernetes.io/name"
    );
}

#[test]
fn selector_mismatch_falls_back_to_default_decision() {
    let out = dispatcher()
        .dispatch(
            "/managed/validate",
            Some(JSON_MIME),
            &review("admission.k8s.io/v1", "shop", json!({"tier": "db"})),
        )
        .unwrap();
    assert_eq!(out.allowed, Some(true));
    assert!(parse(&out.payload)["response"].get("patch").is_none());
}

#[test]
fn ignored_namespace_falls_back_to_default_decision() {
    let out = dispatcher()
        .dispatch(
            "/managed/mutate",
            Some(JSON_MIME),
            &review("admission.k8s.io/v1", "kube-system", json!({"tier": "web"})),
        )
        .unwrap();
    assert_eq!(out.allowed, Some(true));
}

#[test]
fn unknown_action_is_denied_not_propagated() {
    let out = dispatcher()
        .dispatch(
            "/managed/frobnicate",
            Some(JSON_MIME),
            &review("admission.k8s.io/v1", "shop", json!({"tier": "web"})),
        )
        .unwrap();
    assert_eq!(out.allowed, Some(false));
    let message = parse(&out.payload)["response"]["status"]["message"]
        .as_str()
        .unwrap()
        .to_string();
    assert!(message.contains("managed"));
    assert!(message.contains("frobnicate"));
}

#[test]
fn sibling_prefix_is_not_routed() {
    let err = dispatcher()
        .dispatch(
            "/managedX/mutate",
            Some(JSON_MIME),
            &review("admission.k8s.io/v1", "shop", json!({})),
        )
        .unwrap_err();
    assert!(matches!(err, Error::NoMatchingHandler(_)));
    assert_eq!(err.status_code(), 404);
}
