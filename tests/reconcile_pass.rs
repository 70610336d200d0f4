//! Reconciliation passes against in-memory collaborators.

mod common;

use common::{gate_and_deck, next_event, spinnaker_service, Harness, NAMESPACE};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use serde_json::json;
use spinnaker_operator::constants::{CONFIG_HASH_KEY, KUSTOMIZE_HASH_KEY};
use spinnaker_operator::controller::reconciler::{run_pass, PassOutcome};
use spinnaker_operator::generated::find_container;

const PLAIN_PROFILE: &str = "server:\n  port: 8084\n";

fn exposed_spinnaker() -> spinnaker_operator::crd::SpinnakerService {
    spinnaker_service(json!({
        "spinnakerConfig": {"config": {"version": "1.33.0"}},
        "expose": {"type": "service", "service": {"type": "LoadBalancer"}}
    }))
}

#[tokio::test]
async fn service_exposure_converges_once_load_balancers_are_assigned() {
    let harness = Harness::new(gate_and_deck(PLAIN_PROFILE));
    harness.seed_cluster_ip_service("spin-gate", 8084);
    let original = exposed_spinnaker();

    // Gate is only reachable inside the cluster so far
    let mut first = original.clone();
    let outcome = run_pass(&mut first, &harness.deps).await.unwrap();
    assert!(matches!(outcome, PassOutcome::Deployed { objects: 5, .. }));

    let gate = harness.live_service("spin-gate");
    let spec = gate.spec.as_ref().unwrap();
    assert_eq!(spec.type_.as_deref(), Some("LoadBalancer"));
    let port = &spec.ports.as_ref().unwrap()[0];
    assert_eq!(port.port, 80);
    assert_eq!(port.target_port, Some(IntOrString::Int(8084)));
    let status = first.status.as_ref().unwrap();
    assert!(status.api_url.is_none());
    assert!(status.hash(CONFIG_HASH_KEY).is_some());
    assert!(status.hash(KUSTOMIZE_HASH_KEY).is_some());

    // The cloud assigns load balancers; the recorded URLs are now stale
    harness.assign_load_balancer("spin-gate", "api.lb.example.com");
    harness.assign_load_balancer("spin-deck", "ui.lb.example.com");

    let mut second = next_event(&original, &first);
    let outcome = run_pass(&mut second, &harness.deps).await.unwrap();
    assert!(matches!(outcome, PassOutcome::Deployed { .. }));
    let status = second.status.as_ref().unwrap();
    assert_eq!(status.api_url.as_deref(), Some("http://api.lb.example.com"));
    assert_eq!(status.ui_url.as_deref(), Some("http://ui.lb.example.com"));

    // Converged: no further generation
    let mut third = next_event(&original, &second);
    let outcome = run_pass(&mut third, &harness.deps).await.unwrap();
    assert!(matches!(outcome, PassOutcome::UpToDate { .. }));
    assert_eq!(harness.generator.calls(), 2);
    assert_eq!(harness.applier.applied_count(), 2);
}

#[tokio::test]
async fn public_port_443_produces_https_urls() {
    let harness = Harness::new(gate_and_deck(PLAIN_PROFILE));
    let original = spinnaker_service(json!({
        "spinnakerConfig": {"config": {"version": "1.33.0"}},
        "expose": {"type": "service", "service": {"overrides": {"gate": {"publicPort": 443}}}}
    }));

    let mut first = original.clone();
    run_pass(&mut first, &harness.deps).await.unwrap();
    let gate = harness.live_service("spin-gate");
    assert_eq!(gate.spec.as_ref().unwrap().ports.as_ref().unwrap()[0].port, 443);
    let deck = harness.live_service("spin-deck");
    assert_eq!(deck.spec.as_ref().unwrap().ports.as_ref().unwrap()[0].port, 80);

    harness.assign_load_balancer("spin-gate", "api.lb.example.com");
    harness.assign_load_balancer("spin-deck", "ui.lb.example.com");
    let mut second = next_event(&original, &first);
    run_pass(&mut second, &harness.deps).await.unwrap();
    let status = second.status.as_ref().unwrap();
    assert_eq!(status.api_url.as_deref(), Some("https://api.lb.example.com"));
    assert_eq!(status.ui_url.as_deref(), Some("http://ui.lb.example.com"));
}

#[tokio::test]
async fn per_service_overrides_win_over_strategy_settings() {
    let harness = Harness::new(gate_and_deck(PLAIN_PROFILE));
    let mut svc = spinnaker_service(json!({
        "spinnakerConfig": {"config": {"version": "1.33.0"}},
        "expose": {"type": "service", "service": {
            "type": "LoadBalancer",
            "annotations": {"team": "platform", "tier": "edge"},
            "overrides": {"deck": {"type": "NodePort", "annotations": {"tier": "internal"}}}
        }}
    }));

    run_pass(&mut svc, &harness.deps).await.unwrap();

    let gate = harness.live_service("spin-gate");
    let deck = harness.live_service("spin-deck");
    assert_eq!(gate.spec.as_ref().unwrap().type_.as_deref(), Some("LoadBalancer"));
    assert_eq!(deck.spec.as_ref().unwrap().type_.as_deref(), Some("NodePort"));
    let gate_annotations = gate.metadata.annotations.unwrap();
    let deck_annotations = deck.metadata.annotations.unwrap();
    assert_eq!(gate_annotations["tier"], "edge");
    assert_eq!(deck_annotations["tier"], "internal");
    assert_eq!(deck_annotations["team"], "platform");
}

#[tokio::test]
async fn repeated_secret_references_materialise_once() {
    let profile = "redis:\n  password: encrypted:k8s!n:spin-secrets!k:redis\n\
                   session:\n  password: encrypted:k8s!n:spin-secrets!k:redis\n\
                   saml:\n  keystore: encryptedFile:k8s!n:saml!k:keystore.jks\n";
    let harness = Harness::new(gate_and_deck(profile));
    let mut svc = spinnaker_service(json!({"spinnakerConfig": {"config": {"version": "1.33.0"}}}));

    run_pass(&mut svc, &harness.deps).await.unwrap();

    let applied = harness.applier.last_applied().unwrap();
    let gate = applied.get("gate").unwrap();
    let container = find_container(gate.deployment.as_ref().unwrap(), "gate").unwrap();
    let env = container.env.as_ref().unwrap();
    let redis: Vec<_> = env
        .iter()
        .filter(|e| e.name == "GATE_SPIN_SECRETS_REDIS")
        .collect();
    assert_eq!(redis.len(), 1);
    let selector = redis[0]
        .value_from
        .as_ref()
        .and_then(|v| v.secret_key_ref.as_ref())
        .unwrap();
    assert_eq!(selector.name, "spin-secrets");
    assert_eq!(selector.key, "redis");

    let mounts = container.volume_mounts.as_ref().unwrap();
    assert_eq!(mounts.iter().filter(|m| m.name == "saml").count(), 1);
    assert_eq!(
        mounts.iter().find(|m| m.name == "saml").unwrap().mount_path,
        "/var/secrets/gate/saml"
    );
}

#[tokio::test]
async fn kustomize_changes_trigger_a_redeploy() {
    let harness = Harness::new(gate_and_deck(PLAIN_PROFILE));
    let original = spinnaker_service(json!({"spinnakerConfig": {"config": {"version": "1.33.0"}}}));

    let mut first = original.clone();
    run_pass(&mut first, &harness.deps).await.unwrap();
    let mut second = next_event(&original, &first);
    assert!(matches!(
        run_pass(&mut second, &harness.deps).await.unwrap(),
        PassOutcome::UpToDate { .. }
    ));

    let mut patched = next_event(&original, &second);
    patched.spec.kustomize = serde_json::from_value(json!({
        "gate": {"deployment": {"patches": ["spec:\n  replicas: 3\n"]}}
    }))
    .unwrap();
    assert!(matches!(
        run_pass(&mut patched, &harness.deps).await.unwrap(),
        PassOutcome::Deployed { .. }
    ));

    let applied = harness.applier.last_applied().unwrap();
    let replicas = applied
        .get("gate")
        .and_then(|b| b.deployment.as_ref())
        .and_then(|d| d.spec.as_ref())
        .and_then(|s| s.replicas);
    assert_eq!(replicas, Some(3));
    assert_eq!(harness.generator.calls(), 2);
}

#[tokio::test]
async fn applied_objects_are_owned_and_namespaced() {
    let harness = Harness::new(gate_and_deck(PLAIN_PROFILE));
    let mut svc = spinnaker_service(json!({"spinnakerConfig": {"config": {"version": "1.33.0"}}}));

    run_pass(&mut svc, &harness.deps).await.unwrap();

    let gate = harness.live_service("spin-gate");
    assert_eq!(gate.metadata.namespace.as_deref(), Some(NAMESPACE));
    let owners = gate.metadata.owner_references.unwrap();
    assert_eq!(owners.len(), 1);
    assert_eq!(owners[0].kind, "SpinnakerService");
    assert_eq!(
        gate.metadata.labels.unwrap()["app.kubernetes.io/managed-by"],
        "spinnaker-operator"
    );
    // Without an expose strategy the generated ClusterIP Service is untouched
    assert_eq!(gate.spec.unwrap().type_.as_deref(), Some("ClusterIP"));
}
