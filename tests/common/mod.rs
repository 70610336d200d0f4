//! Shared fixtures for the integration tests: an in-memory cluster, a generator that
//! answers with a fixed manifest set and an applier writing back into the cluster.
#![allow(dead_code, reason = "each test binary uses a different subset")]

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Service;
use serde_json::{json, Value};
use spinnaker_operator::cluster::memory::InMemoryCluster;
use spinnaker_operator::controller::reconciler::{MemoryApplier, PassDeps};
use spinnaker_operator::crd::{SpinnakerService, SpinnakerServiceSpec};
use spinnaker_operator::error::Result;
use spinnaker_operator::generated::GeneratedManifestSet;
use spinnaker_operator::generator::{ConfigValidator, ManifestGenerator, ValidationMessage};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const NAMESPACE: &str = "spinnaker";

pub struct StaticGenerator {
    manifests: Value,
    calls: AtomicUsize,
}

impl StaticGenerator {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ManifestGenerator for StaticGenerator {
    async fn generate(&self, _svc: &SpinnakerService) -> Result<GeneratedManifestSet> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(serde_json::from_value(self.manifests.clone())?)
    }
}

pub struct NoFindings;

#[async_trait]
impl ConfigValidator for NoFindings {
    async fn validate(
        &self,
        _svc: &SpinnakerService,
        _fail_fast: bool,
        _skip_validators: &[String],
    ) -> Result<Vec<ValidationMessage>> {
        Ok(Vec::new())
    }
}

pub struct Harness {
    pub cluster: Arc<InMemoryCluster>,
    pub generator: Arc<StaticGenerator>,
    pub applier: Arc<MemoryApplier>,
    pub deps: PassDeps,
}

impl Harness {
    pub fn new(manifests: Value) -> Self {
        let cluster = Arc::new(InMemoryCluster::new());
        let generator = Arc::new(StaticGenerator {
            manifests,
            calls: AtomicUsize::new(0),
        });
        let applier = Arc::new(MemoryApplier::new(Arc::clone(&cluster)));
        let deps = PassDeps {
            cluster: cluster.clone(),
            generator: generator.clone(),
            validator: Arc::new(NoFindings),
            applier: applier.clone(),
            account_validators: spinnaker_operator::validate::standard_validators(),
            default_expose_port: 80,
            secret_backend_timeout: Duration::from_secs(1),
            validation_enabled: true,
        };
        Self {
            cluster,
            generator,
            applier,
            deps,
        }
    }

    /// Live Service as the applier left it
    pub fn live_service(&self, name: &str) -> Service {
        self.cluster
            .service(NAMESPACE, name)
            .unwrap_or_else(|| panic!("service {name} was not applied"))
    }

    /// A Service left in the cluster by an earlier, unexposed installation
    pub fn seed_cluster_ip_service(&self, name: &str, port: i32) {
        let service: Service = serde_json::from_value(json!({
            "apiVersion": "v1",
            "kind": "Service",
            "metadata": {"name": name, "namespace": NAMESPACE},
            "spec": {"type": "ClusterIP", "ports": [{"port": port, "targetPort": port}]}
        }))
        .unwrap();
        self.cluster.put_service(NAMESPACE, service);
    }

    /// Simulate the cloud provider assigning a load balancer
    pub fn assign_load_balancer(&self, name: &str, hostname: &str) {
        let mut service = self.live_service(name);
        service.status = Some(
            serde_json::from_value(json!({"loadBalancer": {"ingress": [{"hostname": hostname}]}}))
                .unwrap(),
        );
        self.cluster.put_service(NAMESPACE, service);
    }
}

pub fn spinnaker_service(spec: Value) -> SpinnakerService {
    let spec: SpinnakerServiceSpec = serde_json::from_value(spec).unwrap();
    let mut svc = SpinnakerService::new("spinnaker", spec);
    svc.metadata.namespace = Some(NAMESPACE.to_string());
    svc.metadata.uid = Some("5b0c4b8e-0d7c-4c1b-9a59-1f1c0c1d2e3f".to_string());
    svc.metadata.generation = Some(1);
    svc
}

/// What the next watch event delivers: the unchanged spec plus the stored status
pub fn next_event(original: &SpinnakerService, reconciled: &SpinnakerService) -> SpinnakerService {
    let mut next = original.clone();
    next.status = reconciled.status.clone();
    next
}

fn deployment(service: &str, port: i32) -> Value {
    json!({
        "apiVersion": "apps/v1",
        "kind": "Deployment",
        "metadata": {"name": format!("spin-{service}")},
        "spec": {
            "replicas": 1,
            "selector": {"matchLabels": {"app": "spin", "cluster": format!("spin-{service}")}},
            "template": {
                "metadata": {"labels": {"app": "spin", "cluster": format!("spin-{service}")}},
                "spec": {
                    "containers": [{
                        "name": service,
                        "image": format!("us-docker.pkg.dev/spinnaker-community/docker/{service}:1.33.0"),
                        "ports": [{"containerPort": port}]
                    }],
                    "volumes": [{"name": format!("spin-{service}-files"), "secret": {"secretName": format!("spin-{service}-files")}}]
                }
            }
        }
    })
}

fn service(service: &str, port: i32) -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "Service",
        "metadata": {"name": format!("spin-{service}")},
        "spec": {
            "type": "ClusterIP",
            "selector": {"app": "spin", "cluster": format!("spin-{service}")},
            "ports": [{"port": port, "targetPort": port}]
        }
    })
}

/// Gate and deck as the generator renders them, with the gate profile carrying
/// `gate_profile` inside its files Secret
pub fn gate_and_deck(gate_profile: &str) -> Value {
    json!({
        "gate": {
            "deployment": deployment("gate", 8084),
            "service": service("gate", 8084),
            "resources": [{
                "apiVersion": "v1",
                "kind": "Secret",
                "metadata": {"name": "spin-gate-files"},
                "stringData": {"gate-local.yml": gate_profile}
            }],
            "toDelete": []
        },
        "deck": {
            "deployment": deployment("deck", 9000),
            "service": service("deck", 9000),
            "resources": [],
            "toDelete": []
        }
    })
}
