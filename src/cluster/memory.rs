//! In-memory `ClusterReader` used by tests and offline runs.

use super::{ClusterReader, IngressView};
use crate::error::{OperatorError, Result};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Secret, Service};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct State {
    services: BTreeMap<(String, String), Service>,
    secrets: BTreeMap<(String, String), Secret>,
    ingresses: BTreeMap<String, Vec<IngressView>>,
    deployments: BTreeMap<String, Vec<Deployment>>,
    failing: Option<String>,
}

/// Shared, cloneable fake cluster
#[derive(Clone, Default)]
pub struct InMemoryCluster {
    state: Arc<Mutex<State>>,
}

impl std::fmt::Debug for InMemoryCluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryCluster").finish_non_exhaustive()
    }
}

impl InMemoryCluster {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut State) -> T) -> Result<T> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| OperatorError::cluster("in-memory cluster state poisoned"))?;
        if let Some(message) = &state.failing {
            return Err(OperatorError::cluster(message.clone()));
        }
        Ok(f(&mut state))
    }

    pub fn put_service(&self, namespace: &str, service: Service) {
        let name = service.metadata.name.clone().unwrap_or_default();
        if let Ok(mut state) = self.state.lock() {
            state.services.insert((namespace.to_string(), name), service);
        }
    }

    pub fn put_secret(&self, namespace: &str, secret: Secret) {
        let name = secret.metadata.name.clone().unwrap_or_default();
        if let Ok(mut state) = self.state.lock() {
            state.secrets.insert((namespace.to_string(), name), secret);
        }
    }

    pub fn put_ingress(&self, namespace: &str, ingress: IngressView) {
        if let Ok(mut state) = self.state.lock() {
            state
                .ingresses
                .entry(namespace.to_string())
                .or_default()
                .push(ingress);
        }
    }

    pub fn put_deployment(&self, namespace: &str, deployment: Deployment) {
        if let Ok(mut state) = self.state.lock() {
            let deployments = state.deployments.entry(namespace.to_string()).or_default();
            deployments.retain(|d| d.metadata.name != deployment.metadata.name);
            deployments.push(deployment);
        }
    }

    /// Make every subsequent read fail with `message`
    pub fn fail_reads(&self, message: &str) {
        if let Ok(mut state) = self.state.lock() {
            state.failing = Some(message.to_string());
        }
    }

    #[must_use]
    pub fn service(&self, namespace: &str, name: &str) -> Option<Service> {
        self.state
            .lock()
            .ok()?
            .services
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }
}

#[async_trait]
impl ClusterReader for InMemoryCluster {
    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>> {
        self.with_state(|s| {
            s.services
                .get(&(namespace.to_string(), name.to_string()))
                .cloned()
        })
    }

    async fn list_ingresses(&self, namespace: &str) -> Result<Vec<IngressView>> {
        self.with_state(|s| s.ingresses.get(namespace).cloned().unwrap_or_default())
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>> {
        self.with_state(|s| {
            s.secrets
                .get(&(namespace.to_string(), name.to_string()))
                .cloned()
        })
    }

    async fn list_deployments(&self, namespace: &str, _selector: &str) -> Result<Vec<Deployment>> {
        self.with_state(|s| s.deployments.get(namespace).cloned().unwrap_or_default())
    }
}
