//! # Cluster Reader
//!
//! Read-only access to live cluster state used by change detectors, expose strategies
//! and the Kubernetes secret decrypter.
//!
//! ## Module Structure
//!
//! - `mod.rs` - `ClusterReader` trait, normalised Ingress view, API-backed implementation
//! - `memory.rs` - In-memory implementation for tests and dry runs

pub mod memory;

use crate::error::Result;
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Secret, Service};
use k8s_openapi::api::networking::v1::Ingress;
use kube::api::{Api, ApiResource, DynamicObject, GroupVersionKind, ListParams};
use kube::Client;
use serde_json::Value;
use tracing::debug;

/// Ingress API versions queried for exposure discovery
pub const INGRESS_API_VERSIONS: &[&str] = &["networking.k8s.io/v1", "extensions/v1beta1"];

#[async_trait]
pub trait ClusterReader: Send + Sync {
    /// Service by name; `None` when it does not exist
    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>>;

    /// Every Ingress in the namespace across the supported API versions
    async fn list_ingresses(&self, namespace: &str) -> Result<Vec<IngressView>>;

    /// Secret by name; `None` when it does not exist
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>>;

    /// Deployments matching a label selector
    async fn list_deployments(&self, namespace: &str, selector: &str) -> Result<Vec<Deployment>>;
}

/// Port a rule backend points at
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendPort {
    Number(i32),
    Name(String),
}

/// One `host + path -> service:port` routing entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngressRoute {
    pub host: Option<String>,
    pub path: Option<String>,
    pub service_name: String,
    pub port: Option<BackendPort>,
}

/// Ingress normalised over API versions
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngressView {
    pub name: String,
    pub api_version: String,
    pub routes: Vec<IngressRoute>,
    pub tls_hosts: Vec<String>,
    pub lb_hostname: Option<String>,
    pub lb_ip: Option<String>,
}

impl IngressView {
    /// Convert a `networking.k8s.io/v1` Ingress
    #[must_use]
    pub fn from_networking_v1(ingress: &Ingress) -> Self {
        let mut view = Self {
            name: ingress.metadata.name.clone().unwrap_or_default(),
            api_version: INGRESS_API_VERSIONS[0].to_string(),
            ..Self::default()
        };
        if let Some(spec) = &ingress.spec {
            for rule in spec.rules.iter().flatten() {
                let Some(http) = &rule.http else { continue };
                for path in &http.paths {
                    let Some(service) = &path.backend.service else {
                        continue;
                    };
                    let port = service.port.as_ref().and_then(|p| {
                        p.number
                            .map(BackendPort::Number)
                            .or_else(|| p.name.clone().map(BackendPort::Name))
                    });
                    view.routes.push(IngressRoute {
                        host: rule.host.clone(),
                        path: path.path.clone(),
                        service_name: service.name.clone(),
                        port,
                    });
                }
            }
            view.tls_hosts = spec
                .tls
                .iter()
                .flatten()
                .flat_map(|t| t.hosts.iter().flatten().cloned())
                .collect();
        }
        if let Some(lb) = ingress
            .status
            .as_ref()
            .and_then(|s| s.load_balancer.as_ref())
            .and_then(|lb| lb.ingress.as_ref())
            .and_then(|i| i.first())
        {
            view.lb_hostname = lb.hostname.clone().filter(|h| !h.is_empty());
            view.lb_ip = lb.ip.clone().filter(|ip| !ip.is_empty());
        }
        view
    }

    /// Convert an `extensions/v1beta1` Ingress read as an untyped object
    #[must_use]
    pub fn from_legacy(obj: &DynamicObject) -> Self {
        let mut view = Self {
            name: obj.metadata.name.clone().unwrap_or_default(),
            api_version: INGRESS_API_VERSIONS[1].to_string(),
            ..Self::default()
        };
        let spec = &obj.data["spec"];
        for rule in spec["rules"].as_array().into_iter().flatten() {
            let host = rule["host"].as_str().map(ToString::to_string);
            for path in rule["http"]["paths"].as_array().into_iter().flatten() {
                let backend = &path["backend"];
                let Some(service_name) = backend["serviceName"].as_str() else {
                    continue;
                };
                let port = match &backend["servicePort"] {
                    Value::Number(n) => n
                        .as_i64()
                        .and_then(|p| i32::try_from(p).ok())
                        .map(BackendPort::Number),
                    Value::String(s) => Some(
                        s.parse()
                            .map(BackendPort::Number)
                            .unwrap_or_else(|_| BackendPort::Name(s.clone())),
                    ),
                    _ => None,
                };
                view.routes.push(IngressRoute {
                    host: host.clone(),
                    path: path["path"].as_str().map(ToString::to_string),
                    service_name: service_name.to_string(),
                    port,
                });
            }
        }
        view.tls_hosts = spec["tls"]
            .as_array()
            .into_iter()
            .flatten()
            .flat_map(|t| t["hosts"].as_array().into_iter().flatten())
            .filter_map(|h| h.as_str().map(ToString::to_string))
            .collect();
        let lb = &obj.data["status"]["loadBalancer"]["ingress"][0];
        view.lb_hostname = lb["hostname"]
            .as_str()
            .filter(|h| !h.is_empty())
            .map(ToString::to_string);
        view.lb_ip = lb["ip"]
            .as_str()
            .filter(|ip| !ip.is_empty())
            .map(ToString::to_string);
        view
    }
}

/// `ClusterReader` backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeClusterReader {
    client: Client,
}

impl KubeClusterReader {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn list_legacy_ingresses(&self, namespace: &str) -> Result<Vec<IngressView>> {
        let gvk = GroupVersionKind::gvk("extensions", "v1beta1", "Ingress");
        let resource = ApiResource::from_gvk_with_plural(&gvk, "ingresses");
        let api: Api<DynamicObject> =
            Api::namespaced_with(self.client.clone(), namespace, &resource);
        match api.list(&ListParams::default()).await {
            Ok(list) => Ok(list.items.iter().map(IngressView::from_legacy).collect()),
            Err(kube::Error::Api(api_err)) if api_err.code == 404 => {
                debug!("extensions/v1beta1 Ingress is not served, skipping");
                Ok(Vec::new())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn list_networking_ingresses(&self, namespace: &str) -> Result<Vec<IngressView>> {
        let api: Api<Ingress> = Api::namespaced(self.client.clone(), namespace);
        match api.list(&ListParams::default()).await {
            Ok(list) => Ok(list
                .items
                .iter()
                .map(IngressView::from_networking_v1)
                .collect()),
            Err(kube::Error::Api(api_err)) if api_err.code == 404 => {
                debug!("networking.k8s.io/v1 Ingress is not served, skipping");
                Ok(Vec::new())
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl ClusterReader for KubeClusterReader {
    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn list_ingresses(&self, namespace: &str) -> Result<Vec<IngressView>> {
        let (mut current, legacy) = futures::try_join!(
            self.list_networking_ingresses(namespace),
            self.list_legacy_ingresses(namespace)
        )?;
        current.extend(legacy);
        Ok(current)
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn list_deployments(&self, namespace: &str, selector: &str) -> Result<Vec<Deployment>> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        let list = api.list(&ListParams::default().labels(selector)).await?;
        Ok(list.items)
    }
}
