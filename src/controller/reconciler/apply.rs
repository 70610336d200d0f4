//! Server-side apply of a transformed manifest set.

use crate::cluster::memory::InMemoryCluster;
use crate::cluster::ClusterReader;
use crate::constants::OPERATOR_NAME;
use crate::error::{OperatorError, Result};
use crate::generated::{AuxResource, GeneratedManifestSet};
use crate::observability::metrics;
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Secret, Service};
use k8s_openapi::NamespaceResourceScope;
use kube::api::{
    Api, ApiResource, DeleteParams, DynamicObject, GroupVersionKind, Patch, PatchParams,
};
use kube::{Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

/// Writes generated objects to the cluster
#[async_trait]
pub trait ManifestApplier: Send + Sync {
    /// Apply every object of the set and delete its `to_delete` objects.
    /// Returns the number of objects applied.
    async fn apply(&self, namespace: &str, manifests: &GeneratedManifestSet) -> Result<usize>;
}

#[derive(Clone)]
pub struct KubeApplier {
    client: Client,
}

impl std::fmt::Debug for KubeApplier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeApplier").finish_non_exhaustive()
    }
}

fn object_name(meta: &k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta, kind: &str) -> Result<String> {
    meta.name
        .clone()
        .filter(|n| !n.is_empty())
        .ok_or_else(|| OperatorError::generator(format!("generated {kind} has no name")))
}

fn api_resource(obj: &DynamicObject) -> Result<ApiResource> {
    let types = obj
        .types
        .as_ref()
        .ok_or_else(|| OperatorError::generator("generated object has no apiVersion/kind"))?;
    let gvk = GroupVersionKind::try_from(types)
        .map_err(|e| OperatorError::generator(format!("invalid apiVersion/kind: {e}")))?;
    Ok(ApiResource::from_gvk(&gvk))
}

impl KubeApplier {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn apply_typed<K>(&self, namespace: &str, obj: &K, params: &PatchParams) -> Result<()>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + Debug
            + Serialize
            + DeserializeOwned,
    {
        let name = object_name(obj.meta(), &K::kind(&()))?;
        let ns = obj.namespace().unwrap_or_else(|| namespace.to_string());
        let api: Api<K> = Api::namespaced(self.client.clone(), &ns);
        api.patch(&name, params, &Patch::Apply(obj)).await?;
        debug!(kind = %K::kind(&()), name = %name, namespace = %ns, "applied");
        Ok(())
    }

    async fn apply_dynamic(&self, namespace: &str, obj: &DynamicObject, params: &PatchParams) -> Result<()> {
        let ar = api_resource(obj)?;
        let name = object_name(&obj.metadata, &ar.kind)?;
        let ns = obj.namespace().unwrap_or_else(|| namespace.to_string());
        let api: Api<DynamicObject> = Api::namespaced_with(self.client.clone(), &ns, &ar);
        api.patch(&name, params, &Patch::Apply(obj)).await?;
        debug!(kind = %ar.kind, name = %name, namespace = %ns, "applied");
        Ok(())
    }

    async fn delete_dynamic(&self, namespace: &str, obj: &DynamicObject) -> Result<()> {
        let ar = api_resource(obj)?;
        let name = object_name(&obj.metadata, &ar.kind)?;
        let ns = obj.namespace().unwrap_or_else(|| namespace.to_string());
        let api: Api<DynamicObject> = Api::namespaced_with(self.client.clone(), &ns, &ar);
        match api.delete(&name, &DeleteParams::default()).await {
            Ok(_) => {
                info!(kind = %ar.kind, name = %name, namespace = %ns, "deleted");
                Ok(())
            }
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl ManifestApplier for KubeApplier {
    async fn apply(&self, namespace: &str, manifests: &GeneratedManifestSet) -> Result<usize> {
        let params = PatchParams::apply(OPERATOR_NAME).force();
        let mut applied = 0;
        for (service, bundle) in &manifests.services {
            // Supporting objects first so pods never start against missing secrets
            for resource in &bundle.resources {
                match resource {
                    AuxResource::Secret(secret) => {
                        self.apply_typed::<Secret>(namespace, secret, &params).await?;
                    }
                    AuxResource::Other(obj) => self.apply_dynamic(namespace, obj, &params).await?,
                }
                applied += 1;
            }
            if let Some(svc) = &bundle.service {
                self.apply_typed::<Service>(namespace, svc, &params).await?;
                applied += 1;
            }
            if let Some(deployment) = &bundle.deployment {
                self.apply_typed::<Deployment>(namespace, deployment, &params).await?;
                applied += 1;
            }
            for obj in &bundle.to_delete {
                self.delete_dynamic(namespace, obj).await?;
            }
            debug!(service = %service, "service bundle applied");
        }
        metrics::increment_objects_applied(applied);
        Ok(applied)
    }
}

/// Applies into an [`InMemoryCluster`] so later reads observe the written objects.
/// Used by tests and dry runs.
#[derive(Debug)]
pub struct MemoryApplier {
    cluster: Arc<InMemoryCluster>,
    applied: Mutex<Vec<GeneratedManifestSet>>,
}

impl MemoryApplier {
    #[must_use]
    pub fn new(cluster: Arc<InMemoryCluster>) -> Self {
        Self {
            cluster,
            applied: Mutex::new(Vec::new()),
        }
    }

    /// Number of `apply` calls so far
    #[must_use]
    pub fn applied_count(&self) -> usize {
        self.applied.lock().map(|a| a.len()).unwrap_or_default()
    }

    /// The manifest set of the most recent `apply` call
    #[must_use]
    pub fn last_applied(&self) -> Option<GeneratedManifestSet> {
        self.applied.lock().ok()?.last().cloned()
    }
}

#[async_trait]
impl ManifestApplier for MemoryApplier {
    async fn apply(&self, namespace: &str, manifests: &GeneratedManifestSet) -> Result<usize> {
        for bundle in manifests.services.values() {
            for resource in &bundle.resources {
                if let AuxResource::Secret(secret) = resource {
                    let ns = secret.namespace().unwrap_or_else(|| namespace.to_string());
                    self.cluster.put_secret(&ns, secret.clone());
                }
            }
            // Like the API server, applying a spec leaves the live status alone
            if let Some(service) = &bundle.service {
                let ns = service.namespace().unwrap_or_else(|| namespace.to_string());
                let mut service = service.clone();
                if let Some(live) = self.cluster.service(&ns, &service.name_any()) {
                    service.status = live.status;
                }
                self.cluster.put_service(&ns, service);
            }
            if let Some(deployment) = &bundle.deployment {
                let ns = deployment.namespace().unwrap_or_else(|| namespace.to_string());
                let mut deployment = deployment.clone();
                let live = self.cluster.list_deployments(&ns, "").await?;
                if let Some(existing) = live.into_iter().find(|d| d.name_any() == deployment.name_any()) {
                    deployment.status = existing.status;
                }
                self.cluster.put_deployment(&ns, deployment);
            }
        }
        if let Ok(mut applied) = self.applied.lock() {
            applied.push(manifests.clone());
        }
        Ok(manifests.object_count())
    }
}
