//! # Generated Manifests
//!
//! The set of Kubernetes objects produced by the manifest generator for one
//! reconciliation, grouped by logical service name (`gate`, `clouddriver`, ...).
//!
//! The set is created once per pass, mutated in place by the transformer pipeline and
//! discarded after it has been applied.

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Container, Secret, Service};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::DynamicObject;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GeneratedManifestSet {
    pub services: BTreeMap<String, ServiceBundle>,
}

/// Objects generated for one logical service
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceBundle {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment: Option<Deployment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<Service>,
    /// Supporting objects, chiefly Secrets holding rendered profiles
    #[serde(default)]
    pub resources: Vec<AuxResource>,
    /// Objects that must be removed from the cluster
    #[serde(default)]
    pub to_delete: Vec<DynamicObject>,
}

/// Supporting object; Secrets are typed because the secrets transformer rewrites them
#[derive(Debug, Clone)]
pub enum AuxResource {
    Secret(Secret),
    Other(DynamicObject),
}

impl AuxResource {
    pub fn metadata_mut(&mut self) -> &mut ObjectMeta {
        match self {
            Self::Secret(s) => &mut s.metadata,
            Self::Other(o) => &mut o.metadata,
        }
    }

    #[must_use]
    pub fn metadata(&self) -> &ObjectMeta {
        match self {
            Self::Secret(s) => &s.metadata,
            Self::Other(o) => &o.metadata,
        }
    }
}

impl Serialize for AuxResource {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Secret(s) => s.serialize(serializer),
            Self::Other(o) => o.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for AuxResource {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        let kind = value.get("kind").and_then(serde_json::Value::as_str);
        let api_version = value.get("apiVersion").and_then(serde_json::Value::as_str);
        if kind == Some("Secret") && api_version.is_none_or(|v| v == "v1") {
            serde_json::from_value(value)
                .map(Self::Secret)
                .map_err(serde::de::Error::custom)
        } else {
            serde_json::from_value(value)
                .map(Self::Other)
                .map_err(serde::de::Error::custom)
        }
    }
}

impl ServiceBundle {
    pub fn secrets_mut(&mut self) -> impl Iterator<Item = &mut Secret> {
        self.resources.iter_mut().filter_map(|r| match r {
            AuxResource::Secret(s) => Some(s),
            AuxResource::Other(_) => None,
        })
    }

    /// Metadata of every object in the bundle that will be applied
    pub fn metadata_mut(&mut self) -> Vec<&mut ObjectMeta> {
        let mut metas = Vec::new();
        if let Some(d) = self.deployment.as_mut() {
            metas.push(&mut d.metadata);
        }
        if let Some(s) = self.service.as_mut() {
            metas.push(&mut s.metadata);
        }
        metas.extend(self.resources.iter_mut().map(AuxResource::metadata_mut));
        metas
    }

    /// Container named after the service, following the generator's naming convention
    pub fn container_mut(&mut self, name: &str) -> Option<&mut Container> {
        find_container_mut(self.deployment.as_mut()?, name)
    }
}

impl GeneratedManifestSet {
    #[must_use]
    pub fn get(&self, service: &str) -> Option<&ServiceBundle> {
        self.services.get(service)
    }

    pub fn get_mut(&mut self, service: &str) -> Option<&mut ServiceBundle> {
        self.services.get_mut(service)
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&String, &mut ServiceBundle)> {
        self.services.iter_mut()
    }

    /// Number of objects that will be applied (deletions excluded)
    #[must_use]
    pub fn object_count(&self) -> usize {
        self.services
            .values()
            .map(|b| {
                usize::from(b.deployment.is_some())
                    + usize::from(b.service.is_some())
                    + b.resources.len()
            })
            .sum()
    }
}

pub fn find_container_mut<'a>(deployment: &'a mut Deployment, name: &str) -> Option<&'a mut Container> {
    deployment
        .spec
        .as_mut()?
        .template
        .spec
        .as_mut()?
        .containers
        .iter_mut()
        .find(|c| c.name == name)
}

#[must_use]
pub fn find_container<'a>(deployment: &'a Deployment, name: &str) -> Option<&'a Container> {
    deployment
        .spec
        .as_ref()?
        .template
        .spec
        .as_ref()?
        .containers
        .iter()
        .find(|c| c.name == name)
}
