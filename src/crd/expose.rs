//! # Expose Configuration
//!
//! How Spinnaker's UI (deck) and API (gate) are reached from outside the cluster.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Service type applied when neither the strategy nor an override names one
pub const DEFAULT_EXPOSED_SERVICE_TYPE: &str = "LoadBalancer";

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExposeConfig {
    /// Expose strategy. When absent, services keep their generated ClusterIP definition.
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub expose_type: Option<ExposeType>,
    #[serde(default)]
    pub service: ExposeServiceConfig,
}

/// Strategy discriminator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ExposeType {
    /// Kubernetes Services of type LoadBalancer/NodePort
    Service,
    /// Pre-existing Ingress objects routing to the generated ClusterIP Services
    Ingress,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExposeServiceConfig {
    /// Kubernetes Service type, e.g. `LoadBalancer` or `NodePort`
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub service_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_port: Option<i32>,
    /// Annotations applied to every exposed Service
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    /// Per-service overrides keyed by logical service name (`gate`, `deck`)
    #[serde(default)]
    pub overrides: BTreeMap<String, ExposeServiceOverride>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExposeServiceOverride {
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub service_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_port: Option<i32>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

impl ExposeServiceConfig {
    /// Override type, else strategy type, else `LoadBalancer`
    #[must_use]
    pub fn service_type_for(&self, service: &str) -> String {
        self.overrides
            .get(service)
            .and_then(|o| o.service_type.clone())
            .or_else(|| self.service_type.clone())
            .unwrap_or_else(|| DEFAULT_EXPOSED_SERVICE_TYPE.to_string())
    }

    /// Override port, else strategy port, else `default_port`
    #[must_use]
    pub fn public_port_for(&self, service: &str, default_port: i32) -> i32 {
        self.overrides
            .get(service)
            .and_then(|o| o.public_port)
            .or(self.public_port)
            .unwrap_or(default_port)
    }

    /// Strategy-wide annotations with per-service overrides on top (last write wins)
    #[must_use]
    pub fn annotations_for(&self, service: &str) -> BTreeMap<String, String> {
        let mut annotations = self.annotations.clone();
        if let Some(o) = self.overrides.get(service) {
            annotations.extend(o.annotations.clone());
        }
        annotations
    }
}
