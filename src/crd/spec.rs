//! # SpinnakerService Spec
//!
//! Main CRD specification types.

use crate::crd::{ExposeConfig, SpinnakerServiceStatus};
use schemars::{json_schema, Schema, SchemaGenerator};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// SpinnakerService Custom Resource Definition
///
/// Declares the Spinnaker installation the operator keeps converged.
///
/// # Example
///
/// ```yaml
/// apiVersion: spinnaker.io/v1alpha2
/// kind: SpinnakerService
/// metadata:
///   name: spinnaker
///   namespace: spinnaker
/// spec:
///   spinnakerConfig:
///     config:
///       version: 1.33.0
///       persistentStorage:
///         persistentStoreType: s3
///     profiles:
///       gate:
///         server:
///           port: 8085
///   expose:
///     type: service
///     service:
///       type: LoadBalancer
/// ```
#[derive(kube::CustomResource, Debug, Clone, Default, Deserialize, Serialize, schemars::JsonSchema)]
#[kube(
    kind = "SpinnakerService",
    group = "spinnaker.io",
    version = "v1alpha2",
    namespaced,
    status = "SpinnakerServiceStatus",
    shortname = "spinsvc",
    printcolumn = r#"{"name":"Version", "type":"string", "jsonPath":".status.version"}, {"name":"Status", "type":"string", "jsonPath":".status.status"}, {"name":"Services", "type":"integer", "jsonPath":".status.serviceCount"}, {"name":"Ready", "type":"integer", "jsonPath":".status.readyServices"}, {"name":"Lb", "type":"string", "jsonPath":".status.uiUrl"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct SpinnakerServiceSpec {
    /// Logical configuration, profiles, service settings and supporting files
    #[serde(default)]
    pub spinnaker_config: SpinnakerConfig,
    /// How the UI and API are reachable from outside the cluster
    #[serde(default)]
    pub expose: ExposeConfig,
    #[serde(default)]
    pub accounts: AccountsConfig,
    #[serde(default)]
    pub validation: ValidationConfig,
    /// Merge patches applied to generated objects, keyed by logical service name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub kustomize: BTreeMap<String, ServiceKustomization>,
}

/// The configuration handed to the manifest generator
#[derive(Debug, Clone, Default, Deserialize, Serialize, schemars::JsonSchema)]
pub struct SpinnakerConfig {
    /// Main configuration tree
    #[serde(default)]
    #[schemars(schema_with = "free_form")]
    pub config: Value,
    /// Per-service profile overlays (`<service>-local.yml`)
    #[serde(default)]
    #[schemars(schema_with = "free_form_map")]
    pub profiles: BTreeMap<String, Value>,
    /// Per-service settings overlays; the `spinnaker` entry applies to every service
    #[serde(default, rename = "service-settings")]
    #[schemars(schema_with = "free_form_map")]
    pub service_settings: BTreeMap<String, Value>,
    /// Supporting files referenced from the configuration
    #[serde(default)]
    pub files: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AccountsConfig {
    /// Validate declared accounts before deploying
    #[serde(default)]
    pub enabled: bool,
    /// Let services pick up account changes without a redeploy
    #[serde(default)]
    pub dynamic: bool,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ValidationConfig {
    /// Skip the config validator entirely
    #[serde(default)]
    pub disabled: bool,
    /// Stop at the first fatal finding
    #[serde(default)]
    pub fail_fast: bool,
    /// Validator names the config validator should skip
    #[serde(default)]
    pub skip_validators: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ServiceKustomization {
    #[serde(default)]
    pub service: Option<ObjectPatches>,
    #[serde(default)]
    pub deployment: Option<ObjectPatches>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ObjectPatches {
    /// YAML or JSON merge-patch documents (RFC 7386), applied in order
    #[serde(default)]
    pub patches: Vec<String>,
}

fn free_form(_: &mut SchemaGenerator) -> Schema {
    json_schema!({
        "type": "object",
        "x-kubernetes-preserve-unknown-fields": true
    })
}

fn free_form_map(_: &mut SchemaGenerator) -> Schema {
    json_schema!({
        "type": "object",
        "additionalProperties": {
            "type": "object",
            "x-kubernetes-preserve-unknown-fields": true
        }
    })
}

impl SpinnakerService {
    /// Namespace of the resource; cluster-scoped lookups never happen
    #[must_use]
    pub fn namespace_or_default(&self) -> String {
        self.metadata
            .namespace
            .clone()
            .unwrap_or_else(|| "default".to_string())
    }

    #[must_use]
    pub fn name_or_unknown(&self) -> String {
        self.metadata
            .name
            .clone()
            .unwrap_or_else(|| "unknown".to_string())
    }

    pub fn status_mut(&mut self) -> &mut SpinnakerServiceStatus {
        self.status.get_or_insert_with(SpinnakerServiceStatus::default)
    }

    /// Normalise `null` trees into empty objects so transformers can write into them
    pub fn ensure_initialized(&mut self) {
        let cfg = &mut self.spec.spinnaker_config;
        if !cfg.config.is_object() {
            cfg.config = Value::Object(Map::new());
        }
        for value in cfg
            .profiles
            .values_mut()
            .chain(cfg.service_settings.values_mut())
        {
            if value.is_null() {
                *value = Value::Object(Map::new());
            }
        }
        self.status_mut();
    }

    #[must_use]
    pub fn config(&self) -> &Value {
        &self.spec.spinnaker_config.config
    }

    pub fn config_mut(&mut self) -> &mut Value {
        &mut self.spec.spinnaker_config.config
    }

    #[must_use]
    pub fn profile(&self, service: &str) -> Option<&Value> {
        self.spec.spinnaker_config.profiles.get(service)
    }

    /// Profile overlay of a service, created empty when missing
    pub fn profile_mut(&mut self, service: &str) -> &mut Value {
        let profile = self
            .spec
            .spinnaker_config
            .profiles
            .entry(service.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if profile.is_null() {
            *profile = Value::Object(Map::new());
        }
        profile
    }

    /// `server.port` from the service profile, when the user customised it
    #[must_use]
    pub fn custom_server_port(&self, service: &str) -> Option<i32> {
        let port = crate::props::get(self.profile(service)?, "server.port")?;
        match port {
            Value::Number(n) => n.as_i64().and_then(|p| i32::try_from(p).ok()),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}
