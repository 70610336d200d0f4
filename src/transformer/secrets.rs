//! # Secrets Injection
//!
//! Replaces Kubernetes secret references (`encrypted:k8s!n:<name>!k:<key>` and
//! `encryptedFile:k8s!...`) with something the target service can consume natively:
//!
//! - `encrypted:` becomes an environment variable fed from the Secret and a `${NAME}`
//!   placeholder in the payload
//! - `encryptedFile:` becomes a Secret volume mounted under
//!   `/var/secrets/<service>/<secret>` and the absolute file path in the payload
//!
//! AWS credential pairs found in the main configuration are turned into
//! `AWS_ACCESS_KEY_ID` / `AWS_SECRET_ACCESS_KEY` for the service that uses them.
//!
//! Materialisations are deduplicated per service by variable name and Secret name,
//! and the owning container is patched without duplicating existing entries.

use super::Transformer;
use crate::constants::SECRETS_MOUNT_BASE;
use crate::crd::SpinnakerService;
use crate::error::{OperatorError, Result};
use crate::generated::{GeneratedManifestSet, ServiceBundle};
use crate::secrets::{parse_kubernetes_reference, KubernetesSecretKey};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{
    EnvVar, EnvVarSource, KeyToPath, SecretKeySelector, SecretVolumeSource, Volume, VolumeMount,
};
use k8s_openapi::ByteString;
use regex::Regex;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::LazyLock;
use tracing::{debug, info};

static NON_ALPHANUMERIC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9]").expect("env var pattern is valid"));

static NON_DNS_LABEL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-z0-9-]").expect("volume name pattern is valid"));

pub const AWS_ACCESS_KEY_ID: &str = "AWS_ACCESS_KEY_ID";
pub const AWS_SECRET_ACCESS_KEY: &str = "AWS_SECRET_ACCESS_KEY";

/// Where AWS credential pairs live in the main configuration
struct AwsLocation {
    path: &'static str,
    kind: LocationKind,
    access_field: &'static str,
    secret_field: &'static str,
    service: &'static str,
}

enum LocationKind {
    Object,
    Accounts,
    /// `canary.serviceIntegrations[name=aws].accounts[*]`
    CanaryAccounts,
}

const AWS_LOCATIONS: &[AwsLocation] = &[
    AwsLocation {
        path: "providers.aws",
        kind: LocationKind::Object,
        access_field: "accessKeyId",
        secret_field: "secretAccessKey",
        service: "clouddriver",
    },
    AwsLocation {
        path: "persistentStorage.s3",
        kind: LocationKind::Object,
        access_field: "accessKeyId",
        secret_field: "secretAccessKey",
        service: "front50",
    },
    AwsLocation {
        path: "artifacts.s3.accounts",
        kind: LocationKind::Accounts,
        access_field: "awsAccessKeyId",
        secret_field: "awsSecretAccessKey",
        service: "clouddriver",
    },
    AwsLocation {
        path: "canary.serviceIntegrations",
        kind: LocationKind::CanaryAccounts,
        access_field: "accessKeyId",
        secret_field: "secretAccessKey",
        service: "kayenta",
    },
];

#[derive(Debug, Clone, PartialEq, Eq)]
enum AccessKey {
    Plain(String),
    Secret(KubernetesSecretKey),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct AwsCredentials {
    access_key: AccessKey,
    secret_key: KubernetesSecretKey,
}

/// Environment variable name for a secret entry consumed by `service`
#[must_use]
pub fn env_var_name(service: &str, secret_name: &str, key: &str) -> String {
    NON_ALPHANUMERIC
        .replace_all(&format!("{service}_{secret_name}_{key}"), "_")
        .to_uppercase()
}

/// Secret payloads that already hold a JSON object or array are left alone.
///
/// This sniffs the first and last non-blank characters only, so a YAML document that
/// happens to be a single flow mapping is skipped too.
#[must_use]
pub fn looks_like_json(value: &str) -> bool {
    let trimmed = value.trim();
    (trimmed.starts_with('{') && trimmed.ends_with('}'))
        || (trimmed.starts_with('[') && trimmed.ends_with(']'))
}

/// DNS label for the volume of a Secret. Names that had to be rewritten get a hash
/// suffix so two Secrets never share a volume.
fn volume_name(secret_name: &str) -> String {
    let sanitized = NON_DNS_LABEL
        .replace_all(&secret_name.to_lowercase(), "-")
        .into_owned();
    if sanitized == secret_name && sanitized.len() <= 63 {
        return sanitized;
    }
    let digest = format!("{:x}", Sha256::digest(secret_name.as_bytes()));
    let mut base = sanitized;
    base.truncate(54);
    let base = base.trim_matches('-');
    if base.is_empty() {
        format!("secret-{}", &digest[..8])
    } else {
        format!("{base}-{}", &digest[..8])
    }
}

/// Env vars, volumes and mounts one service needs. Env vars are keyed by variable
/// name, volumes and mounts by Secret name.
#[derive(Debug, Default)]
pub struct Materialization {
    service: String,
    env: BTreeMap<String, EnvVar>,
    volumes: BTreeMap<String, Volume>,
    mounts: BTreeMap<String, VolumeMount>,
}

impl Materialization {
    fn new(service: &str) -> Self {
        Self {
            service: service.to_string(),
            ..Self::default()
        }
    }

    fn is_empty(&self) -> bool {
        self.env.is_empty() && self.volumes.is_empty()
    }

    /// Register an env var for the entry and return its placeholder
    fn add_env(&mut self, secret: &KubernetesSecretKey) -> String {
        let name = env_var_name(&self.service, &secret.name, &secret.key);
        self.env
            .entry(name.clone())
            .or_insert_with(|| secret_env(&name, secret));
        format!("${{{name}}}")
    }

    /// Register a file mount for the entry and return the absolute path
    fn add_file(&mut self, secret: &KubernetesSecretKey) -> String {
        let volume = volume_name(&secret.name);
        let dir = format!("{SECRETS_MOUNT_BASE}/{}/{}", self.service, secret.name);

        let entry = self.volumes.entry(secret.name.clone()).or_insert_with(|| Volume {
            name: volume.clone(),
            secret: Some(SecretVolumeSource {
                secret_name: Some(secret.name.clone()),
                items: Some(Vec::new()),
                ..SecretVolumeSource::default()
            }),
            ..Volume::default()
        });
        if let Some(items) = entry.secret.as_mut().map(|s| s.items.get_or_insert_with(Vec::new)) {
            if !items.iter().any(|i| i.key == secret.key) {
                items.push(KeyToPath {
                    key: secret.key.clone(),
                    path: secret.key.clone(),
                    mode: None,
                });
            }
        }
        self.mounts.entry(secret.name.clone()).or_insert_with(|| VolumeMount {
            name: volume,
            mount_path: dir.clone(),
            read_only: Some(true),
            ..VolumeMount::default()
        });

        format!("{dir}/{}", secret.key)
    }

    fn add_raw_env(&mut self, var: EnvVar) {
        self.env.entry(var.name.clone()).or_insert(var);
    }

    /// Patch the container named after the service. Existing entries are kept.
    fn apply(&self, deployment: &mut Deployment) -> Result<()> {
        let pod = deployment
            .spec
            .as_mut()
            .and_then(|s| s.template.spec.as_mut())
            .ok_or_else(|| missing_container(&self.service))?;
        let container = pod
            .containers
            .iter_mut()
            .find(|c| c.name == self.service)
            .ok_or_else(|| missing_container(&self.service))?;

        let env = container.env.get_or_insert_with(Vec::new);
        for var in self.env.values() {
            if !env.iter().any(|e| e.name == var.name) {
                env.push(var.clone());
            }
        }

        let mounts = container.volume_mounts.get_or_insert_with(Vec::new);
        for mount in self.mounts.values() {
            if !mounts
                .iter()
                .any(|m| m.name == mount.name || m.mount_path == mount.mount_path)
            {
                mounts.push(mount.clone());
            }
        }

        let volumes = pod.volumes.get_or_insert_with(Vec::new);
        for volume in self.volumes.values() {
            match volumes.iter_mut().find(|v| v.name == volume.name) {
                Some(existing) => merge_volume_items(existing, volume),
                None => volumes.push(volume.clone()),
            }
        }
        Ok(())
    }
}

fn merge_volume_items(existing: &mut Volume, desired: &Volume) {
    let (Some(current), Some(wanted)) = (existing.secret.as_mut(), desired.secret.as_ref()) else {
        return;
    };
    if current.secret_name != wanted.secret_name {
        return;
    }
    let items = current.items.get_or_insert_with(Vec::new);
    for item in wanted.items.iter().flatten() {
        if !items.iter().any(|i| i.key == item.key) {
            items.push(item.clone());
        }
    }
}

fn missing_container(service: &str) -> OperatorError {
    OperatorError::configuration(format!(
        "service {service} needs secrets materialised but its deployment has no container named {service}"
    ))
}

fn secret_env(name: &str, secret: &KubernetesSecretKey) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: None,
        value_from: Some(EnvVarSource {
            secret_key_ref: Some(SecretKeySelector {
                name: secret.name.clone(),
                key: secret.key.clone(),
                optional: None,
            }),
            ..EnvVarSource::default()
        }),
    }
}

#[derive(Debug, Default)]
pub struct SecretsTransformer {
    aws: BTreeMap<String, AwsCredentials>,
}

#[async_trait]
impl Transformer for SecretsTransformer {
    fn name(&self) -> &'static str {
        "secrets"
    }

    async fn transform_config(&mut self, svc: &mut SpinnakerService) -> Result<()> {
        let config = svc.config_mut();
        for location in AWS_LOCATIONS {
            let Some(root) = crate::props::get_mut(config, location.path) else {
                continue;
            };
            let blocks: Vec<&mut Value> = match location.kind {
                LocationKind::Object => vec![root],
                LocationKind::Accounts => match root {
                    Value::Array(items) => items.iter_mut().collect(),
                    _ => Vec::new(),
                },
                LocationKind::CanaryAccounts => match root {
                    Value::Array(integrations) => integrations
                        .iter_mut()
                        .filter(|i| i["name"].as_str() == Some("aws"))
                        .filter_map(|i| i.get_mut("accounts").and_then(Value::as_array_mut))
                        .flat_map(|a| a.iter_mut())
                        .collect(),
                    _ => Vec::new(),
                },
            };

            for block in blocks {
                if let Some(credentials) = extract_aws_credentials(block, location)? {
                    self.remember(location.service, credentials)?;
                }
            }
        }
        Ok(())
    }

    async fn transform_manifests(
        &mut self,
        _svc: &SpinnakerService,
        manifests: &mut GeneratedManifestSet,
    ) -> Result<()> {
        for (service, bundle) in manifests.iter_mut() {
            let mut materialization = Materialization::new(service);
            rewrite_secret_payloads(bundle, &mut materialization)?;

            if let Some(credentials) = self.aws.get(service.as_str()) {
                materialization.add_raw_env(access_key_env(&credentials.access_key));
                materialization.add_raw_env(secret_env(AWS_SECRET_ACCESS_KEY, &credentials.secret_key));
            }

            if materialization.is_empty() {
                continue;
            }
            let deployment = bundle
                .deployment
                .as_mut()
                .ok_or_else(|| missing_container(service))?;
            materialization.apply(deployment)?;
            info!(
                service = %service,
                env = materialization.env.len(),
                volumes = materialization.volumes.len(),
                "secrets materialised"
            );
        }
        Ok(())
    }
}

impl SecretsTransformer {
    fn remember(&mut self, service: &str, credentials: AwsCredentials) -> Result<()> {
        match self.aws.get(service) {
            Some(existing) if *existing != credentials => Err(OperatorError::configuration(format!(
                "conflicting AWS credentials configured for {service}"
            ))),
            Some(_) => Ok(()),
            None => {
                self.aws.insert(service.to_string(), credentials);
                Ok(())
            }
        }
    }
}

fn access_key_env(access_key: &AccessKey) -> EnvVar {
    match access_key {
        AccessKey::Plain(value) => EnvVar {
            name: AWS_ACCESS_KEY_ID.to_string(),
            value: Some(value.clone()),
            value_from: None,
        },
        AccessKey::Secret(secret) => secret_env(AWS_ACCESS_KEY_ID, secret),
    }
}

/// Swap a `k8s` secret key (and its paired access key) for env placeholders
fn extract_aws_credentials(block: &mut Value, location: &AwsLocation) -> Result<Option<AwsCredentials>> {
    let Some(Value::String(secret)) = block.get(location.secret_field) else {
        return Ok(None);
    };
    let Some((_, secret_key)) = parse_kubernetes_reference(secret)? else {
        return Ok(None);
    };

    let access_key = match block.get(location.access_field) {
        Some(Value::String(access)) if !access.is_empty() => match parse_kubernetes_reference(access)? {
            Some((_, key)) => AccessKey::Secret(key),
            None => AccessKey::Plain(access.clone()),
        },
        _ => {
            return Err(OperatorError::configuration(format!(
                "{}.{} is a secret reference but {} is not set",
                location.path, location.secret_field, location.access_field
            )))
        }
    };

    block[location.secret_field] = Value::String(format!("${{{AWS_SECRET_ACCESS_KEY}}}"));
    block[location.access_field] = Value::String(format!("${{{AWS_ACCESS_KEY_ID}}}"));
    debug!(path = location.path, service = location.service, "extracted AWS credentials");

    Ok(Some(AwsCredentials {
        access_key,
        secret_key,
    }))
}

fn rewrite_secret_payloads(bundle: &mut ServiceBundle, materialization: &mut Materialization) -> Result<()> {
    for secret in bundle.secrets_mut() {
        if let Some(data) = secret.data.as_mut() {
            for value in data.values_mut() {
                let Ok(text) = std::str::from_utf8(&value.0) else {
                    continue;
                };
                if let Some(rewritten) = rewrite_payload(text, materialization)? {
                    *value = ByteString(rewritten.into_bytes());
                }
            }
        }
        if let Some(string_data) = secret.string_data.as_mut() {
            for value in string_data.values_mut() {
                if let Some(rewritten) = rewrite_payload(value, materialization)? {
                    *value = rewritten;
                }
            }
        }
    }
    Ok(())
}

/// Rewrite references inside one payload; `None` when nothing changed
fn rewrite_payload(text: &str, materialization: &mut Materialization) -> Result<Option<String>> {
    if !text.contains("encrypted") || looks_like_json(text) {
        return Ok(None);
    }
    let Ok(mut doc) = serde_yaml::from_str::<serde_yaml::Value>(text) else {
        return Ok(None);
    };
    if !replace_references(&mut doc, materialization)? {
        return Ok(None);
    }
    Ok(Some(serde_yaml::to_string(&doc)?))
}

fn replace_references(node: &mut serde_yaml::Value, materialization: &mut Materialization) -> Result<bool> {
    match node {
        serde_yaml::Value::String(s) => {
            let Some((reference, key)) = parse_kubernetes_reference(s)? else {
                return Ok(false);
            };
            *s = if reference.is_file {
                materialization.add_file(&key)
            } else {
                materialization.add_env(&key)
            };
            Ok(true)
        }
        serde_yaml::Value::Mapping(map) => {
            let mut changed = false;
            for (_, v) in map.iter_mut() {
                changed |= replace_references(v, materialization)?;
            }
            Ok(changed)
        }
        serde_yaml::Value::Sequence(items) => {
            let mut changed = false;
            for v in items.iter_mut() {
                changed |= replace_references(v, materialization)?;
            }
            Ok(changed)
        }
        serde_yaml::Value::Tagged(tagged) => replace_references(&mut tagged.value, materialization),
        _ => Ok(false),
    }
}
