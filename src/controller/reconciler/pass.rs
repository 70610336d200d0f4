//! One reconciliation pass over a SpinnakerService, independent of the Kubernetes
//! write path so it can be driven against in-memory collaborators.
//!
//! 1. ask the change detectors whether live state already matches
//! 2. run the config pass of the transformer pipeline
//! 3. validate accounts and configuration
//! 4. generate manifests, run the manifest pass, apply
//! 5. summarise the rollout into the status

use super::apply::ManifestApplier;
use crate::changedetector::Composite;
use crate::cluster::ClusterReader;
use crate::constants::{MANAGED_BY_LABEL, OPERATOR_NAME, STATUS_OK, STATUS_UPDATING};
use crate::crd::{SpinnakerDeploymentStatus, SpinnakerService};
use crate::error::Result;
use crate::expose::ExposeContext;
use crate::generated::GeneratedManifestSet;
use crate::generator::{check_findings, ConfigValidator, ManifestGenerator};
use crate::observability::metrics;
use crate::secrets::SecretResolver;
use crate::transformer::Pipeline;
use crate::validate::{declared_accounts, validate_accounts, AccountValidator};
use k8s_openapi::api::apps::v1::Deployment;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Collaborators and settings of a pass
#[derive(Clone)]
pub struct PassDeps {
    pub cluster: Arc<dyn ClusterReader>,
    pub generator: Arc<dyn ManifestGenerator>,
    pub validator: Arc<dyn ConfigValidator>,
    pub applier: Arc<dyn ManifestApplier>,
    pub account_validators: Vec<Arc<dyn AccountValidator>>,
    pub default_expose_port: i32,
    pub secret_backend_timeout: Duration,
    /// Operator-wide switch; resources can still opt out individually
    pub validation_enabled: bool,
}

impl std::fmt::Debug for PassDeps {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PassDeps")
            .field("account_validators", &self.account_validators.len())
            .field("default_expose_port", &self.default_expose_port)
            .field("secret_backend_timeout", &self.secret_backend_timeout)
            .field("validation_enabled", &self.validation_enabled)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassOutcome {
    /// Nothing to deploy
    UpToDate { ready: bool },
    /// Manifests were regenerated and applied
    Deployed { objects: usize, ready: bool },
}

impl PassOutcome {
    /// Every service reports all replicas ready
    #[must_use]
    pub fn is_ready(&self) -> bool {
        match self {
            Self::UpToDate { ready } | Self::Deployed { ready, .. } => *ready,
        }
    }
}

/// Run one pass, mutating `svc` (spec overlays and status) in place.
///
/// The caller persists `svc.status` only when this returns `Ok`.
pub async fn run_pass(svc: &mut SpinnakerService, deps: &PassDeps) -> Result<PassOutcome> {
    svc.ensure_initialized();
    let namespace = svc.namespace_or_default();
    let first_deploy = svc
        .status
        .as_ref()
        .is_none_or(|s| s.last_deployed.is_empty());
    let ctx = ExposeContext::new(Arc::clone(&deps.cluster), deps.default_expose_port);

    let detectors = Composite::standard(svc, &ctx);
    let up_to_date = detectors.is_up_to_date(svc).await?;
    if up_to_date && !first_deploy {
        debug!("live state matches the desired spec");
        let ready = refresh_rollout(svc, deps.cluster.as_ref(), &namespace, None).await?;
        return Ok(PassOutcome::UpToDate { ready });
    }
    if first_deploy {
        info!("no previous deployment recorded, deploying");
    }

    let mut pipeline = Pipeline::standard(svc, &ctx);
    pipeline.transform_config(svc).await?;

    if svc.spec.accounts.enabled {
        let accounts = declared_accounts(svc.config());
        debug!(accounts = accounts.len(), "validating accounts");
        let secrets = Arc::new(SecretResolver::with_defaults(
            Arc::clone(&deps.cluster),
            &namespace,
            deps.secret_backend_timeout,
        ));
        validate_accounts(
            accounts,
            &deps.account_validators,
            secrets,
            svc.spec.validation.fail_fast,
        )
        .await?;
    }

    if deps.validation_enabled && !svc.spec.validation.disabled {
        let validation = &svc.spec.validation;
        let findings = deps
            .validator
            .validate(svc, validation.fail_fast, &validation.skip_validators)
            .await?;
        check_findings(&findings)?;
    }

    let mut manifests = deps.generator.generate(svc).await?;
    pipeline.transform_manifests(svc, &mut manifests).await?;
    let objects = deps.applier.apply(&namespace, &manifests).await?;
    metrics::increment_deployments();
    info!(objects, services = manifests.services.len(), "manifests applied");

    let version = svc
        .config()
        .get("version")
        .and_then(Value::as_str)
        .map(str::to_string);
    if version.is_some() {
        svc.status_mut().version = version;
    }
    let names = deployment_names(&manifests);
    let ready = refresh_rollout(svc, deps.cluster.as_ref(), &namespace, Some(names)).await?;
    Ok(PassOutcome::Deployed { objects, ready })
}

fn deployment_names(manifests: &GeneratedManifestSet) -> Vec<String> {
    manifests
        .services
        .values()
        .filter_map(|b| b.deployment.as_ref()?.metadata.name.clone())
        .collect()
}

fn deployment_status(name: &str, live: Option<&Deployment>) -> SpinnakerDeploymentStatus {
    let Some(deployment) = live else {
        return SpinnakerDeploymentStatus {
            name: name.to_string(),
            image: None,
            replicas: 0,
            ready_replicas: 0,
        };
    };
    let image = deployment
        .spec
        .as_ref()
        .and_then(|s| s.template.spec.as_ref())
        .and_then(|s| s.containers.first())
        .and_then(|c| c.image.clone());
    SpinnakerDeploymentStatus {
        name: name.to_string(),
        image,
        replicas: deployment
            .spec
            .as_ref()
            .and_then(|s| s.replicas)
            .unwrap_or(1),
        ready_replicas: deployment
            .status
            .as_ref()
            .and_then(|s| s.ready_replicas)
            .unwrap_or(0),
    }
}

/// Summarise per-service readiness into the status. `expected` defaults to the
/// services recorded by the previous deployment.
async fn refresh_rollout(
    svc: &mut SpinnakerService,
    cluster: &dyn ClusterReader,
    namespace: &str,
    expected: Option<Vec<String>>,
) -> Result<bool> {
    let names = expected.unwrap_or_else(|| {
        svc.status
            .as_ref()
            .map(|s| s.services.iter().map(|d| d.name.clone()).collect())
            .unwrap_or_default()
    });
    let selector = format!("{MANAGED_BY_LABEL}={OPERATOR_NAME}");
    let live = cluster.list_deployments(namespace, &selector).await?;

    let mut services: Vec<SpinnakerDeploymentStatus> = names
        .iter()
        .map(|name| {
            let found = live
                .iter()
                .find(|d| d.metadata.name.as_deref() == Some(name.as_str()));
            deployment_status(name, found)
        })
        .collect();
    services.sort_by(|a, b| a.name.cmp(&b.name));

    let ready_count = services.iter().filter(|s| s.is_ready()).count();
    let ready = ready_count == services.len();
    let status = svc.status_mut();
    status.service_count = i32::try_from(services.len()).ok();
    status.ready_services = i32::try_from(ready_count).ok();
    status.services = services;
    status.status = Some(if ready { STATUS_OK } else { STATUS_UPDATING }.to_string());
    status.message = None;
    Ok(ready)
}
