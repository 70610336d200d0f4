//! # Types
//!
//! Core types for the reconciler.

use super::apply::{KubeApplier, ManifestApplier};
use super::events::{EventPublisher, KubeEventPublisher};
use super::pass::PassDeps;
use crate::cluster::{ClusterReader, KubeClusterReader};
use crate::config::{ControllerConfig, SharedControllerConfig};
use crate::controller::backoff::FibonacciBackoff;
use crate::error::OperatorError;
use crate::generator::HttpGenerator;
use crate::validate::standard_validators;
use anyhow::Result;
use kube::Client;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum ReconcilerError {
    #[error(transparent)]
    Operator(#[from] OperatorError),

    #[error("Reconciliation failed: {0}")]
    ReconciliationFailed(#[from] anyhow::Error),
}

impl ReconcilerError {
    /// Invalid spec; retrying without a spec change cannot help
    #[must_use]
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Operator(e) if e.is_configuration())
    }
}

/// Why the next reconciliation of a resource is scheduled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerSource {
    /// Resource or owned object changed
    Watch,
    /// Periodic resync of a converged resource
    TimerBased,
    /// Services still rolling out after a deployment
    RolloutPending,
    /// Retry after a failed reconciliation (Fibonacci backoff)
    ErrorBackoff,
    /// Startup pass over resources that existed before the operator
    Startup,
}

impl TriggerSource {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerSource::Watch => "watch",
            TriggerSource::TimerBased => "timer-based",
            TriggerSource::RolloutPending => "rollout-pending",
            TriggerSource::ErrorBackoff => "error-backoff",
            TriggerSource::Startup => "startup",
        }
    }
}

/// Backoff state for a specific resource
#[derive(Debug, Clone)]
pub struct BackoffState {
    pub backoff: FibonacciBackoff,
    pub error_count: u32,
}

impl BackoffState {
    #[must_use]
    pub fn new(min_secs: u64, max_secs: u64) -> Self {
        Self {
            backoff: FibonacciBackoff::new(min_secs, max_secs),
            error_count: 0,
        }
    }

    pub fn increment_error(&mut self) {
        self.error_count += 1;
    }

    pub fn reset(&mut self) {
        self.error_count = 0;
        self.backoff.reset();
    }
}

/// Shared context handed to every reconciliation
#[derive(Clone)]
pub struct Reconciler {
    pub client: Client,
    /// Collaborators of one reconciliation pass
    pub deps: PassDeps,
    pub events: Arc<dyn EventPublisher>,
    // Keyed by namespace/name; driven from the error policy
    pub backoff_states: Arc<Mutex<HashMap<String, BackoffState>>>,
    pub backoff_min_secs: u64,
    pub backoff_max_secs: u64,
    pub config: SharedControllerConfig,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("deps", &self.deps)
            .field("backoff_min_secs", &self.backoff_min_secs)
            .field("backoff_max_secs", &self.backoff_max_secs)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    /// Wire the API-backed collaborators from the operator configuration
    pub async fn new(client: Client, config: SharedControllerConfig) -> Result<Self> {
        let settings: ControllerConfig = config.read().await.clone();

        let cluster: Arc<dyn ClusterReader> = Arc::new(KubeClusterReader::new(client.clone()));
        let generator = Arc::new(HttpGenerator::new(
            &settings.generator_url,
            settings.generator_timeout(),
        )?);
        let applier: Arc<dyn ManifestApplier> = Arc::new(KubeApplier::new(client.clone()));
        info!(generator = %generator.base_url(), "manifest generator configured");

        let deps = PassDeps {
            cluster,
            generator: generator.clone(),
            validator: generator,
            applier,
            account_validators: standard_validators(),
            default_expose_port: settings.default_expose_port,
            secret_backend_timeout: settings.secret_backend_timeout(),
            validation_enabled: settings.validation_enabled,
        };

        Ok(Self {
            events: Arc::new(KubeEventPublisher::new(client.clone())),
            client,
            deps,
            backoff_states: Arc::new(Mutex::new(HashMap::new())),
            backoff_min_secs: settings.backoff_min_secs,
            backoff_max_secs: settings.backoff_max_secs,
            config,
        })
    }

    /// Forget the error history of a resource after it reconciled cleanly
    pub fn reset_backoff(&self, resource_key: &str) {
        if let Ok(mut states) = self.backoff_states.lock() {
            if let Some(state) = states.get_mut(resource_key) {
                state.reset();
            }
        }
    }
}
