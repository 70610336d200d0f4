//! # Reconcile
//!
//! Controller entry point: runs one pass, persists status, publishes events and
//! decides when the resource is looked at again.

use super::events::{actions, reasons};
use super::pass::{run_pass, PassOutcome};
use super::status::{
    condition_reasons, failure_patch, patch_status, success_patch, READY_CONDITION,
};
use super::types::{Reconciler, ReconcilerError, TriggerSource};
use crate::crd::SpinnakerService;
use crate::error::OperatorError;
use crate::observability::metrics;
use kube::runtime::events::EventType;
use kube::Resource;
use kube_runtime::controller::Action;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn, Instrument};

pub async fn reconcile(
    svc: Arc<SpinnakerService>,
    ctx: Arc<Reconciler>,
    trigger: TriggerSource,
) -> Result<Action, ReconcilerError> {
    let name = svc.name_or_unknown();
    let namespace = svc.namespace_or_default();
    let span = tracing::info_span!(
        "controller.reconcile",
        resource.name = %name,
        resource.namespace = %namespace,
        trigger = trigger.as_str(),
        reconcile_id = %uuid::Uuid::new_v4(),
    );
    reconcile_inner(svc, ctx, format!("{namespace}/{name}"))
        .instrument(span)
        .await
}

async fn reconcile_inner(
    svc: Arc<SpinnakerService>,
    ctx: Arc<Reconciler>,
    resource_key: String,
) -> Result<Action, ReconcilerError> {
    metrics::increment_reconciliations();
    let start = Instant::now();
    let generation = svc.metadata.generation;

    let mut working = (*svc).clone();
    let result = run_pass(&mut working, &ctx.deps).await;
    metrics::observe_reconciliation_duration(start.elapsed().as_secs_f64());

    match result {
        Ok(outcome) => {
            let reason = match outcome {
                PassOutcome::Deployed { .. } => condition_reasons::DEPLOYED,
                PassOutcome::UpToDate { ready: true } => condition_reasons::UP_TO_DATE,
                PassOutcome::UpToDate { ready: false } => condition_reasons::ROLLING_OUT,
            };
            let status = working.status_mut();
            status.observed_generation = generation;
            status.set_condition(READY_CONDITION, outcome.is_ready(), reason, "");

            if working.status != svc.status {
                let patch = success_patch(working.status_mut());
                patch_status(&ctx.client, &svc, patch).await?;
            }
            if let PassOutcome::Deployed { objects, .. } = outcome {
                info!(objects, "deployment applied");
                ctx.events
                    .publish(
                        &svc.object_ref(&()),
                        EventType::Normal,
                        reasons::DEPLOYED,
                        actions::DEPLOY,
                        Some(format!("Applied {objects} objects")),
                    )
                    .await;
            }
            ctx.reset_backoff(&resource_key);

            let config = ctx.config.read().await;
            let (next, delay) = if outcome.is_ready() {
                (TriggerSource::TimerBased, config.converged_requeue_duration())
            } else {
                (TriggerSource::RolloutPending, config.rollout_requeue_duration())
            };
            drop(config);
            metrics::increment_requeues_total(next.as_str());
            Ok(Action::requeue(delay))
        }
        Err(e) if e.is_configuration() => {
            warn!(error = %e, "invalid configuration, waiting for a spec change");
            metrics::increment_reconciliation_errors();
            record_failure(&ctx, &svc, generation, &e, reasons::INVALID_CONFIGURATION).await;
            Ok(Action::await_change())
        }
        Err(e) => {
            error!(error = %e, "reconciliation failed");
            record_failure(&ctx, &svc, generation, &e, reasons::RECONCILE_FAILED).await;
            Err(e.into())
        }
    }
}

/// Best-effort status patch and Warning event for a failed pass
async fn record_failure(
    ctx: &Reconciler,
    svc: &SpinnakerService,
    generation: Option<i64>,
    error: &OperatorError,
    reason: &str,
) {
    let patch = failure_patch(svc.status.as_ref(), generation, error);
    if let Err(e) = patch_status(&ctx.client, svc, patch).await {
        warn!(error = %e, "failed to record failure in status");
    }
    ctx.events
        .publish(
            &svc.object_ref(&()),
            EventType::Warning,
            reason,
            actions::RECONCILE,
            Some(error.to_string()),
        )
        .await;
}
