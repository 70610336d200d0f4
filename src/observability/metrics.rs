//! # Metrics
//!
//! Prometheus metrics for monitoring the operator.
//!
//! ## Metrics Exposed
//!
//! - `spinnaker_operator_reconciliations_total` - Total number of reconciliations
//! - `spinnaker_operator_reconciliation_errors_total` - Total number of reconciliation errors
//! - `spinnaker_operator_reconciliation_duration_seconds` - Duration of reconciliation operations
//! - `spinnaker_operator_deployments_total` - Reconciliations that regenerated and applied manifests
//! - `spinnaker_operator_drift_detected_total` - Drift reports, labelled by detector
//! - `spinnaker_operator_transformer_errors_total` - Pipeline failures, labelled by transformer
//! - `spinnaker_operator_objects_applied_total` - Kubernetes objects applied
//! - `spinnaker_operator_generator_duration_seconds` - Duration of manifest generation calls
//! - `spinnaker_operator_requeues_total` - Requeues, labelled by reason

use anyhow::Result;
use prometheus::{Histogram, IntCounter, IntCounterVec, Registry};
use std::sync::LazyLock;

pub(crate) static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static RECONCILIATIONS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "spinnaker_operator_reconciliations_total",
        "Total number of reconciliations",
    )
    .expect("Failed to create RECONCILIATIONS_TOTAL metric - this should never happen")
});

static RECONCILIATION_ERRORS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "spinnaker_operator_reconciliation_errors_total",
        "Total number of reconciliation errors",
    )
    .expect("Failed to create RECONCILIATION_ERRORS_TOTAL metric - this should never happen")
});

static RECONCILIATION_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "spinnaker_operator_reconciliation_duration_seconds",
            "Duration of reconciliation in seconds",
        )
        .buckets(vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0]),
    )
    .expect("Failed to create RECONCILIATION_DURATION metric - this should never happen")
});

static DEPLOYMENTS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "spinnaker_operator_deployments_total",
        "Total number of reconciliations that regenerated and applied manifests",
    )
    .expect("Failed to create DEPLOYMENTS_TOTAL metric - this should never happen")
});

static DRIFT_DETECTED_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "spinnaker_operator_drift_detected_total",
            "Total number of drift reports by change detector",
        ),
        &["detector"],
    )
    .expect("Failed to create DRIFT_DETECTED_TOTAL metric - this should never happen")
});

static TRANSFORMER_ERRORS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "spinnaker_operator_transformer_errors_total",
            "Total number of transformer failures by transformer",
        ),
        &["transformer"],
    )
    .expect("Failed to create TRANSFORMER_ERRORS_TOTAL metric - this should never happen")
});

static OBJECTS_APPLIED_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "spinnaker_operator_objects_applied_total",
        "Total number of Kubernetes objects applied",
    )
    .expect("Failed to create OBJECTS_APPLIED_TOTAL metric - this should never happen")
});

static GENERATOR_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "spinnaker_operator_generator_duration_seconds",
            "Duration of manifest generation calls in seconds",
        )
        .buckets(vec![0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0, 120.0]),
    )
    .expect("Failed to create GENERATOR_DURATION metric - this should never happen")
});

static REQUEUES_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "spinnaker_operator_requeues_total",
            "Total number of requeues by reason",
        ),
        &["reason"],
    )
    .expect("Failed to create REQUEUES_TOTAL metric - this should never happen")
});

pub fn register_metrics() -> Result<()> {
    REGISTRY.register(Box::new(RECONCILIATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_DURATION.clone()))?;
    REGISTRY.register(Box::new(DEPLOYMENTS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(DRIFT_DETECTED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(TRANSFORMER_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(OBJECTS_APPLIED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(GENERATOR_DURATION.clone()))?;
    REGISTRY.register(Box::new(REQUEUES_TOTAL.clone()))?;

    Ok(())
}

pub fn increment_reconciliations() {
    RECONCILIATIONS_TOTAL.inc();
}

pub fn increment_reconciliation_errors() {
    RECONCILIATION_ERRORS_TOTAL.inc();
}

pub fn observe_reconciliation_duration(duration: f64) {
    RECONCILIATION_DURATION.observe(duration);
}

pub fn increment_deployments() {
    DEPLOYMENTS_TOTAL.inc();
}

pub fn increment_drift_detected(detector: &str) {
    DRIFT_DETECTED_TOTAL.with_label_values(&[detector]).inc();
}

pub fn increment_transformer_errors(transformer: &str) {
    TRANSFORMER_ERRORS_TOTAL
        .with_label_values(&[transformer])
        .inc();
}

pub fn increment_objects_applied(count: usize) {
    OBJECTS_APPLIED_TOTAL.inc_by(count as u64);
}

pub fn observe_generator_duration(duration: f64) {
    GENERATOR_DURATION.observe(duration);
}

pub fn increment_requeues_total(reason: &str) {
    REQUEUES_TOTAL.with_label_values(&[reason]).inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labelled_counters_track_each_label() {
        increment_drift_detected("config");
        increment_drift_detected("config");
        increment_drift_detected("expose-service");
        assert!(DRIFT_DETECTED_TOTAL.with_label_values(&["config"]).get() >= 2);
        assert!(
            DRIFT_DETECTED_TOTAL
                .with_label_values(&["expose-service"])
                .get()
                >= 1
        );
    }
}
