//! # Error Policy
//!
//! Error handling and backoff logic for the controller watch loop.

use crate::controller::reconciler::{BackoffState, Reconciler, ReconcilerError, TriggerSource};
use crate::crd::SpinnakerService;
use crate::observability::metrics;
use kube_runtime::controller::Action;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Requeue delay used when the backoff table cannot be locked
const FALLBACK_BACKOFF_SECS: u64 = 60;

/// Handle reconciliation errors with per-resource Fibonacci backoff.
///
/// Configuration errors wait for the next spec change instead; retrying the same
/// spec cannot succeed.
pub fn handle_reconciliation_error(
    obj: Arc<SpinnakerService>,
    error: &ReconcilerError,
    ctx: Arc<Reconciler>,
) -> Action {
    let name = obj.name_or_unknown();
    let namespace = obj.namespace_or_default();

    let error_span = tracing::span!(
        tracing::Level::ERROR,
        "controller.watch.reconciliation_error",
        resource.name = %name,
        resource.namespace = %namespace,
        error = %error
    );
    let _error_guard = error_span.enter();

    error!("Reconciliation error for {}/{}: {:?}", namespace, name, error);
    metrics::increment_reconciliation_errors();

    if error.is_configuration() {
        info!("Configuration error, waiting for a spec change before retrying");
        return Action::await_change();
    }

    let resource_key = format!("{namespace}/{name}");
    let (backoff_seconds, error_count) = match ctx.backoff_states.lock() {
        Ok(mut states) => {
            let state = states
                .entry(resource_key)
                .or_insert_with(|| BackoffState::new(ctx.backoff_min_secs, ctx.backoff_max_secs));
            state.increment_error();
            (state.backoff.next_backoff_seconds(), state.error_count)
        }
        Err(e) => {
            warn!("Failed to lock backoff_states: {}, using default backoff", e);
            (FALLBACK_BACKOFF_SECS, 0)
        }
    };

    let next_trigger_time =
        chrono::Utc::now() + chrono::Duration::seconds(i64::try_from(backoff_seconds).unwrap_or(i64::MAX));
    info!(
        "Retrying with Fibonacci backoff: {}s (error count: {}), next attempt at {}",
        backoff_seconds,
        error_count,
        next_trigger_time.to_rfc3339()
    );

    metrics::increment_requeues_total(TriggerSource::ErrorBackoff.as_str());
    Action::requeue(Duration::from_secs(backoff_seconds))
}

/// Classification of a controller stream error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchErrorKind {
    Unauthorized,
    Expired,
    Throttled,
    NotFound,
    Other,
}

#[must_use]
pub fn classify_watch_error(error_string: &str) -> WatchErrorKind {
    // 404 first: a plain-text 404 body surfaces as a serde error inside WatchFailed
    let is_not_found = error_string.contains("ObjectNotFound")
        || error_string.contains("404")
        || error_string.contains("not found");
    if (error_string.contains("401") || error_string.contains("Unauthorized")) && !is_not_found {
        WatchErrorKind::Unauthorized
    } else if error_string.contains("410")
        || error_string.contains("too old resource version")
        || error_string.contains("Expired")
        || error_string.contains("Gone")
    {
        WatchErrorKind::Expired
    } else if error_string.contains("429")
        || error_string.contains("storage is (re)initializing")
        || error_string.contains("TooManyRequests")
    {
        WatchErrorKind::Throttled
    } else if is_not_found {
        WatchErrorKind::NotFound
    } else {
        WatchErrorKind::Other
    }
}

/// Handle a controller stream error.
///
/// Returns `None` to drop the error from the stream or `Some(())` to keep it.
pub async fn handle_watch_stream_error(
    error_string: &str,
    watch_restart_delay: Duration,
) -> Option<()> {
    let error_span = tracing::span!(
        tracing::Level::WARN,
        "controller.watch.error",
        error = %error_string
    );
    let _error_guard = error_span.enter();

    match classify_watch_error(error_string) {
        WatchErrorKind::Unauthorized => {
            error!("Watch authentication failed (401 Unauthorized), RBAC may have been revoked or the token expired");
            error!("   Check: kubectl auth can-i list spinnakerservices --as=system:serviceaccount:<namespace>:spinnaker-operator");
            warn!("Waiting {:?} before retrying watch", watch_restart_delay);
            tokio::time::sleep(watch_restart_delay).await;
            None
        }
        WatchErrorKind::Expired => {
            warn!(error_type = "410", "watch.error.resource_version_expired");
            None
        }
        WatchErrorKind::Throttled => {
            warn!("API server throttling (429), backing off for {:?}", watch_restart_delay);
            tokio::time::sleep(watch_restart_delay).await;
            None
        }
        WatchErrorKind::NotFound => {
            warn!(
                "Resource not found (404), normal when a resource was deleted or the CRD is missing: {}",
                error_string
            );
            Some(())
        }
        WatchErrorKind::Other => {
            error!("Controller stream error: {}", error_string);
            tokio::time::sleep(watch_restart_delay).await;
            None
        }
    }
}
