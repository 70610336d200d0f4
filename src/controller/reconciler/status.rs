//! Status patches for SpinnakerService.
//!
//! A successful pass writes the whole status, content hashes included. A failed pass
//! writes only phase, message and conditions so hashes of a configuration that was
//! never deployed are not persisted.

use crate::constants::{OPERATOR_NAME, STATUS_FAILURE};
use crate::crd::{SpinnakerService, SpinnakerServiceStatus};
use crate::error::{OperatorError, Result};
use kube::api::{Api, Patch, PatchParams};
use kube::Client;
use serde_json::{json, Value};
use tracing::debug;

pub const READY_CONDITION: &str = "Ready";

pub mod condition_reasons {
    pub const DEPLOYED: &str = "Deployed";
    pub const UP_TO_DATE: &str = "UpToDate";
    pub const ROLLING_OUT: &str = "RollingOut";
    pub const INVALID_CONFIGURATION: &str = "InvalidConfiguration";
    pub const RECONCILE_FAILED: &str = "ReconcileFailed";
}

/// Status body after a successful pass. An unset message is sent as `null` so the
/// merge patch clears one left by an earlier failure.
#[must_use]
pub fn success_patch(status: &SpinnakerServiceStatus) -> Value {
    let mut patch = json!({ "status": status });
    if status.message.is_none() {
        patch["status"]["message"] = Value::Null;
    }
    patch
}

/// Status body after a failed pass, built on top of the last known status
#[must_use]
pub fn failure_patch(
    current: Option<&SpinnakerServiceStatus>,
    generation: Option<i64>,
    error: &OperatorError,
) -> Value {
    let mut status = current.cloned().unwrap_or_default();
    let reason = if error.is_configuration() {
        condition_reasons::INVALID_CONFIGURATION
    } else {
        condition_reasons::RECONCILE_FAILED
    };
    let message = error.to_string();
    status.set_condition(READY_CONDITION, false, reason, &message);
    json!({
        "status": {
            "status": STATUS_FAILURE,
            "message": message,
            "conditions": status.conditions,
            "observedGeneration": generation,
        }
    })
}

pub async fn patch_status(client: &Client, svc: &SpinnakerService, patch: Value) -> Result<()> {
    let namespace = svc.namespace_or_default();
    let name = svc.name_or_unknown();
    let api: Api<SpinnakerService> = Api::namespaced(client.clone(), &namespace);
    api.patch_status(&name, &PatchParams::apply(OPERATOR_NAME), &Patch::Merge(patch))
        .await?;
    debug!(resource.name = %name, resource.namespace = %namespace, "status patched");
    Ok(())
}
