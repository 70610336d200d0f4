//! Folds the global `service-settings.spinnaker` block into every service's settings.
//!
//! Service-specific keys win over global ones. The UI is excluded since it is not a
//! JVM service and does not understand the shared settings.

use super::Transformer;
use crate::constants::{ALL_SERVICES, GLOBAL_SETTINGS_EXCLUDED_SERVICE, GLOBAL_SETTINGS_KEY};
use crate::crd::SpinnakerService;
use crate::error::{OperatorError, Result};
use crate::props;
use async_trait::async_trait;
use serde_json::{Map, Value};

pub struct SpinSvcSettingsTransformer;

#[async_trait]
impl Transformer for SpinSvcSettingsTransformer {
    fn name(&self) -> &'static str {
        "spin-svc-settings"
    }

    async fn transform_config(&mut self, svc: &mut SpinnakerService) -> Result<()> {
        let settings = &mut svc.spec.spinnaker_config.service_settings;
        let global = match settings.get(GLOBAL_SETTINGS_KEY) {
            None | Some(Value::Null) => return Ok(()),
            Some(Value::Object(m)) if m.is_empty() => return Ok(()),
            Some(v @ Value::Object(_)) => v.clone(),
            Some(_) => {
                return Err(OperatorError::configuration(format!(
                    "service-settings.{GLOBAL_SETTINGS_KEY} must be an object"
                )))
            }
        };

        for service in ALL_SERVICES
            .iter()
            .filter(|s| **s != GLOBAL_SETTINGS_EXCLUDED_SERVICE)
        {
            let entry = settings
                .entry((*service).to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if entry.is_null() {
                *entry = Value::Object(Map::new());
            }
            if !entry.is_object() {
                return Err(OperatorError::configuration(format!(
                    "service-settings.{service} must be an object"
                )));
            }
            let mut merged = global.clone();
            props::deep_merge(&mut merged, entry);
            *entry = merged;
        }
        Ok(())
    }
}
