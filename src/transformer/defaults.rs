//! Disables archaius polling in JVM service profiles unless the user decided otherwise.

use super::Transformer;
use crate::constants::JAVA_SERVICES;
use crate::crd::SpinnakerService;
use crate::error::{OperatorError, Result};
use async_trait::async_trait;
use serde_json::{Map, Value};

pub struct DefaultsTransformer;

#[async_trait]
impl Transformer for DefaultsTransformer {
    fn name(&self) -> &'static str {
        "defaults"
    }

    async fn transform_config(&mut self, svc: &mut SpinnakerService) -> Result<()> {
        for service in JAVA_SERVICES {
            let profile = svc.profile_mut(service);
            let Value::Object(profile) = profile else {
                return Err(OperatorError::configuration(format!(
                    "profile of {service} must be an object"
                )));
            };
            let archaius = profile
                .entry("archaius")
                .or_insert_with(|| Value::Object(Map::new()));
            if archaius.is_null() {
                *archaius = Value::Object(Map::new());
            }
            let Value::Object(archaius) = archaius else {
                return Err(OperatorError::configuration(format!(
                    "profiles.{service}.archaius must be an object"
                )));
            };
            archaius
                .entry("enabled")
                .or_insert(Value::Bool(false));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::SpinnakerServiceSpec;
    use serde_json::json;

    fn svc_with_profiles(profiles: Value) -> SpinnakerService {
        let spec: SpinnakerServiceSpec = serde_json::from_value(json!({
            "spinnakerConfig": {"profiles": profiles}
        }))
        .unwrap();
        let mut svc = SpinnakerService::new("spinnaker", spec);
        svc.ensure_initialized();
        svc
    }

    #[tokio::test]
    async fn sets_flag_only_when_absent() {
        let mut svc = svc_with_profiles(json!({
            "gate": {"archaius": {"enabled": true}},
            "orca": {"archaius": {"pollingIntervalMs": 100}}
        }));
        DefaultsTransformer.transform_config(&mut svc).await.unwrap();

        assert_eq!(svc.profile("gate").unwrap()["archaius"]["enabled"], json!(true));
        assert_eq!(svc.profile("orca").unwrap()["archaius"]["enabled"], json!(false));
        assert_eq!(
            svc.profile("orca").unwrap()["archaius"]["pollingIntervalMs"],
            json!(100)
        );
        assert_eq!(svc.profile("clouddriver").unwrap()["archaius"]["enabled"], json!(false));
        assert!(svc.profile("deck").is_none());
    }

    #[tokio::test]
    async fn is_idempotent() {
        let mut svc = svc_with_profiles(json!({"echo": {"spring": {"x": 1}}}));
        DefaultsTransformer.transform_config(&mut svc).await.unwrap();
        let once = svc.spec.spinnaker_config.profiles.clone();
        DefaultsTransformer.transform_config(&mut svc).await.unwrap();
        assert_eq!(svc.spec.spinnaker_config.profiles, once);
    }

    #[tokio::test]
    async fn non_object_archaius_is_a_configuration_error() {
        let mut svc = svc_with_profiles(json!({"fiat": {"archaius": "off"}}));
        let err = DefaultsTransformer.transform_config(&mut svc).await.unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("profiles.fiat.archaius"));
    }
}
