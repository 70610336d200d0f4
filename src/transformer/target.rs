//! Pins the deployment location to the namespace of the resource.
//!
//! The namespace is not user-configurable: whatever the configuration says is
//! overwritten.

use super::Transformer;
use crate::crd::SpinnakerService;
use crate::error::Result;
use crate::generated::GeneratedManifestSet;
use crate::props;
use async_trait::async_trait;
use serde_json::Value;

pub const LOCATION_PATH: &str = "deploymentEnvironment.location";

pub struct TargetTransformer;

#[async_trait]
impl Transformer for TargetTransformer {
    fn name(&self) -> &'static str {
        "target"
    }

    async fn transform_config(&mut self, svc: &mut SpinnakerService) -> Result<()> {
        let namespace = svc.namespace_or_default();
        props::set(svc.config_mut(), LOCATION_PATH, Value::String(namespace))?;
        Ok(())
    }

    async fn transform_manifests(
        &mut self,
        svc: &SpinnakerService,
        manifests: &mut GeneratedManifestSet,
    ) -> Result<()> {
        let namespace = svc.namespace_or_default();
        for (_, bundle) in manifests.iter_mut() {
            for meta in bundle.metadata_mut() {
                meta.namespace = Some(namespace.clone());
            }
            for obj in &mut bundle.to_delete {
                obj.metadata.namespace = Some(namespace.clone());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::SpinnakerServiceSpec;
    use serde_json::json;

    fn svc_in(namespace: &str, config: Value) -> SpinnakerService {
        let mut svc = SpinnakerService::new("spinnaker", SpinnakerServiceSpec::default());
        svc.metadata.namespace = Some(namespace.to_string());
        svc.spec.spinnaker_config.config = config;
        svc
    }

    #[tokio::test]
    async fn user_location_is_overwritten() {
        let mut svc = svc_in("spin", json!({"deploymentEnvironment": {"location": "elsewhere"}}));
        let mut t = TargetTransformer;
        t.transform_config(&mut svc).await.unwrap();
        assert_eq!(props::get_str(svc.config(), LOCATION_PATH), Some("spin"));

        let once = svc.config().clone();
        t.transform_config(&mut svc).await.unwrap();
        assert_eq!(svc.config(), &once);
    }

    #[tokio::test]
    async fn generated_objects_land_in_the_resource_namespace() {
        let svc = svc_in("spin", json!({}));
        let mut manifests: GeneratedManifestSet = serde_json::from_value(json!({
            "gate": {
                "service": {"metadata": {"name": "spin-gate", "namespace": "default"}},
                "resources": [{"apiVersion": "v1", "kind": "Secret", "metadata": {"name": "s"}}],
                "toDelete": [{"apiVersion": "v1", "kind": "ConfigMap", "metadata": {"name": "old"}}]
            }
        }))
        .unwrap();

        TargetTransformer
            .transform_manifests(&svc, &mut manifests)
            .await
            .unwrap();
        let gate = manifests.get("gate").unwrap();
        assert_eq!(
            gate.service.as_ref().unwrap().metadata.namespace.as_deref(),
            Some("spin")
        );
        assert_eq!(gate.resources[0].metadata().namespace.as_deref(), Some("spin"));
        assert_eq!(gate.to_delete[0].metadata.namespace.as_deref(), Some("spin"));
    }
}
