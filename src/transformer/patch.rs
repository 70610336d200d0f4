//! Applies user-supplied merge patches (`spec.kustomize`) to generated objects.

use super::Transformer;
use crate::crd::{ObjectPatches, SpinnakerService};
use crate::error::{OperatorError, Result};
use crate::generated::GeneratedManifestSet;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

/// RFC 7386 JSON merge patch: `null` removes a key, objects merge recursively and
/// anything else replaces the target
pub fn merge_patch(target: &mut Value, patch: &Value) {
    let Value::Object(patch_map) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(serde_json::Map::new());
    }
    if let Value::Object(target_map) = target {
        for (key, value) in patch_map {
            if value.is_null() {
                target_map.remove(key);
            } else {
                merge_patch(target_map.entry(key.clone()).or_insert(Value::Null), value);
            }
        }
    }
}

fn apply_patches<T>(object: &mut T, patches: &ObjectPatches, what: &str) -> Result<()>
where
    T: Serialize + DeserializeOwned,
{
    let mut value = serde_json::to_value(&*object)?;
    for (i, raw) in patches.patches.iter().enumerate() {
        let patch: Value = serde_yaml::from_str(raw).map_err(|e| {
            OperatorError::configuration(format!("{what} patch #{i} is not valid YAML or JSON: {e}"))
        })?;
        merge_patch(&mut value, &patch);
    }
    *object = serde_json::from_value(value).map_err(|e| {
        OperatorError::configuration(format!("{what} patches produced an invalid object: {e}"))
    })?;
    Ok(())
}

pub struct PatchTransformer;

#[async_trait]
impl Transformer for PatchTransformer {
    fn name(&self) -> &'static str {
        "patch"
    }

    async fn transform_manifests(
        &mut self,
        svc: &SpinnakerService,
        manifests: &mut GeneratedManifestSet,
    ) -> Result<()> {
        for (service, kustomization) in &svc.spec.kustomize {
            let Some(bundle) = manifests.get_mut(service) else {
                warn!(service = %service, "kustomize entry names a service that was not generated, skipping");
                continue;
            };

            if let Some(patches) = kustomization.deployment.as_ref() {
                match bundle.deployment.as_mut() {
                    Some(deployment) => {
                        apply_patches(deployment, patches, &format!("{service} deployment"))?;
                    }
                    None => warn!(service = %service, "no deployment generated to patch"),
                }
            }
            if let Some(patches) = kustomization.service.as_ref() {
                match bundle.service.as_mut() {
                    Some(k8s_service) => {
                        apply_patches(k8s_service, patches, &format!("{service} service"))?;
                    }
                    None => warn!(service = %service, "no service generated to patch"),
                }
            }
            debug!(service = %service, "applied kustomize patches");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::SpinnakerServiceSpec;
    use serde_json::json;

    #[test]
    fn merge_patch_follows_rfc_7386() {
        let mut target = json!({"a": "b", "c": {"d": "e", "f": "g"}, "list": [1, 2]});
        merge_patch(
            &mut target,
            &json!({"a": "z", "c": {"f": null}, "list": [3], "new": {"x": 1}}),
        );
        assert_eq!(
            target,
            json!({"a": "z", "c": {"d": "e"}, "list": [3], "new": {"x": 1}})
        );
    }

    #[test]
    fn non_object_patch_replaces_target() {
        let mut target = json!({"a": 1});
        merge_patch(&mut target, &json!(["x"]));
        assert_eq!(target, json!(["x"]));
    }

    fn svc_with_kustomize(kustomize: Value) -> SpinnakerService {
        let spec: SpinnakerServiceSpec =
            serde_json::from_value(json!({ "kustomize": kustomize })).unwrap();
        SpinnakerService::new("spinnaker", spec)
    }

    fn gate_manifests() -> GeneratedManifestSet {
        serde_json::from_value(json!({
            "gate": {
                "deployment": {
                    "metadata": {"name": "spin-gate"},
                    "spec": {
                        "replicas": 1,
                        "selector": {},
                        "template": {"spec": {"containers": [{"name": "gate"}]}}
                    }
                },
                "service": {"metadata": {"name": "spin-gate"}, "spec": {"ports": [{"port": 8084}]}}
            }
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn patches_deployment_and_service() {
        let svc = svc_with_kustomize(json!({
            "gate": {
                "deployment": {"patches": ["spec:\n  replicas: 3\n"]},
                "service": {"patches": ["{\"metadata\": {\"labels\": {\"tier\": \"api\"}}}"]}
            },
            "kayenta": {"deployment": {"patches": ["spec: {replicas: 2}"]}}
        }));
        let mut m = gate_manifests();
        PatchTransformer.transform_manifests(&svc, &mut m).await.unwrap();

        let gate = m.get("gate").unwrap();
        assert_eq!(gate.deployment.as_ref().unwrap().spec.as_ref().unwrap().replicas, Some(3));
        assert_eq!(
            gate.service.as_ref().unwrap().metadata.labels.as_ref().unwrap()["tier"],
            "api"
        );
        assert!(m.get("kayenta").is_none());
    }

    #[tokio::test]
    async fn invalid_patch_is_a_configuration_error() {
        let svc = svc_with_kustomize(json!({
            "gate": {"deployment": {"patches": ["spec: [unclosed"]}}
        }));
        let mut m = gate_manifests();
        let err = PatchTransformer.transform_manifests(&svc, &mut m).await.unwrap_err();
        assert!(err.is_configuration());
    }

    #[tokio::test]
    async fn is_idempotent() {
        let svc = svc_with_kustomize(json!({
            "gate": {"deployment": {"patches": ["spec:\n  replicas: 3\n"]}}
        }));
        let mut m = gate_manifests();
        PatchTransformer.transform_manifests(&svc, &mut m).await.unwrap();
        let once = serde_json::to_value(&m).unwrap();
        PatchTransformer.transform_manifests(&svc, &mut m).await.unwrap();
        assert_eq!(serde_json::to_value(&m).unwrap(), once);
    }
}
