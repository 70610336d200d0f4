//! Makes the SpinnakerService the controller owner of everything it generates and
//! stamps the managed-by label.

use super::Transformer;
use crate::constants::{MANAGED_BY_LABEL, OPERATOR_NAME};
use crate::crd::SpinnakerService;
use crate::error::{OperatorError, Result};
use crate::generated::GeneratedManifestSet;
use async_trait::async_trait;
use kube::Resource;

pub struct OwnerTransformer;

#[async_trait]
impl Transformer for OwnerTransformer {
    fn name(&self) -> &'static str {
        "owner"
    }

    async fn transform_manifests(
        &mut self,
        svc: &SpinnakerService,
        manifests: &mut GeneratedManifestSet,
    ) -> Result<()> {
        let owner = svc.controller_owner_ref(&()).ok_or_else(|| {
            OperatorError::configuration(format!(
                "{} has no uid, cannot own generated objects",
                svc.name_or_unknown()
            ))
        })?;

        for (_, bundle) in manifests.iter_mut() {
            for meta in bundle.metadata_mut() {
                let refs = meta.owner_references.get_or_insert_with(Vec::new);
                match refs.iter_mut().find(|r| r.uid == owner.uid) {
                    Some(existing) => *existing = owner.clone(),
                    None => refs.push(owner.clone()),
                }
                meta.labels
                    .get_or_insert_with(Default::default)
                    .insert(MANAGED_BY_LABEL.to_string(), OPERATOR_NAME.to_string());
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

    fn owned_svc() -> SpinnakerService {
        let mut svc = SpinnakerService::new("spinnaker", SpinnakerServiceSpec::default());
        svc.metadata.namespace = Some("spin".to_string());
        svc.metadata.uid = Some("1234-abcd".to_string());
        svc
    }

    fn manifests() -> GeneratedManifestSet {
        serde_json::from_value(json!({
            "gate": {
                "service": {"metadata": {"name": "spin-gate", "labels": {"app": "spin"}}},
                "resources": [{"apiVersion": "v1", "kind": "Secret", "metadata": {"name": "spin-gate-files"}}]
            }
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn owner_and_label_are_set_once() {
        let svc = owned_svc();
        let mut m = manifests();
        OwnerTransformer.transform_manifests(&svc, &mut m).await.unwrap();
        OwnerTransformer.transform_manifests(&svc, &mut m).await.unwrap();

        let gate = m.get("gate").unwrap();
        let meta = &gate.service.as_ref().unwrap().metadata;
        let refs = meta.owner_references.as_ref().unwrap();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].uid, "1234-abcd");
        assert_eq!(refs[0].kind, "SpinnakerService");
        assert_eq!(refs[0].controller, Some(true));
        let labels = meta.labels.as_ref().unwrap();
        assert_eq!(labels["app"], "spin");
        assert_eq!(labels[MANAGED_BY_LABEL], OPERATOR_NAME);
        assert_eq!(gate.resources[0].metadata().owner_references.as_ref().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn missing_uid_is_rejected() {
        let mut svc = owned_svc();
        svc.metadata.uid = None;
        let err = OwnerTransformer
            .transform_manifests(&svc, &mut manifests())
            .await
            .unwrap_err();
        assert!(err.is_configuration());
    }
}
