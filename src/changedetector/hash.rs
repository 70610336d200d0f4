//! Content-hash detectors.
//!
//! A hash is SHA-256 over canonical JSON (object keys sorted) of a spec sub-tree and
//! is stored in `status.lastDeployed.<key>`. The first time a key is seen the hash is
//! recorded and the detector reports up to date; a mismatch overwrites the record and
//! reports drift.

use super::ChangeDetector;
use crate::constants::{CONFIG_HASH_KEY, KUSTOMIZE_HASH_KEY};
use crate::crd::SpinnakerService;
use crate::error::Result;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::debug;

/// Keys sorted at every level so equal trees hash equally
fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<_> = map.keys().collect();
            keys.sort();
            let mut out = serde_json::Map::new();
            for key in keys {
                out.insert(key.clone(), canonicalize(&map[key]));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// Hex SHA-256 of the canonical JSON form of `value`
pub fn content_hash<T: Serialize>(value: &T) -> Result<String> {
    let canonical = canonicalize(&serde_json::to_value(value)?);
    let bytes = serde_json::to_vec(&canonical)?;
    Ok(format!("{:x}", Sha256::digest(&bytes)))
}

fn record(svc: &mut SpinnakerService, key: &str, hash: &str) -> bool {
    let up_to_date = svc.status_mut().record_hash(key, hash);
    debug!(key, hash, up_to_date, "content hash checked");
    up_to_date
}

/// Everything in the spec except the kustomize patches
#[derive(Debug, Clone, Copy)]
pub struct ConfigHashDetector;

#[async_trait]
impl ChangeDetector for ConfigHashDetector {
    fn name(&self) -> &'static str {
        "config"
    }

    fn always_run(&self) -> bool {
        true
    }

    async fn is_up_to_date(&self, svc: &mut SpinnakerService) -> Result<bool> {
        let mut spec = serde_json::to_value(&svc.spec)?;
        if let Value::Object(map) = &mut spec {
            map.remove("kustomize");
        }
        let hash = content_hash(&spec)?;
        Ok(record(svc, CONFIG_HASH_KEY, &hash))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct KustomizeHashDetector;

#[async_trait]
impl ChangeDetector for KustomizeHashDetector {
    fn name(&self) -> &'static str {
        "kustomize"
    }

    fn always_run(&self) -> bool {
        true
    }

    async fn is_up_to_date(&self, svc: &mut SpinnakerService) -> Result<bool> {
        let hash = content_hash(&svc.spec.kustomize)?;
        Ok(record(svc, KUSTOMIZE_HASH_KEY, &hash))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::SpinnakerServiceSpec;
    use serde_json::json;

    fn svc(spec: Value) -> SpinnakerService {
        SpinnakerService::new("spinnaker", serde_json::from_value(spec).unwrap())
    }

    #[test]
    fn key_order_does_not_change_the_hash() {
        let a: Value = serde_json::from_str(r#"{"b": 1, "a": {"y": 2, "x": [3, {"q": 1, "p": 0}]}}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"a": {"x": [3, {"p": 0, "q": 1}], "y": 2}, "b": 1}"#).unwrap();
        assert_eq!(content_hash(&a).unwrap(), content_hash(&b).unwrap());
        assert_eq!(content_hash(&a).unwrap().len(), 64);
    }

    #[tokio::test]
    async fn first_run_records_and_reports_up_to_date() {
        let mut s = svc(json!({"spinnakerConfig": {"config": {"version": "1.33.0"}}}));
        assert!(ConfigHashDetector.is_up_to_date(&mut s).await.unwrap());
        assert!(s.status.as_ref().unwrap().hash(CONFIG_HASH_KEY).is_some());
        assert!(ConfigHashDetector.is_up_to_date(&mut s).await.unwrap());
    }

    #[tokio::test]
    async fn config_change_is_drift_and_overwrites_the_record() {
        let mut s = svc(json!({"spinnakerConfig": {"config": {"version": "1.33.0"}}}));
        ConfigHashDetector.is_up_to_date(&mut s).await.unwrap();
        let before = s.status.as_ref().unwrap().hash(CONFIG_HASH_KEY).unwrap().to_string();

        s.spec.spinnaker_config.config = json!({"version": "1.34.0"});
        assert!(!ConfigHashDetector.is_up_to_date(&mut s).await.unwrap());
        assert_ne!(s.status.as_ref().unwrap().hash(CONFIG_HASH_KEY).unwrap(), before);
        assert!(ConfigHashDetector.is_up_to_date(&mut s).await.unwrap());
    }

    #[tokio::test]
    async fn kustomize_changes_do_not_affect_the_config_hash() {
        let mut s = svc(json!({"spinnakerConfig": {"config": {"version": "1.33.0"}}}));
        ConfigHashDetector.is_up_to_date(&mut s).await.unwrap();
        KustomizeHashDetector.is_up_to_date(&mut s).await.unwrap();

        s.spec.kustomize = serde_json::from_value(json!({
            "gate": {"deployment": {"patches": ["spec: {replicas: 2}"]}}
        }))
        .unwrap();
        assert!(ConfigHashDetector.is_up_to_date(&mut s).await.unwrap());
        assert!(!KustomizeHashDetector.is_up_to_date(&mut s).await.unwrap());
    }

    #[test]
    fn default_spec_hashes_deterministically() {
        let spec = SpinnakerServiceSpec::default();
        assert_eq!(content_hash(&spec).unwrap(), content_hash(&spec.clone()).unwrap());
    }
}
