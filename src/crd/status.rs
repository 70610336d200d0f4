//! # SpinnakerService Status
//!
//! Status types for tracking deployment state, exposed URLs and the content hashes
//! that content-hash change detectors compare against.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Status of the SpinnakerService resource
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SpinnakerServiceStatus {
    /// Overall phase: Updating, OK, Failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Human-readable detail for the current phase
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Externally reachable API (gate) URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,
    /// Externally reachable UI (deck) URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ui_url: Option<String>,
    /// Spinnaker version last deployed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Content hashes of the last deployed configuration, keyed by logical key.
    /// The key names are stable: renaming one forces a redeploy of every resource.
    #[serde(default)]
    pub last_deployed: BTreeMap<String, HashStatus>,
    /// Per-service rollout state
    #[serde(default)]
    pub services: Vec<SpinnakerDeploymentStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_count: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ready_services: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HashStatus {
    pub hash: String,
    /// RFC3339 timestamp of the last time `hash` changed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SpinnakerDeploymentStatus {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default)]
    pub replicas: i32,
    #[serde(default)]
    pub ready_replicas: i32,
}

impl SpinnakerDeploymentStatus {
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.replicas > 0 && self.ready_replicas >= self.replicas
    }
}

/// Condition represents a condition of a resource
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition
    pub r#type: String,
    /// Status of the condition (True, False, Unknown)
    pub status: String,
    #[serde(default)]
    pub last_transition_time: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl SpinnakerServiceStatus {
    /// Stored hash for a key, if any
    #[must_use]
    pub fn hash(&self, key: &str) -> Option<&str> {
        self.last_deployed.get(key).map(|h| h.hash.as_str())
    }

    /// Record `hash` under `key`.
    ///
    /// Returns `true` when the stored state already matched (or nothing was stored yet,
    /// in which case the hash is inserted). Returns `false` and overwrites hash and
    /// timestamp together when the content changed.
    pub fn record_hash(&mut self, key: &str, hash: &str) -> bool {
        match self.last_deployed.get(key) {
            Some(existing) if existing.hash == hash => true,
            Some(_) => {
                self.last_deployed.insert(
                    key.to_string(),
                    HashStatus {
                        hash: hash.to_string(),
                        last_updated_at: Some(chrono::Utc::now().to_rfc3339()),
                    },
                );
                false
            }
            None => {
                self.last_deployed.insert(
                    key.to_string(),
                    HashStatus {
                        hash: hash.to_string(),
                        last_updated_at: Some(chrono::Utc::now().to_rfc3339()),
                    },
                );
                true
            }
        }
    }

    /// Replace or insert a condition, keeping the transition time when the status is unchanged
    pub fn set_condition(&mut self, r#type: &str, status: bool, reason: &str, message: &str) {
        let status = if status { "True" } else { "False" }.to_string();
        let now = chrono::Utc::now().to_rfc3339();
        match self.conditions.iter_mut().find(|c| c.r#type == r#type) {
            Some(existing) => {
                if existing.status != status {
                    existing.last_transition_time = Some(now);
                }
                existing.status = status;
                existing.reason = Some(reason.to_string());
                existing.message = Some(message.to_string());
            }
            None => self.conditions.push(Condition {
                r#type: r#type.to_string(),
                status,
                last_transition_time: Some(now),
                reason: Some(reason.to_string()),
                message: Some(message.to_string()),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_hash_is_inserted_and_counts_as_up_to_date() {
        let mut status = SpinnakerServiceStatus::default();
        assert!(status.record_hash("config", "abc"));
        assert_eq!(status.hash("config"), Some("abc"));
        assert!(status.last_deployed["config"].last_updated_at.is_some());
    }

    #[test]
    fn same_hash_keeps_timestamp() {
        let mut status = SpinnakerServiceStatus::default();
        status.last_deployed.insert(
            "config".to_string(),
            HashStatus {
                hash: "abc".to_string(),
                last_updated_at: Some("2024-01-01T00:00:00+00:00".to_string()),
            },
        );
        assert!(status.record_hash("config", "abc"));
        assert_eq!(
            status.last_deployed["config"].last_updated_at.as_deref(),
            Some("2024-01-01T00:00:00+00:00")
        );
    }

    #[test]
    fn different_hash_overwrites_hash_and_timestamp() {
        let mut status = SpinnakerServiceStatus::default();
        status.last_deployed.insert(
            "config".to_string(),
            HashStatus {
                hash: "abc".to_string(),
                last_updated_at: Some("2024-01-01T00:00:00+00:00".to_string()),
            },
        );
        assert!(!status.record_hash("config", "def"));
        assert_eq!(status.hash("config"), Some("def"));
        assert_ne!(
            status.last_deployed["config"].last_updated_at.as_deref(),
            Some("2024-01-01T00:00:00+00:00")
        );
    }

    #[test]
    fn condition_transition_time_only_moves_on_change() {
        let mut status = SpinnakerServiceStatus::default();
        status.set_condition("Ready", true, "Deployed", "ok");
        let first = status.conditions[0].last_transition_time.clone();
        status.set_condition("Ready", true, "Deployed", "still ok");
        assert_eq!(status.conditions[0].last_transition_time, first);
        assert_eq!(status.conditions[0].message.as_deref(), Some("still ok"));
        assert_eq!(status.conditions.len(), 1);
    }
}
