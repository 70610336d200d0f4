//! # Secret References
//!
//! Grammar of the opaque tokens users embed in configuration:
//!
//! ```text
//! encrypted:<engine>!<param>:<value>!<param>:<value>...
//! encryptedFile:<engine>!<param>:<value>...
//! ```
//!
//! `encrypted:` resolves to the secret value, `encryptedFile:` to a path of a file
//! holding it.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub const ENCRYPTED_PREFIX: &str = "encrypted:";
pub const ENCRYPTED_FILE_PREFIX: &str = "encryptedFile:";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReferenceError {
    #[error("'{0}' is not a secret reference")]
    NotAReference(String),
    #[error("secret reference has no engine")]
    MissingEngine,
    #[error("unknown secret engine '{0}'")]
    UnknownEngine(String),
    #[error("malformed secret reference parameter '{0}', expected <key>:<value>")]
    MalformedParameter(String),
    #[error("secret reference for engine '{engine}' is missing parameter '{param}'")]
    MissingParameter { engine: Engine, param: &'static str },
}

/// Secret backend a reference points at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Engine {
    Kubernetes,
    S3,
    Gcs,
    Vault,
    Noop,
    SecretsManager,
}

impl Engine {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Engine::Kubernetes => "k8s",
            Engine::S3 => "s3",
            Engine::Gcs => "gcs",
            Engine::Vault => "vault",
            Engine::Noop => "noop",
            Engine::SecretsManager => "secrets-manager",
        }
    }
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Engine {
    type Err = ReferenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "k8s" => Ok(Engine::Kubernetes),
            "s3" => Ok(Engine::S3),
            "gcs" => Ok(Engine::Gcs),
            "vault" => Ok(Engine::Vault),
            "noop" => Ok(Engine::Noop),
            "secrets-manager" => Ok(Engine::SecretsManager),
            other => Err(ReferenceError::UnknownEngine(other.to_string())),
        }
    }
}

/// A parsed secret reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretReference {
    pub engine: Engine,
    pub params: BTreeMap<String, String>,
    /// `encryptedFile:` references materialise as files
    pub is_file: bool,
}

/// Name and key of a Kubernetes Secret entry
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KubernetesSecretKey {
    pub name: String,
    pub key: String,
}

/// True when `value` carries either reference prefix
#[must_use]
pub fn is_reference(value: &str) -> bool {
    value.starts_with(ENCRYPTED_PREFIX) || value.starts_with(ENCRYPTED_FILE_PREFIX)
}

impl SecretReference {
    pub fn parse(value: &str) -> Result<Self, ReferenceError> {
        let (body, is_file) = if let Some(rest) = value.strip_prefix(ENCRYPTED_FILE_PREFIX) {
            (rest, true)
        } else if let Some(rest) = value.strip_prefix(ENCRYPTED_PREFIX) {
            (rest, false)
        } else {
            return Err(ReferenceError::NotAReference(value.to_string()));
        };

        let mut tokens = body.split('!');
        let engine = match tokens.next() {
            Some(e) if !e.is_empty() => e.parse::<Engine>()?,
            _ => return Err(ReferenceError::MissingEngine),
        };

        let mut params = BTreeMap::new();
        for token in tokens.filter(|t| !t.is_empty()) {
            let (k, v) = token
                .split_once(':')
                .ok_or_else(|| ReferenceError::MalformedParameter(token.to_string()))?;
            params.insert(k.to_string(), v.to_string());
        }

        Ok(Self {
            engine,
            params,
            is_file,
        })
    }

    #[must_use]
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    pub fn require(&self, key: &'static str) -> Result<&str, ReferenceError> {
        self.param(key).ok_or(ReferenceError::MissingParameter {
            engine: self.engine,
            param: key,
        })
    }

    /// Secret name (`n`) and key (`k`) of a `k8s` reference
    pub fn kubernetes_key(&self) -> Result<Option<KubernetesSecretKey>, ReferenceError> {
        if self.engine != Engine::Kubernetes {
            return Ok(None);
        }
        Ok(Some(KubernetesSecretKey {
            name: self.require("n")?.to_string(),
            key: self.require("k")?.to_string(),
        }))
    }
}

impl fmt::Display for SecretReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = if self.is_file {
            ENCRYPTED_FILE_PREFIX
        } else {
            ENCRYPTED_PREFIX
        };
        write!(f, "{prefix}{}", self.engine)?;
        for (k, v) in &self.params {
            write!(f, "!{k}:{v}")?;
        }
        Ok(())
    }
}

/// Engine token of a reference without parsing its parameters
fn engine_token(value: &str) -> Option<&str> {
    let body = value
        .strip_prefix(ENCRYPTED_FILE_PREFIX)
        .or_else(|| value.strip_prefix(ENCRYPTED_PREFIX))?;
    body.split('!').next()
}

/// Parse `value` as a `k8s` engine reference; other strings and engines yield `None`.
///
/// References to any other engine, known or not, are left for the decrypters and
/// their parameters are not inspected here.
pub fn parse_kubernetes_reference(
    value: &str,
) -> Result<Option<(SecretReference, KubernetesSecretKey)>, ReferenceError> {
    if engine_token(value) != Some(Engine::Kubernetes.as_str()) {
        return Ok(None);
    }
    let reference = SecretReference::parse(value)?;
    Ok(reference.kubernetes_key()?.map(|key| (reference, key)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_kubernetes_env_reference() {
        let r = SecretReference::parse("encrypted:k8s!n:mysecret!k:key1").unwrap();
        assert_eq!(r.engine, Engine::Kubernetes);
        assert!(!r.is_file);
        assert_eq!(
            r.kubernetes_key().unwrap(),
            Some(KubernetesSecretKey {
                name: "mysecret".to_string(),
                key: "key1".to_string()
            })
        );
    }

    #[test]
    fn parses_file_reference_and_keeps_colons_in_values() {
        let r = SecretReference::parse("encryptedFile:noop!v:https://example.com:8443").unwrap();
        assert!(r.is_file);
        assert_eq!(r.param("v"), Some("https://example.com:8443"));
    }

    #[test]
    fn rejects_bad_references() {
        assert_eq!(
            SecretReference::parse("plain"),
            Err(ReferenceError::NotAReference("plain".to_string()))
        );
        assert_eq!(
            SecretReference::parse("encrypted:"),
            Err(ReferenceError::MissingEngine)
        );
        assert!(matches!(
            SecretReference::parse("encrypted:azure!x:y"),
            Err(ReferenceError::UnknownEngine(_))
        ));
        assert!(matches!(
            SecretReference::parse("encrypted:k8s!nokey"),
            Err(ReferenceError::MalformedParameter(_))
        ));
        assert!(matches!(
            SecretReference::parse("encrypted:k8s!n:only-name")
                .unwrap()
                .kubernetes_key(),
            Err(ReferenceError::MissingParameter { param: "k", .. })
        ));
    }

    #[test]
    fn non_kubernetes_engines_are_not_materialised() {
        assert!(parse_kubernetes_reference("encrypted:s3!r:us-west-2!b:bucket!f:file")
            .unwrap()
            .is_none());
        assert!(parse_kubernetes_reference("not a reference")
            .unwrap()
            .is_none());
    }

    #[test]
    fn foreign_engines_are_skipped_before_parameter_parsing() {
        assert!(parse_kubernetes_reference("encrypted:azurekv!v:x")
            .unwrap()
            .is_none());
        assert!(parse_kubernetes_reference("encryptedFile:vault!no-colon")
            .unwrap()
            .is_none());
        assert!(matches!(
            parse_kubernetes_reference("encrypted:k8s!n:only-name"),
            Err(ReferenceError::MissingParameter { param: "k", .. })
        ));
    }

    #[test]
    fn display_round_trips_canonical_form() {
        let raw = "encryptedFile:k8s!k:kubeconfig!n:accounts";
        assert_eq!(SecretReference::parse(raw).unwrap().to_string(), raw);
    }
}
