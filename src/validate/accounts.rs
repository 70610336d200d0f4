//! Per-provider account validators.
//!
//! These only check what can be checked locally: required fields, secret references
//! that must resolve, and kubeconfig contexts. No provider API is called.

use super::{Account, AccountValidator};
use crate::error::{OperatorError, Result};
use crate::secrets::SecretResolver;
use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

fn field<'a>(account: &'a Account, key: &str) -> Option<&'a str> {
    account
        .settings
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

fn invalid(account: &Account, msg: impl std::fmt::Display) -> OperatorError {
    OperatorError::configuration(format!("account '{}': {msg}", account.name))
}

/// Kubernetes accounts need a kubeconfig (file or inline) or must run in-cluster
#[derive(Debug, Clone, Copy)]
pub struct KubernetesAccountValidator;

impl KubernetesAccountValidator {
    async fn kubeconfig(&self, account: &Account, secrets: &SecretResolver) -> Result<Option<String>> {
        if let Some(contents) = field(account, "kubeconfigContents") {
            let resolved = secrets.resolve_if_reference(contents).await?;
            return Ok(Some(resolved.to_string()));
        }
        if let Some(file) = field(account, "kubeconfigFile") {
            let path = secrets.resolve_if_reference(file).await?;
            let contents = tokio::fs::read_to_string(path.as_str())
                .await
                .map_err(|e| invalid(account, format!("cannot read kubeconfig {}: {e}", path.as_str())))?;
            return Ok(Some(contents));
        }
        Ok(None)
    }
}

#[async_trait]
impl AccountValidator for KubernetesAccountValidator {
    fn provider(&self) -> &'static str {
        "kubernetes"
    }

    async fn validate(&self, account: &Account, secrets: &SecretResolver) -> Result<()> {
        if account.name.is_empty() {
            return Err(invalid(account, "name is required"));
        }
        let in_cluster = account
            .settings
            .get("serviceAccount")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        let Some(kubeconfig) = self.kubeconfig(account, secrets).await? else {
            if in_cluster {
                return Ok(());
            }
            return Err(invalid(
                account,
                "one of kubeconfigFile, kubeconfigContents or serviceAccount is required",
            ));
        };

        let doc: Value = serde_yaml::from_str(&kubeconfig)
            .map_err(|e| invalid(account, format!("kubeconfig is not valid YAML: {e}")))?;
        let contexts: Vec<&str> = doc
            .get("contexts")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(|c| c.get("name").and_then(Value::as_str))
            .collect();
        let context = field(account, "context").or_else(|| doc.get("current-context").and_then(Value::as_str));
        match context {
            Some(ctx) if contexts.contains(&ctx) => {
                debug!(account = %account.name, context = ctx, "kubeconfig context found");
                Ok(())
            }
            Some(ctx) => Err(invalid(account, format!("context '{ctx}' not found in kubeconfig"))),
            None => Err(invalid(account, "no context selected and kubeconfig has no current-context")),
        }
    }
}

/// Docker registry accounts need an address; credentials, when referenced, must resolve
#[derive(Debug, Clone, Copy)]
pub struct DockerRegistryAccountValidator;

#[async_trait]
impl AccountValidator for DockerRegistryAccountValidator {
    fn provider(&self) -> &'static str {
        "dockerRegistry"
    }

    async fn validate(&self, account: &Account, secrets: &SecretResolver) -> Result<()> {
        if account.name.is_empty() {
            return Err(invalid(account, "name is required"));
        }
        if field(account, "address").is_none() {
            return Err(invalid(account, "address is required"));
        }
        let has_password = field(account, "password").is_some() || field(account, "passwordFile").is_some();
        if has_password && field(account, "username").is_none() {
            return Err(invalid(account, "username is required when a password is set"));
        }
        for key in ["password", "passwordFile"] {
            if let Some(value) = field(account, key) {
                secrets.resolve_if_reference(value).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secrets::resolver::NoopDecrypter;
    use crate::secrets::{Decrypter, Engine, SecretReference};
    use zeroize::Zeroizing;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    const KUBECONFIG: &str = "apiVersion: v1\nkind: Config\ncurrent-context: prod\ncontexts:\n- name: prod\n  context: {cluster: prod}\n";

    fn resolver() -> SecretResolver {
        SecretResolver::new(Duration::from_secs(1)).register(Arc::new(NoopDecrypter))
    }

    fn account(provider: &str, settings: Value) -> Account {
        Account {
            provider: provider.to_string(),
            name: settings["name"].as_str().unwrap_or_default().to_string(),
            settings,
        }
    }

    #[tokio::test]
    async fn inline_kubeconfig_with_known_context_is_valid() {
        let a = account("kubernetes", json!({"name": "prod", "kubeconfigContents": KUBECONFIG}));
        KubernetesAccountValidator.validate(&a, &resolver()).await.unwrap();
    }

    struct StaticKubeconfig;

    #[async_trait]
    impl Decrypter for StaticKubeconfig {
        fn engine(&self) -> Engine {
            Engine::Vault
        }

        async fn decrypt(&self, _reference: &SecretReference) -> Result<Zeroizing<String>> {
            Ok(Zeroizing::new(KUBECONFIG.to_string()))
        }
    }

    #[tokio::test]
    async fn file_reference_is_resolved_and_read() {
        let secrets = resolver().register(Arc::new(StaticKubeconfig));
        let a = account(
            "kubernetes",
            json!({"name": "prod", "kubeconfigFile": "encryptedFile:vault!p:kube/prod", "context": "prod"}),
        );
        KubernetesAccountValidator.validate(&a, &secrets).await.unwrap();
    }

    #[tokio::test]
    async fn unknown_context_is_rejected() {
        let a = account(
            "kubernetes",
            json!({"name": "prod", "kubeconfigContents": KUBECONFIG, "context": "staging"}),
        );
        let err = KubernetesAccountValidator.validate(&a, &resolver()).await.unwrap_err();
        assert!(err.to_string().contains("staging"));
    }

    #[tokio::test]
    async fn in_cluster_account_needs_no_kubeconfig() {
        let ok = account("kubernetes", json!({"name": "local", "serviceAccount": true}));
        KubernetesAccountValidator.validate(&ok, &resolver()).await.unwrap();

        let missing = account("kubernetes", json!({"name": "nothing"}));
        assert!(KubernetesAccountValidator
            .validate(&missing, &resolver())
            .await
            .unwrap_err()
            .is_configuration());
    }

    #[tokio::test]
    async fn docker_registry_requires_address_and_username() {
        let no_address = account("dockerRegistry", json!({"name": "hub"}));
        assert!(DockerRegistryAccountValidator
            .validate(&no_address, &resolver())
            .await
            .is_err());

        let no_user = account(
            "dockerRegistry",
            json!({"name": "hub", "address": "index.docker.io", "password": "encrypted:noop!v:pw"}),
        );
        assert!(DockerRegistryAccountValidator
            .validate(&no_user, &resolver())
            .await
            .is_err());

        let ok = account(
            "dockerRegistry",
            json!({"name": "hub", "address": "index.docker.io", "username": "me", "password": "encrypted:noop!v:pw"}),
        );
        DockerRegistryAccountValidator.validate(&ok, &resolver()).await.unwrap();
    }

    #[tokio::test]
    async fn unresolvable_password_fails() {
        let a = account(
            "dockerRegistry",
            json!({"name": "hub", "address": "index.docker.io", "username": "me", "password": "encrypted:vault!p:x"}),
        );
        let err = DockerRegistryAccountValidator.validate(&a, &resolver()).await.unwrap_err();
        assert!(err.to_string().contains("no decrypter registered"));
    }
}
