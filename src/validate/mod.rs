//! # Account Validation
//!
//! Checks every declared provider account before a deployment. Each account is
//! validated in its own task and results come back over a channel; in fail-fast mode
//! the first failure aborts the remaining tasks.
//!
//! ## Module Structure
//!
//! - `mod.rs` - Account discovery and the parallel driver
//! - `accounts.rs` - Per-provider validators

mod accounts;

pub use accounts::{DockerRegistryAccountValidator, KubernetesAccountValidator};

use crate::error::{OperatorError, Result};
use crate::secrets::SecretResolver;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// An account declared under `providers.<provider>.accounts`
#[derive(Debug, Clone, PartialEq)]
pub struct Account {
    pub provider: String,
    pub name: String,
    pub settings: Value,
}

#[async_trait]
pub trait AccountValidator: Send + Sync {
    /// Provider key under `providers`
    fn provider(&self) -> &'static str;

    async fn validate(&self, account: &Account, secrets: &SecretResolver) -> Result<()>;
}

/// Accounts of every provider that is not explicitly disabled
#[must_use]
pub fn declared_accounts(config: &Value) -> Vec<Account> {
    let Some(Value::Object(providers)) = config.get("providers") else {
        return Vec::new();
    };
    let mut accounts = Vec::new();
    for (provider, block) in providers {
        if block.get("enabled").and_then(Value::as_bool) == Some(false) {
            continue;
        }
        for settings in block
            .get("accounts")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
        {
            let name = settings
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            accounts.push(Account {
                provider: provider.clone(),
                name,
                settings: settings.clone(),
            });
        }
    }
    accounts
}

/// Validators for the providers the operator knows how to check
#[must_use]
pub fn standard_validators() -> Vec<Arc<dyn AccountValidator>> {
    vec![
        Arc::new(KubernetesAccountValidator),
        Arc::new(DockerRegistryAccountValidator),
    ]
}

/// Validate all accounts concurrently.
///
/// Accounts without a validator are skipped. Invalid accounts are reported together
/// as one configuration error; any other failure is returned as-is.
pub async fn validate_accounts(
    accounts: Vec<Account>,
    validators: &[Arc<dyn AccountValidator>],
    secrets: Arc<SecretResolver>,
    fail_fast: bool,
) -> Result<()> {
    let by_provider: HashMap<&str, Arc<dyn AccountValidator>> = validators
        .iter()
        .map(|v| (v.provider(), Arc::clone(v)))
        .collect();

    let (tx, mut rx) = mpsc::channel::<(String, Result<()>)>(accounts.len().max(1));
    let mut tasks = JoinSet::new();
    for account in accounts {
        let Some(validator) = by_provider.get(account.provider.as_str()).cloned() else {
            debug!(provider = %account.provider, account = %account.name, "no validator for provider");
            continue;
        };
        let tx = tx.clone();
        let secrets = Arc::clone(&secrets);
        tasks.spawn(async move {
            let label = format!("{}/{}", account.provider, account.name);
            let result = validator.validate(&account, &secrets).await;
            // Receiver gone means the driver already gave up
            let _ = tx.send((label, result)).await;
        });
    }
    drop(tx);

    let mut invalid = Vec::new();
    while let Some((label, result)) = rx.recv().await {
        match result {
            Ok(()) => info!(account = %label, "account valid"),
            Err(e) if e.is_configuration() => {
                warn!(account = %label, error = %e, "account invalid");
                invalid.push(format!("{label}: {e}"));
                if fail_fast {
                    tasks.abort_all();
                    break;
                }
            }
            Err(e) => {
                tasks.abort_all();
                return Err(e);
            }
        }
    }
    while tasks.join_next().await.is_some() {}

    if invalid.is_empty() {
        Ok(())
    } else {
        Err(OperatorError::configuration(format!(
            "account validation failed: {}",
            invalid.join("; ")
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn disabled_providers_are_ignored() {
        let config = json!({"providers": {
            "kubernetes": {"enabled": true, "accounts": [{"name": "prod"}, {"name": "staging"}]},
            "dockerRegistry": {"enabled": false, "accounts": [{"name": "hub"}]},
            "aws": {"accounts": [{"name": "main"}]}
        }});
        let mut names: Vec<_> = declared_accounts(&config)
            .into_iter()
            .map(|a| format!("{}/{}", a.provider, a.name))
            .collect();
        names.sort();
        assert_eq!(names, vec!["aws/main", "kubernetes/prod", "kubernetes/staging"]);
    }

    struct Slow {
        fail: &'static str,
        finished: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl AccountValidator for Slow {
        fn provider(&self) -> &'static str {
            "kubernetes"
        }

        async fn validate(&self, account: &Account, _secrets: &SecretResolver) -> Result<()> {
            if account.name == self.fail {
                return Err(OperatorError::configuration("bad kubeconfig"));
            }
            tokio::time::sleep(Duration::from_secs(30)).await;
            self.finished.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn accounts(names: &[&str]) -> Vec<Account> {
        names
            .iter()
            .map(|n| Account {
                provider: "kubernetes".to_string(),
                name: (*n).to_string(),
                settings: json!({"name": n}),
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn fail_fast_aborts_remaining_tasks() {
        let finished = Arc::new(AtomicUsize::new(0));
        let validators: Vec<Arc<dyn AccountValidator>> = vec![Arc::new(Slow {
            fail: "broken",
            finished: finished.clone(),
        })];
        let secrets = Arc::new(SecretResolver::new(Duration::from_secs(1)));

        let err = validate_accounts(accounts(&["a", "broken", "b"]), &validators, secrets, true)
            .await
            .unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("kubernetes/broken"));
        assert_eq!(finished.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn without_fail_fast_every_account_runs() {
        let finished = Arc::new(AtomicUsize::new(0));
        let validators: Vec<Arc<dyn AccountValidator>> = vec![Arc::new(Slow {
            fail: "broken",
            finished: finished.clone(),
        })];
        let secrets = Arc::new(SecretResolver::new(Duration::from_secs(1)));

        let err = validate_accounts(accounts(&["a", "broken", "b"]), &validators, secrets, false)
            .await
            .unwrap_err();
        assert!(err.is_configuration());
        assert_eq!(finished.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn unknown_providers_are_skipped() {
        let secrets = Arc::new(SecretResolver::new(Duration::from_secs(1)));
        let accounts = vec![Account {
            provider: "cloudfoundry".to_string(),
            name: "cf".to_string(),
            settings: json!({}),
        }];
        validate_accounts(accounts, &standard_validators(), secrets, true)
            .await
            .unwrap();
    }
}
