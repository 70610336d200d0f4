//! # Secret Resolver
//!
//! Resolves secret references to plaintext (or to a path of a temp file holding the
//! plaintext) through pluggable decrypters.
//!
//! A resolver lives for exactly one reconciliation. Resolved values are cached in
//! zeroizing buffers so a reference resolved twice costs one backend round-trip.
//! Each reference has its own cell, so concurrent lookups of different references
//! never wait on each other. The temp directory backing `encryptedFile:` references is removed when the
//! resolver is dropped, on success and error paths alike.

use super::reference::{Engine, SecretReference};
use crate::cluster::ClusterReader;
use crate::error::{OperatorError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::{Mutex, OnceCell};
use tracing::debug;
use zeroize::Zeroizing;

/// Backend able to turn a reference into plaintext
#[async_trait]
pub trait Decrypter: Send + Sync {
    fn engine(&self) -> Engine;

    /// Whether the resolved value is handed out as a file path. Follows the
    /// `encryptedFile:` prefix unless the backend always produces files.
    fn is_file(&self, reference: &SecretReference) -> bool {
        reference.is_file
    }

    async fn decrypt(&self, reference: &SecretReference) -> Result<Zeroizing<String>>;
}

/// Resolution scope for one reconciliation
pub struct SecretResolver {
    decrypters: HashMap<Engine, Arc<dyn Decrypter>>,
    cache: Mutex<HashMap<String, Arc<OnceCell<Zeroizing<String>>>>>,
    temp_dir: Mutex<Option<TempDir>>,
    timeout: Duration,
}

impl std::fmt::Debug for SecretResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretResolver")
            .field("engines", &self.decrypters.keys().collect::<Vec<_>>())
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl SecretResolver {
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            decrypters: HashMap::new(),
            cache: Mutex::new(HashMap::new()),
            temp_dir: Mutex::new(None),
            timeout,
        }
    }

    /// Resolver with the built-in decrypters wired to `cluster`
    pub fn with_defaults(cluster: Arc<dyn ClusterReader>, namespace: &str, timeout: Duration) -> Self {
        Self::new(timeout)
            .register(Arc::new(KubernetesDecrypter::new(cluster, namespace)))
            .register(Arc::new(NoopDecrypter))
            .register(Arc::new(SecretsManagerDecrypter))
    }

    #[must_use]
    pub fn register(mut self, decrypter: Arc<dyn Decrypter>) -> Self {
        self.decrypters.insert(decrypter.engine(), decrypter);
        self
    }

    /// Resolve a reference string.
    ///
    /// Returns the plaintext for `encrypted:` references and the absolute path of a
    /// file holding the plaintext for `encryptedFile:` references.
    pub async fn resolve(&self, raw: &str) -> Result<Zeroizing<String>> {
        let cell = {
            let mut cache = self.cache.lock().await;
            Arc::clone(cache.entry(raw.to_string()).or_default())
        };
        // A failed lookup leaves the cell empty so a later call retries
        let resolved = cell.get_or_try_init(|| self.fetch(raw)).await?;
        Ok(resolved.clone())
    }

    async fn fetch(&self, raw: &str) -> Result<Zeroizing<String>> {
        let reference = SecretReference::parse(raw)?;
        let decrypter = self.decrypters.get(&reference.engine).ok_or_else(|| {
            OperatorError::secret_backend(format!(
                "no decrypter registered for engine '{}'",
                reference.engine
            ))
        })?;

        let is_file = decrypter.is_file(&reference);
        debug!(engine = %reference.engine, file = is_file, "resolving secret reference");
        let plaintext = tokio::time::timeout(self.timeout, decrypter.decrypt(&reference))
            .await
            .map_err(|_| {
                OperatorError::Timeout(format!(
                    "secret engine '{}' did not answer within {:?}",
                    reference.engine, self.timeout
                ))
            })??;

        if is_file {
            Ok(Zeroizing::new(self.write_temp_file(&plaintext).await?))
        } else {
            Ok(plaintext)
        }
    }

    /// Resolve when `value` is a reference, otherwise hand it back unchanged
    pub async fn resolve_if_reference(&self, value: &str) -> Result<Zeroizing<String>> {
        if super::reference::is_reference(value) {
            self.resolve(value).await
        } else {
            Ok(Zeroizing::new(value.to_string()))
        }
    }

    async fn write_temp_file(&self, contents: &str) -> Result<String> {
        let mut guard = self.temp_dir.lock().await;
        if guard.is_none() {
            let dir = tempfile::Builder::new()
                .prefix("spinnaker-secrets-")
                .tempdir()
                .map_err(|e| OperatorError::secret_backend(format!("cannot create temp dir: {e}")))?;
            *guard = Some(dir);
        }
        let dir = guard
            .as_ref()
            .ok_or_else(|| OperatorError::secret_backend("temp dir unavailable"))?;
        let path: PathBuf = dir.path().join(uuid::Uuid::new_v4().to_string());
        tokio::fs::write(&path, contents.as_bytes())
            .await
            .map_err(|e| OperatorError::secret_backend(format!("cannot write secret file: {e}")))?;
        Ok(path.to_string_lossy().into_owned())
    }

    /// Temp directory currently backing file references, if one was created
    pub async fn temp_dir_path(&self) -> Option<PathBuf> {
        self.temp_dir
            .lock()
            .await
            .as_ref()
            .map(|d| d.path().to_path_buf())
    }
}

/// `k8s!n:<name>!k:<key>`, read from a Secret in the resource namespace
pub struct KubernetesDecrypter {
    cluster: Arc<dyn ClusterReader>,
    namespace: String,
}

impl KubernetesDecrypter {
    pub fn new(cluster: Arc<dyn ClusterReader>, namespace: &str) -> Self {
        Self {
            cluster,
            namespace: namespace.to_string(),
        }
    }
}

#[async_trait]
impl Decrypter for KubernetesDecrypter {
    fn engine(&self) -> Engine {
        Engine::Kubernetes
    }

    async fn decrypt(&self, reference: &SecretReference) -> Result<Zeroizing<String>> {
        let name = reference.require("n")?;
        let key = reference.require("k")?;
        let secret = self
            .cluster
            .get_secret(&self.namespace, name)
            .await?
            .ok_or_else(|| {
                OperatorError::secret_backend(format!(
                    "secret {}/{} not found",
                    self.namespace, name
                ))
            })?;

        if let Some(bytes) = secret.data.as_ref().and_then(|d| d.get(key)) {
            let text = String::from_utf8(bytes.0.clone()).map_err(|_| {
                OperatorError::secret_backend(format!("secret {name} key {key} is not UTF-8"))
            })?;
            return Ok(Zeroizing::new(text));
        }
        if let Some(text) = secret.string_data.as_ref().and_then(|d| d.get(key)) {
            return Ok(Zeroizing::new(text.clone()));
        }
        Err(OperatorError::secret_backend(format!(
            "secret {name} has no key {key}"
        )))
    }
}

/// `noop!v:<value>`, the value is the plaintext
pub struct NoopDecrypter;

#[async_trait]
impl Decrypter for NoopDecrypter {
    fn engine(&self) -> Engine {
        Engine::Noop
    }

    async fn decrypt(&self, reference: &SecretReference) -> Result<Zeroizing<String>> {
        Ok(Zeroizing::new(reference.require("v")?.to_string()))
    }
}

/// `secrets-manager!r:<region>!s:<secret id>[!k:<json key>]`
pub struct SecretsManagerDecrypter;

#[async_trait]
impl Decrypter for SecretsManagerDecrypter {
    fn engine(&self) -> Engine {
        Engine::SecretsManager
    }

    async fn decrypt(&self, reference: &SecretReference) -> Result<Zeroizing<String>> {
        let region = reference.require("r")?;
        let secret_id = reference.require("s")?;

        let config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(region.to_string()))
            .load()
            .await;
        let client = aws_sdk_secretsmanager::Client::new(&config);

        let response = client
            .get_secret_value()
            .secret_id(secret_id)
            .send()
            .await
            .map_err(|e| {
                OperatorError::secret_backend(format!(
                    "secrets manager lookup of '{secret_id}' failed: {e}"
                ))
            })?;

        let value = Zeroizing::new(
            response
                .secret_string()
                .map(ToString::to_string)
                .or_else(|| {
                    response
                        .secret_binary()
                        .map(|blob| String::from_utf8_lossy(blob.as_ref()).to_string())
                })
                .ok_or_else(|| {
                    OperatorError::secret_backend(format!(
                        "secret '{secret_id}' has no string or binary value"
                    ))
                })?,
        );

        match reference.param("k") {
            None => Ok(value),
            Some(key) => {
                let doc: serde_json::Value = serde_json::from_str(&value).map_err(|_| {
                    OperatorError::secret_backend(format!(
                        "secret '{secret_id}' is not a JSON document, cannot select key '{key}'"
                    ))
                })?;
                let selected = match &doc[key] {
                    serde_json::Value::String(s) => s.clone(),
                    serde_json::Value::Null => {
                        return Err(OperatorError::secret_backend(format!(
                            "secret '{secret_id}' has no key '{key}'"
                        )))
                    }
                    other => other.to_string(),
                };
                Ok(Zeroizing::new(selected))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::memory::InMemoryCluster;
    use k8s_openapi::api::core::v1::Secret;
    use k8s_openapi::ByteString;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingDecrypter {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Decrypter for CountingDecrypter {
        fn engine(&self) -> Engine {
            Engine::Vault
        }

        async fn decrypt(&self, reference: &SecretReference) -> Result<Zeroizing<String>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Zeroizing::new(format!("vault:{}", reference.require("p")?)))
        }
    }

    /// Holds `p:slow` lookups until released
    struct GatedDecrypter {
        release: Arc<tokio::sync::Notify>,
    }

    #[async_trait]
    impl Decrypter for GatedDecrypter {
        fn engine(&self) -> Engine {
            Engine::Vault
        }

        async fn decrypt(&self, reference: &SecretReference) -> Result<Zeroizing<String>> {
            let path = reference.require("p")?;
            if path == "slow" {
                self.release.notified().await;
            }
            Ok(Zeroizing::new(format!("vault:{path}")))
        }
    }

    /// Backend whose values are always files, whatever the prefix
    struct KeystoreDecrypter;

    #[async_trait]
    impl Decrypter for KeystoreDecrypter {
        fn engine(&self) -> Engine {
            Engine::S3
        }

        fn is_file(&self, _reference: &SecretReference) -> bool {
            true
        }

        async fn decrypt(&self, _reference: &SecretReference) -> Result<Zeroizing<String>> {
            Ok(Zeroizing::new("keystore-bytes".to_string()))
        }
    }

    struct StuckDecrypter;

    #[async_trait]
    impl Decrypter for StuckDecrypter {
        fn engine(&self) -> Engine {
            Engine::Gcs
        }

        async fn decrypt(&self, _reference: &SecretReference) -> Result<Zeroizing<String>> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Zeroizing::new(String::new()))
        }
    }

    #[tokio::test]
    async fn same_reference_hits_the_backend_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let resolver = SecretResolver::new(Duration::from_secs(5)).register(Arc::new(
            CountingDecrypter {
                calls: calls.clone(),
            },
        ));

        let first = resolver.resolve("encrypted:vault!p:db").await.unwrap();
        let second = resolver.resolve("encrypted:vault!p:db").await.unwrap();
        assert_eq!(first.as_str(), "vault:db");
        assert_eq!(first, second);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn slow_lookup_does_not_block_other_references() {
        let release = Arc::new(tokio::sync::Notify::new());
        let resolver = Arc::new(SecretResolver::new(Duration::from_secs(30)).register(Arc::new(
            GatedDecrypter {
                release: release.clone(),
            },
        )));

        let slow = tokio::spawn({
            let resolver = Arc::clone(&resolver);
            async move {
                resolver
                    .resolve("encrypted:vault!p:slow")
                    .await
                    .map(|v| v.to_string())
            }
        });
        tokio::task::yield_now().await;

        let fast = tokio::time::timeout(
            Duration::from_secs(1),
            resolver.resolve("encrypted:vault!p:fast"),
        )
        .await
        .expect("fast lookup waited on the slow one")
        .unwrap();
        assert_eq!(fast.as_str(), "vault:fast");

        release.notify_one();
        assert_eq!(slow.await.unwrap().unwrap(), "vault:slow");
    }

    #[tokio::test]
    async fn decrypter_can_force_file_output() {
        let resolver =
            SecretResolver::new(Duration::from_secs(5)).register(Arc::new(KeystoreDecrypter));
        let path = resolver
            .resolve("encrypted:s3!r:us-west-2!b:bucket!f:keystore.jks")
            .await
            .unwrap();
        assert_eq!(std::fs::read_to_string(path.as_str()).unwrap(), "keystore-bytes");
    }

    #[tokio::test]
    async fn unregistered_engine_fails() {
        let resolver = SecretResolver::new(Duration::from_secs(5));
        let err = resolver.resolve("encrypted:s3!r:us-west-2!b:b!f:f").await.unwrap_err();
        assert!(err.to_string().contains("no decrypter registered"));
    }

    #[tokio::test]
    async fn slow_backend_times_out() {
        let resolver =
            SecretResolver::new(Duration::from_millis(20)).register(Arc::new(StuckDecrypter));
        let err = resolver.resolve("encrypted:gcs!b:bucket!f:file").await.unwrap_err();
        assert!(matches!(err, OperatorError::Timeout(_)));
    }

    #[tokio::test]
    async fn file_references_are_removed_with_the_resolver() {
        let cluster = InMemoryCluster::new();
        cluster.put_secret(
            "spinnaker",
            Secret {
                metadata: kube::api::ObjectMeta {
                    name: Some("accounts".to_string()),
                    ..Default::default()
                },
                data: Some(BTreeMap::from([(
                    "kubeconfig".to_string(),
                    ByteString(b"clusters: []".to_vec()),
                )])),
                ..Default::default()
            },
        );
        let resolver =
            SecretResolver::with_defaults(Arc::new(cluster), "spinnaker", Duration::from_secs(5));

        let path = resolver
            .resolve("encryptedFile:k8s!n:accounts!k:kubeconfig")
            .await
            .unwrap();
        assert_eq!(std::fs::read_to_string(path.as_str()).unwrap(), "clusters: []");
        let dir = resolver.temp_dir_path().await.unwrap();

        drop(resolver);
        assert!(!dir.exists());
    }

    #[tokio::test]
    async fn plain_values_pass_through() {
        let resolver = SecretResolver::new(Duration::from_secs(5)).register(Arc::new(NoopDecrypter));
        assert_eq!(
            resolver.resolve_if_reference("hunter2").await.unwrap().as_str(),
            "hunter2"
        );
        assert_eq!(
            resolver
                .resolve_if_reference("encrypted:noop!v:hunter3")
                .await
                .unwrap()
                .as_str(),
            "hunter3"
        );
    }
}
