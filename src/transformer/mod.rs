//! # Transformers
//!
//! Ordered passes that rewrite the logical configuration before manifest generation
//! and the generated Kubernetes objects afterwards.
//!
//! A pipeline is built fresh for every reconciliation. Both passes run transformers
//! sequentially in the order below and stop at the first error, so a partially
//! transformed manifest set never reaches the cluster:
//!
//! 1. `target` - deployment location and namespaces
//! 2. `defaults` - archaius defaults for JVM services
//! 3. `spin-svc-settings` - global service settings merged into every service
//! 4. `expose-*` - Service or Ingress exposure, selected by `spec.expose.type`
//! 5. `server-port` - custom listen ports
//! 6. `secrets` - Kubernetes secret references turned into env vars and mounts
//! 7. `patch` - user merge patches
//! 8. `owner` - owner references and managed-by label
//!
//! Every transformer is idempotent: running a pass twice yields the same result as
//! running it once.

mod defaults;
mod owner;
mod patch;
mod secrets;
mod server_port;
mod spin_svc_settings;
mod target;

pub use defaults::DefaultsTransformer;
pub use owner::OwnerTransformer;
pub use patch::{merge_patch, PatchTransformer};
pub use secrets::{env_var_name, looks_like_json, SecretsTransformer};
pub use server_port::ServerPortTransformer;
pub use spin_svc_settings::SpinSvcSettingsTransformer;
pub use target::TargetTransformer;

use crate::crd::SpinnakerService;
use crate::error::{OperatorError, Result};
use crate::expose::ExposeContext;
use crate::generated::GeneratedManifestSet;
use crate::observability::metrics;
use async_trait::async_trait;
use tracing::{debug, Instrument};

#[async_trait]
pub trait Transformer: Send + Sync {
    fn name(&self) -> &'static str;

    /// Mutate the logical configuration before manifests are generated
    async fn transform_config(&mut self, _svc: &mut SpinnakerService) -> Result<()> {
        Ok(())
    }

    /// Mutate the generated objects
    async fn transform_manifests(
        &mut self,
        _svc: &SpinnakerService,
        _manifests: &mut GeneratedManifestSet,
    ) -> Result<()> {
        Ok(())
    }
}

/// Fixed, ordered list of transformers for one reconciliation
pub struct Pipeline {
    transformers: Vec<Box<dyn Transformer>>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("transformers", &self.names())
            .finish()
    }
}

impl Pipeline {
    #[must_use]
    pub fn new(transformers: Vec<Box<dyn Transformer>>) -> Self {
        Self { transformers }
    }

    /// The standard pipeline. The expose transformer is present only when the
    /// resource selects an expose strategy.
    #[must_use]
    pub fn standard(svc: &SpinnakerService, ctx: &ExposeContext) -> Self {
        let mut transformers: Vec<Box<dyn Transformer>> = vec![
            Box::new(TargetTransformer),
            Box::new(DefaultsTransformer),
            Box::new(SpinSvcSettingsTransformer),
        ];
        if let Some(kind) = svc.spec.expose.expose_type {
            transformers.push(crate::expose::strategy(kind).transformer(ctx));
        }
        transformers.push(Box::new(ServerPortTransformer));
        transformers.push(Box::new(SecretsTransformer::default()));
        transformers.push(Box::new(PatchTransformer));
        transformers.push(Box::new(OwnerTransformer));
        Self::new(transformers)
    }

    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.transformers.iter().map(|t| t.name()).collect()
    }

    pub async fn transform_config(&mut self, svc: &mut SpinnakerService) -> Result<()> {
        for transformer in &mut self.transformers {
            let name = transformer.name();
            let span = tracing::debug_span!("pipeline.transform_config", transformer = name);
            transformer
                .transform_config(svc)
                .instrument(span)
                .await
                .map_err(|e| {
                    metrics::increment_transformer_errors(name);
                    OperatorError::in_transformer(name, e)
                })?;
            debug!(transformer = name, "transform_config done");
        }
        Ok(())
    }

    pub async fn transform_manifests(
        &mut self,
        svc: &SpinnakerService,
        manifests: &mut GeneratedManifestSet,
    ) -> Result<()> {
        for transformer in &mut self.transformers {
            let name = transformer.name();
            let span = tracing::debug_span!("pipeline.transform_manifests", transformer = name);
            transformer
                .transform_manifests(svc, manifests)
                .instrument(span)
                .await
                .map_err(|e| {
                    metrics::increment_transformer_errors(name);
                    OperatorError::in_transformer(name, e)
                })?;
            debug!(transformer = name, "transform_manifests done");
        }
        Ok(())
    }
}
