//! # Change Detection
//!
//! Decides, without calling the manifest generator, whether the cluster already runs
//! what the SpinnakerService asks for.
//!
//! ## Module Structure
//!
//! - `mod.rs` - `ChangeDetector` trait and the short-circuiting composite
//! - `hash.rs` - Content-hash detectors over spec sub-trees
//!
//! Live-state detectors for exposure live next to their strategy in `crate::expose`.

mod hash;

pub use hash::{content_hash, ConfigHashDetector, KustomizeHashDetector};

use crate::crd::SpinnakerService;
use crate::error::{OperatorError, Result};
use crate::expose::ExposeContext;
use crate::observability::metrics;
use async_trait::async_trait;
use tracing::{debug, info};

#[async_trait]
pub trait ChangeDetector: Send + Sync {
    fn name(&self) -> &'static str;

    /// Run even after an earlier detector already reported drift. Detectors that
    /// record state (content hashes) must always run so their record stays current.
    fn always_run(&self) -> bool;

    /// `Ok(true)` when live state satisfies the desired spec
    async fn is_up_to_date(&self, svc: &mut SpinnakerService) -> Result<bool>;
}

/// Ordered detectors combined by conjunction
pub struct Composite {
    detectors: Vec<Box<dyn ChangeDetector>>,
}

impl std::fmt::Debug for Composite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Composite")
            .field("detectors", &self.names())
            .finish()
    }
}

impl Composite {
    #[must_use]
    pub fn new(detectors: Vec<Box<dyn ChangeDetector>>) -> Self {
        Self { detectors }
    }

    /// Content-hash detectors first, then the expose detector when a strategy is set
    #[must_use]
    pub fn standard(svc: &SpinnakerService, ctx: &ExposeContext) -> Self {
        let mut detectors: Vec<Box<dyn ChangeDetector>> =
            vec![Box::new(ConfigHashDetector), Box::new(KustomizeHashDetector)];
        if let Some(kind) = svc.spec.expose.expose_type {
            detectors.push(crate::expose::strategy(kind).detector(ctx));
        }
        Self::new(detectors)
    }

    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.detectors.iter().map(|d| d.name()).collect()
    }

    /// Walk every detector in order. Once one reports drift, only `always_run`
    /// detectors still execute. The first error aborts the walk.
    pub async fn is_up_to_date(&self, svc: &mut SpinnakerService) -> Result<bool> {
        let mut up_to_date = true;
        for detector in &self.detectors {
            let name = detector.name();
            if !up_to_date && !detector.always_run() {
                debug!(detector = name, "skipping detector, drift already found");
                continue;
            }
            let result = detector
                .is_up_to_date(svc)
                .await
                .map_err(|e| OperatorError::in_detector(name, e))?;
            if !result {
                info!(detector = name, "drift detected");
                metrics::increment_drift_detected(name);
            }
            up_to_date &= result;
        }
        Ok(up_to_date)
    }
}
