//! # Prelude
//!
//! Re-exports commonly used types and traits.
//!
//! ```rust
//! use spinnaker_operator::prelude::*;
//! ```

// CRD types
pub use crate::crd::*;

pub use crate::error::{OperatorError, Result};

// Extension seams
pub use crate::changedetector::{ChangeDetector, Composite};
pub use crate::cluster::ClusterReader;
pub use crate::generator::{ConfigValidator, ManifestGenerator};
pub use crate::secrets::{Decrypter, SecretResolver};
pub use crate::transformer::{Pipeline, Transformer};
pub use crate::validate::AccountValidator;

pub use crate::expose::ExposeContext;
pub use crate::generated::{GeneratedManifestSet, ServiceBundle};

// Reconciler types
pub use crate::controller::reconciler::{
    reconcile, run_pass, BackoffState, ManifestApplier, PassDeps, PassOutcome, Reconciler,
    ReconcilerError, TriggerSource,
};

pub use crate::config::{ControllerConfig, SharedControllerConfig};
