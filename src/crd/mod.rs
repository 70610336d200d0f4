//! # Custom Resource Definitions
//!
//! CRD types for the Spinnaker operator.
//!
//! ## Module Structure
//!
//! - `spec.rs` - `SpinnakerService` specification, kustomize/validation/accounts blocks
//! - `expose.rs` - Expose strategy configuration (Service / Ingress)
//! - `status.rs` - Status types, including the content-hash record used for drift detection

mod expose;
mod spec;
mod status;

pub use expose::{
    ExposeConfig, ExposeServiceConfig, ExposeServiceOverride, ExposeType,
    DEFAULT_EXPOSED_SERVICE_TYPE,
};
pub use spec::{
    AccountsConfig, ObjectPatches, ServiceKustomization, SpinnakerConfig, SpinnakerService,
    SpinnakerServiceSpec, ValidationConfig,
};
pub use status::{Condition, HashStatus, SpinnakerDeploymentStatus, SpinnakerServiceStatus};
