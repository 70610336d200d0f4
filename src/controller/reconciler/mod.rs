//! # Reconciler
//!
//! Drives one SpinnakerService towards its desired state.
//!
//! ## Module Structure
//!
//! - `types.rs` - Reconciler context, errors, backoff state, trigger sources
//! - `pass.rs` - Detect, transform, validate, generate, apply
//! - `reconcile.rs` - Controller entry point around a pass
//! - `apply.rs` - Server-side apply of generated manifests
//! - `status.rs` - Status patches for success and failure
//! - `events.rs` - Kubernetes Events

mod apply;
mod events;
mod pass;
mod reconcile;
mod status;
mod types;

pub use apply::{KubeApplier, ManifestApplier, MemoryApplier};
pub use events::{actions, reasons, EventPublisher, KubeEventPublisher, NoopEventPublisher};
pub use pass::{run_pass, PassDeps, PassOutcome};
pub use reconcile::reconcile;
pub use status::{condition_reasons, failure_patch, patch_status, success_patch, READY_CONDITION};
pub use types::{BackoffState, Reconciler, ReconcilerError, TriggerSource};
