//! # Secrets
//!
//! Secret reference grammar and the per-reconciliation resolver.
//!
//! - `reference.rs` - `encrypted:` / `encryptedFile:` token parsing
//! - `resolver.rs` - cached resolution through pluggable decrypters

pub mod reference;
pub mod resolver;

pub use reference::{
    is_reference, parse_kubernetes_reference, Engine, KubernetesSecretKey, ReferenceError,
    SecretReference,
};
pub use resolver::{Decrypter, SecretResolver};
