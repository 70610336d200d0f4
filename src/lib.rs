//! Spinnaker Operator Library
//!
//! Core functionality of the Spinnaker operator: the `SpinnakerService` resource,
//! the transformer pipeline, change detection, expose strategies and the reconciler.
//!
//! ## Quick Start
//!
//! ```rust
//! use spinnaker_operator::prelude::*;
//! ```
//!
//! This brings commonly used types and traits into scope. For more specific imports,
//! use the individual modules.

pub mod changedetector;
pub mod cluster;
pub mod config;
pub mod constants;
pub mod controller;
pub mod crd;
pub mod error;
pub mod expose;
pub mod generated;
pub mod generator;
pub mod observability;
pub mod prelude;
pub mod props;
pub mod runtime;
pub mod secrets;
pub mod transformer;
pub mod validate;
