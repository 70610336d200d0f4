//! # Runtime
//!
//! Operator runtime: initialization, the controller watch loop and its error policy.
//!
//! - `initialization.rs` - crypto provider, tracing, metrics, probe server, client
//! - `watch_loop.rs` - `kube_runtime::Controller` over SpinnakerService
//! - `error_policy.rs` - per-resource Fibonacci backoff and watch error handling

pub mod error_policy;
pub mod initialization;
pub mod watch_loop;
