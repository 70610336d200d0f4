//! # Configuration
//!
//! Operator settings loaded from environment variables, shared across the runtime.

mod controller;

pub use controller::ControllerConfig;

use std::sync::Arc;
use tokio::sync::RwLock;

/// Configuration shared between the watch loop, the reconciler and the HTTP server
pub type SharedControllerConfig = Arc<RwLock<ControllerConfig>>;

#[must_use]
pub fn shared(config: ControllerConfig) -> SharedControllerConfig {
    Arc::new(RwLock::new(config))
}
