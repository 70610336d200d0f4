//! # Manifest Generator and Config Validator
//!
//! Collaborators that turn the transformed configuration into Kubernetes objects and
//! check it for mistakes. Both are external HTTP services; the traits here are the
//! seam the reconciler depends on.
//!
//! ## Module Structure
//!
//! - `mod.rs` - Traits and validation findings
//! - `http.rs` - Multipart HTTP client for both services

mod http;

pub use http::{payload_parts, HttpGenerator};

use crate::crd::SpinnakerService;
use crate::error::{OperatorError, Result};
use crate::generated::GeneratedManifestSet;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{info, warn};

#[async_trait]
pub trait ManifestGenerator: Send + Sync {
    /// Generate objects for every service from the transformed configuration
    async fn generate(&self, svc: &SpinnakerService) -> Result<GeneratedManifestSet>;
}

#[async_trait]
pub trait ConfigValidator: Send + Sync {
    async fn validate(
        &self,
        svc: &SpinnakerService,
        fail_fast: bool,
        skip_validators: &[String],
    ) -> Result<Vec<ValidationMessage>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Fatal,
    Error,
    Warning,
    Info,
    #[serde(other)]
    Unknown,
}

impl Severity {
    /// Findings that stop a deployment
    #[must_use]
    pub fn is_blocking(self) -> bool {
        matches!(self, Self::Fatal | Self::Error)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ValidationMessage {
    pub severity: Severity,
    pub message: String,
    #[serde(default)]
    pub location: Option<String>,
}

impl fmt::Display for ValidationMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.location {
            Some(location) => write!(f, "{:?} at {location}: {}", self.severity, self.message),
            None => write!(f, "{:?}: {}", self.severity, self.message),
        }
    }
}

/// Log every finding; blocking ones become a single configuration error
pub fn check_findings(messages: &[ValidationMessage]) -> Result<()> {
    let mut blocking = Vec::new();
    for message in messages {
        if message.severity.is_blocking() {
            warn!(finding = %message, "config validation failed");
            blocking.push(message.to_string());
        } else {
            info!(finding = %message, "config validation note");
        }
    }
    if blocking.is_empty() {
        Ok(())
    } else {
        Err(OperatorError::configuration(blocking.join("; ")))
    }
}
