//! # Errors
//!
//! Error types shared by the transformation core.
//!
//! Errors fall into three groups that the reconciler handles differently:
//! - configuration errors: invalid user input, never retried automatically
//! - collaborator errors: Kubernetes API, manifest generator, validator, secret backends
//! - detector errors: failures while comparing desired and live state

use thiserror::Error;

pub type Result<T, E = OperatorError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum OperatorError {
    /// Malformed or self-contradictory user input
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Kubernetes API error
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Live state could not be read for a reason other than an API error
    #[error("cluster read error: {0}")]
    Cluster(String),

    /// Manifest generator failure (transport or response)
    #[error("manifest generator error: {0}")]
    Generator(String),

    /// Config validator could not be reached or answered garbage
    #[error("config validator error: {0}")]
    Validator(String),

    /// Secret backend failure
    #[error("secret backend error: {0}")]
    SecretBackend(String),

    /// A change detector could not evaluate live state
    #[error("change detector '{detector}' failed: {source}")]
    Detector {
        detector: &'static str,
        #[source]
        source: Box<OperatorError>,
    },

    /// A transformer failed; wraps the underlying cause with the transformer name
    #[error("transformer '{transformer}' failed: {source}")]
    Transformer {
        transformer: &'static str,
        #[source]
        source: Box<OperatorError>,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A call exceeded its deadline
    #[error("timed out: {0}")]
    Timeout(String),
}

impl OperatorError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn generator(msg: impl Into<String>) -> Self {
        Self::Generator(msg.into())
    }

    pub fn cluster(msg: impl Into<String>) -> Self {
        Self::Cluster(msg.into())
    }

    pub fn secret_backend(msg: impl Into<String>) -> Self {
        Self::SecretBackend(msg.into())
    }

    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Wrap an error raised while a detector was running
    pub fn in_detector(detector: &'static str, source: OperatorError) -> Self {
        Self::Detector {
            detector,
            source: Box::new(source),
        }
    }

    /// Wrap an error raised while a transformer was running
    pub fn in_transformer(transformer: &'static str, source: OperatorError) -> Self {
        Self::Transformer {
            transformer,
            source: Box::new(source),
        }
    }

    /// True when retrying the same spec cannot succeed
    #[must_use]
    pub fn is_configuration(&self) -> bool {
        match self {
            Self::Configuration(_) => true,
            Self::Detector { source, .. } | Self::Transformer { source, .. } => {
                source.is_configuration()
            }
            _ => false,
        }
    }
}

impl From<serde_json::Error> for OperatorError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for OperatorError {
    fn from(e: serde_yaml::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

impl From<crate::props::PropertyError> for OperatorError {
    fn from(e: crate::props::PropertyError) -> Self {
        Self::Configuration(e.to_string())
    }
}

impl From<crate::secrets::reference::ReferenceError> for OperatorError {
    fn from(e: crate::secrets::reference::ReferenceError) -> Self {
        Self::Configuration(e.to_string())
    }
}
