//! # Expose Strategies
//!
//! Matched transformer and change-detector pairs that make gate (API) and deck (UI)
//! reachable from outside the cluster and record their public URLs.
//!
//! ## Module Structure
//!
//! - `service.rs` - LoadBalancer/NodePort Services generated by the operator
//! - `ingress.rs` - Pre-existing Ingresses pointing at the generated Services
//!
//! A user-pinned override URL always wins over a discovered one and is mirrored
//! into status as-is.

mod ingress;
mod service;

pub use ingress::{IngressExposeDetector, IngressExposeTransformer};
pub use service::{ServiceExposeDetector, ServiceExposeTransformer};

use crate::changedetector::ChangeDetector;
use crate::cluster::ClusterReader;
use crate::constants::{
    API_OVERRIDE_URL_PATH, AWS_SSL_CERT_ANNOTATION, DECK, DECK_DEFAULT_PORT, GATE,
    GATE_DEFAULT_PORT, SERVICE_NAME_PREFIX, UI_OVERRIDE_URL_PATH,
};
use crate::crd::{ExposeType, SpinnakerService, SpinnakerServiceStatus};
use crate::error::Result;
use crate::props;
use crate::transformer::Transformer;
use k8s_openapi::api::core::v1::Service;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Collaborators shared by both strategies
#[derive(Clone)]
pub struct ExposeContext {
    pub cluster: Arc<dyn ClusterReader>,
    /// Public port used when neither the strategy nor an override names one
    pub default_port: i32,
}

impl std::fmt::Debug for ExposeContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExposeContext")
            .field("default_port", &self.default_port)
            .finish_non_exhaustive()
    }
}

impl ExposeContext {
    #[must_use]
    pub fn new(cluster: Arc<dyn ClusterReader>, default_port: i32) -> Self {
        Self {
            cluster,
            default_port,
        }
    }
}

/// Transformer and detector constructors for one strategy
#[derive(Clone, Copy)]
pub struct ExposeStrategy {
    pub kind: ExposeType,
    make_transformer: fn(&ExposeContext) -> Box<dyn Transformer>,
    make_detector: fn(&ExposeContext) -> Box<dyn ChangeDetector>,
}

impl std::fmt::Debug for ExposeStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExposeStrategy")
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

impl ExposeStrategy {
    #[must_use]
    pub fn transformer(&self, ctx: &ExposeContext) -> Box<dyn Transformer> {
        (self.make_transformer)(ctx)
    }

    #[must_use]
    pub fn detector(&self, ctx: &ExposeContext) -> Box<dyn ChangeDetector> {
        (self.make_detector)(ctx)
    }
}

/// Transformer and detector pair for `kind`
#[must_use]
pub fn strategy(kind: ExposeType) -> ExposeStrategy {
    match kind {
        ExposeType::Service => ExposeStrategy {
            kind,
            make_transformer: |ctx| Box::new(ServiceExposeTransformer::new(ctx.clone())),
            make_detector: |ctx| Box::new(ServiceExposeDetector::new(ctx.clone())),
        },
        ExposeType::Ingress => ExposeStrategy {
            kind,
            make_transformer: |ctx| Box::new(IngressExposeTransformer::new(ctx.clone())),
            make_detector: |ctx| Box::new(IngressExposeDetector::new(ctx.clone())),
        },
    }
}

/// Which status field holds the public URL of an exposed service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusUrl {
    Api,
    Ui,
}

/// A service reachable from outside the cluster
#[derive(Debug, Clone, Copy)]
pub struct ExposedService {
    pub name: &'static str,
    /// Config path of the user-facing base URL override
    pub override_path: &'static str,
    pub status_url: StatusUrl,
    /// Port the generated Service listens on when the profile does not override it
    pub default_port: i32,
}

pub const EXPOSED_SERVICES: &[ExposedService] = &[
    ExposedService {
        name: GATE,
        override_path: API_OVERRIDE_URL_PATH,
        status_url: StatusUrl::Api,
        default_port: GATE_DEFAULT_PORT,
    },
    ExposedService {
        name: DECK,
        override_path: UI_OVERRIDE_URL_PATH,
        status_url: StatusUrl::Ui,
        default_port: DECK_DEFAULT_PORT,
    },
];

impl ExposedService {
    /// Name of the generated Kubernetes Service
    #[must_use]
    pub fn k8s_name(&self) -> String {
        format!("{SERVICE_NAME_PREFIX}{}", self.name)
    }

    /// Port the service listens on inside the cluster
    #[must_use]
    pub fn service_port(&self, svc: &SpinnakerService) -> i32 {
        svc.custom_server_port(self.name)
            .unwrap_or(self.default_port)
    }

    #[must_use]
    pub fn status_url<'a>(&self, status: Option<&'a SpinnakerServiceStatus>) -> Option<&'a str> {
        let status = status?;
        match self.status_url {
            StatusUrl::Api => status.api_url.as_deref(),
            StatusUrl::Ui => status.ui_url.as_deref(),
        }
        .filter(|u| !u.is_empty())
    }

    pub fn set_status_url(&self, svc: &mut SpinnakerService, url: &str) {
        let status = svc.status_mut();
        let slot = match self.status_url {
            StatusUrl::Api => &mut status.api_url,
            StatusUrl::Ui => &mut status.ui_url,
        };
        *slot = Some(url.to_string());
    }

    /// Override URL the user set in the configuration, if any
    #[must_use]
    pub fn pinned_url(&self, svc: &SpinnakerService) -> Option<String> {
        props::get_str(svc.config(), self.override_path)
            .filter(|u| !u.is_empty())
            .map(str::to_string)
    }

    /// Record a URL: a pinned override wins and is mirrored into status, otherwise the
    /// discovered URL (if any) goes into both the override and status.
    pub fn record_url(&self, svc: &mut SpinnakerService, discovered: Option<&str>) -> Result<()> {
        if let Some(pinned) = self.pinned_url(svc) {
            self.set_status_url(svc, &pinned);
            return Ok(());
        }
        if let Some(url) = discovered {
            props::set(svc.config_mut(), self.override_path, Value::String(url.to_string()))?;
            self.set_status_url(svc, url);
        }
        Ok(())
    }
}

/// Hostname, else IP, of the first load-balancer ingress of a live Service
#[must_use]
pub fn load_balancer_host(service: &Service) -> Option<String> {
    service
        .status
        .as_ref()?
        .load_balancer
        .as_ref()?
        .ingress
        .as_ref()?
        .iter()
        .find_map(|i| {
            i.hostname
                .clone()
                .filter(|h| !h.is_empty())
                .or_else(|| i.ip.clone().filter(|ip| !ip.is_empty()))
        })
}

/// `https` on 443 or when a TLS certificate annotation is present
#[must_use]
pub fn scheme_for(port: i32, annotations: &BTreeMap<String, String>) -> &'static str {
    if port == 443 || annotations.contains_key(AWS_SSL_CERT_ANNOTATION) {
        "https"
    } else {
        "http"
    }
}

/// URL with the port omitted when it is the scheme's default
#[must_use]
pub fn build_url(scheme: &str, host: &str, port: i32) -> String {
    match (scheme, port) {
        ("http", 80) | ("https", 443) => format!("{scheme}://{host}"),
        _ => format!("{scheme}://{host}:{port}"),
    }
}
