//! Service strategy: gate and deck get LoadBalancer (or NodePort) Services and their
//! URLs come from the load balancer the cloud assigns.

use super::{build_url, load_balancer_host, scheme_for, ExposeContext, ExposedService, EXPOSED_SERVICES};
use crate::changedetector::ChangeDetector;
use crate::constants::GATE;
use crate::crd::SpinnakerService;
use crate::error::{OperatorError, Result};
use crate::generated::GeneratedManifestSet;
use crate::transformer::Transformer;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Service, ServicePort};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use tracing::{debug, info};

#[derive(Debug)]
pub struct ServiceExposeTransformer {
    ctx: ExposeContext,
}

impl ServiceExposeTransformer {
    #[must_use]
    pub fn new(ctx: ExposeContext) -> Self {
        Self { ctx }
    }

    async fn discover_url(&self, svc: &SpinnakerService, exposed: &ExposedService) -> Result<Option<String>> {
        let namespace = svc.namespace_or_default();
        let Some(live) = self.ctx.cluster.get_service(&namespace, &exposed.k8s_name()).await? else {
            return Ok(None);
        };
        let Some(host) = load_balancer_host(&live) else {
            return Ok(None);
        };
        let cfg = &svc.spec.expose.service;
        let port = cfg.public_port_for(exposed.name, self.ctx.default_port);
        let scheme = scheme_for(port, &cfg.annotations_for(exposed.name));
        Ok(Some(build_url(scheme, &host, port)))
    }
}

#[async_trait]
impl Transformer for ServiceExposeTransformer {
    fn name(&self) -> &'static str {
        "expose-service"
    }

    async fn transform_config(&mut self, svc: &mut SpinnakerService) -> Result<()> {
        for exposed in EXPOSED_SERVICES {
            let discovered = if exposed.pinned_url(svc).is_some() {
                None
            } else {
                self.discover_url(svc, exposed).await?
            };
            if let Some(url) = discovered.as_deref() {
                info!(service = exposed.name, url, "discovered public URL");
            }
            exposed.record_url(svc, discovered.as_deref())?;
        }
        Ok(())
    }

    async fn transform_manifests(
        &mut self,
        svc: &SpinnakerService,
        manifests: &mut GeneratedManifestSet,
    ) -> Result<()> {
        let cfg = &svc.spec.expose.service;
        for exposed in EXPOSED_SERVICES {
            let Some(service) = manifests
                .get_mut(exposed.name)
                .and_then(|b| b.service.as_mut())
            else {
                continue;
            };
            let spec = service.spec.get_or_insert_with(Default::default);
            spec.type_ = Some(cfg.service_type_for(exposed.name));

            let public_port = cfg.public_port_for(exposed.name, self.ctx.default_port);
            let ports = spec.ports.get_or_insert_with(Vec::new);
            match ports.first_mut() {
                Some(first) => {
                    if first.target_port.is_none() {
                        first.target_port = Some(IntOrString::Int(first.port));
                    }
                    first.port = public_port;
                }
                None => ports.push(ServicePort {
                    name: Some("http".to_string()),
                    port: public_port,
                    target_port: Some(IntOrString::Int(exposed.service_port(svc))),
                    ..ServicePort::default()
                }),
            }
            if exposed.name == GATE {
                if let (Some(port), Some(first)) = (svc.custom_server_port(GATE), ports.first_mut()) {
                    first.target_port = Some(IntOrString::Int(port));
                }
            }

            let annotations = cfg.annotations_for(exposed.name);
            if !annotations.is_empty() {
                service
                    .metadata
                    .annotations
                    .get_or_insert_with(Default::default)
                    .extend(annotations);
            }
            debug!(service = exposed.name, port = public_port, "exposed service rewritten");
        }
        Ok(())
    }
}

/// Compares the live gate and deck Services with what the strategy would generate
#[derive(Debug)]
pub struct ServiceExposeDetector {
    ctx: ExposeContext,
}

impl ServiceExposeDetector {
    #[must_use]
    pub fn new(ctx: ExposeContext) -> Self {
        Self { ctx }
    }

    fn matches(&self, svc: &SpinnakerService, exposed: &ExposedService, live: &Service) -> Result<bool> {
        let cfg = &svc.spec.expose.service;
        let spec = live.spec.as_ref().ok_or_else(|| {
            OperatorError::cluster(format!("service {} has no spec", exposed.k8s_name()))
        })?;
        let port = spec.ports.as_ref().and_then(|p| p.first()).ok_or_else(|| {
            OperatorError::cluster(format!("service {} has no ports", exposed.k8s_name()))
        })?;

        let desired_type = cfg.service_type_for(exposed.name);
        if spec.type_.as_deref() != Some(desired_type.as_str()) {
            debug!(service = exposed.name, desired = %desired_type, live = ?spec.type_, "service type differs");
            return Ok(false);
        }
        let desired_port = cfg.public_port_for(exposed.name, self.ctx.default_port);
        if port.port != desired_port {
            debug!(service = exposed.name, desired = desired_port, live = port.port, "public port differs");
            return Ok(false);
        }
        if exposed.name == GATE {
            if let Some(target) = svc.custom_server_port(GATE) {
                if port.target_port != Some(IntOrString::Int(target)) {
                    debug!(service = exposed.name, desired = target, "target port differs");
                    return Ok(false);
                }
            }
        }

        let live_annotations = live.metadata.annotations.clone().unwrap_or_default();
        for (key, value) in cfg.annotations_for(exposed.name) {
            if live_annotations.get(&key) != Some(&value) {
                debug!(service = exposed.name, annotation = %key, "annotation differs");
                return Ok(false);
            }
        }

        if exposed.status_url(svc.status.as_ref()).is_none() && load_balancer_host(live).is_some() {
            debug!(service = exposed.name, "load balancer assigned but no URL recorded");
            return Ok(false);
        }
        Ok(true)
    }
}

#[async_trait]
impl ChangeDetector for ServiceExposeDetector {
    fn name(&self) -> &'static str {
        "expose-service"
    }

    fn always_run(&self) -> bool {
        false
    }

    async fn is_up_to_date(&self, svc: &mut SpinnakerService) -> Result<bool> {
        let namespace = svc.namespace_or_default();
        for exposed in EXPOSED_SERVICES {
            let Some(live) = self.ctx.cluster.get_service(&namespace, &exposed.k8s_name()).await? else {
                debug!(service = exposed.name, "exposed service not found");
                return Ok(false);
            };
            if !self.matches(svc, exposed, &live)? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}
