//! Ingress strategy: the user brings their own Ingress objects pointing at the
//! generated `spin-gate` / `spin-deck` Services; URLs are read from their rules.

use super::{ExposeContext, ExposedService, EXPOSED_SERVICES};
use crate::changedetector::ChangeDetector;
use crate::cluster::{BackendPort, IngressView};
use crate::constants::GATE;
use crate::crd::SpinnakerService;
use crate::error::Result;
use crate::generated::GeneratedManifestSet;
use crate::props;
use crate::transformer::Transformer;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::HTTPGetAction;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use serde_json::Value;
use tracing::{debug, info};

/// Gate properties needed to serve behind a path-routing proxy
const GATE_PROXY_PROPERTIES: &[(&str, &str)] = &[
    ("server.tomcat.protocolHeader", "X-Forwarded-Proto"),
    ("server.tomcat.remoteIpHeader", "X-Forwarded-For"),
    ("server.tomcat.internalProxies", ".*"),
    ("server.tomcat.httpsServerPort", "X-Forwarded-Port"),
];

/// A URL found in an Ingress rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredUrl {
    pub url: String,
    /// Routed path without a trailing `/` or `/*`; empty for the root
    pub path: String,
}

fn normalize_path(path: Option<&str>) -> String {
    let path = path.unwrap_or_default();
    let path = path
        .strip_suffix("/*")
        .or_else(|| path.strip_suffix('/'))
        .unwrap_or(path);
    path.to_string()
}

fn port_matches(port: Option<&BackendPort>, service_port: i32) -> bool {
    match port {
        Some(BackendPort::Number(n)) => *n == service_port,
        Some(BackendPort::Name(name)) => name == "http",
        None => false,
    }
}

/// First rule routing to the exposed service, across every listed Ingress
#[must_use]
pub fn find_url(ingresses: &[IngressView], service_name: &str, service_port: i32) -> Option<DiscoveredUrl> {
    for ingress in ingresses {
        for route in &ingress.routes {
            if route.service_name != service_name || !port_matches(route.port.as_ref(), service_port) {
                continue;
            }
            let path = normalize_path(route.path.as_deref());
            let (scheme, host) = match route.host.as_deref().filter(|h| !h.is_empty()) {
                Some(host) if ingress.tls_hosts.iter().any(|t| t == host) => ("https", host.to_string()),
                Some(host) => ("http", host.to_string()),
                None => match ingress.lb_hostname.clone().or_else(|| ingress.lb_ip.clone()) {
                    Some(host) => ("http", host),
                    None => continue,
                },
            };
            return Some(DiscoveredUrl {
                url: format!("{scheme}://{host}{path}"),
                path,
            });
        }
    }
    None
}

async fn discover(
    ctx: &ExposeContext,
    svc: &SpinnakerService,
    exposed: &ExposedService,
) -> Result<Option<DiscoveredUrl>> {
    let ingresses = ctx.cluster.list_ingresses(&svc.namespace_or_default()).await?;
    Ok(find_url(&ingresses, &exposed.k8s_name(), exposed.service_port(svc)))
}

#[derive(Debug)]
pub struct IngressExposeTransformer {
    ctx: ExposeContext,
    /// Routed gate path found during the config pass
    gate_path: Option<String>,
}

impl IngressExposeTransformer {
    #[must_use]
    pub fn new(ctx: ExposeContext) -> Self {
        Self {
            ctx,
            gate_path: None,
        }
    }
}

#[async_trait]
impl Transformer for IngressExposeTransformer {
    fn name(&self) -> &'static str {
        "expose-ingress"
    }

    async fn transform_config(&mut self, svc: &mut SpinnakerService) -> Result<()> {
        for exposed in EXPOSED_SERVICES {
            let discovered = discover(&self.ctx, svc, exposed).await?;
            if let Some(found) = discovered.as_ref() {
                info!(service = exposed.name, url = %found.url, "discovered ingress URL");
            }
            exposed.record_url(svc, discovered.as_ref().map(|d| d.url.as_str()))?;

            if exposed.name != GATE {
                continue;
            }
            let Some(path) = discovered.map(|d| d.path).filter(|p| !p.is_empty()) else {
                continue;
            };
            let profile = svc.profile_mut(GATE);
            props::set_if_absent(profile, "server.servlet.context-path", Value::String(path.clone()))?;
            for (key, value) in GATE_PROXY_PROPERTIES {
                props::set_if_absent(profile, key, Value::String((*value).to_string()))?;
            }
            self.gate_path = Some(path);
        }
        Ok(())
    }

    async fn transform_manifests(
        &mut self,
        svc: &SpinnakerService,
        manifests: &mut GeneratedManifestSet,
    ) -> Result<()> {
        let Some(path) = self.gate_path.as_deref() else {
            return Ok(());
        };
        let port = EXPOSED_SERVICES
            .iter()
            .find(|e| e.name == GATE)
            .map_or(crate::constants::GATE_DEFAULT_PORT, |e| e.service_port(svc));
        let Some(probe) = manifests
            .get_mut(GATE)
            .and_then(|b| b.container_mut(GATE))
            .and_then(|c| c.readiness_probe.as_mut())
        else {
            return Ok(());
        };
        if probe.exec.is_none() {
            return Ok(());
        }
        probe.exec = None;
        probe.http_get = Some(HTTPGetAction {
            path: Some(format!("{path}/health")),
            port: IntOrString::Int(port),
            ..HTTPGetAction::default()
        });
        debug!(path, port, "gate readiness probe now uses the routed path");
        Ok(())
    }
}

/// Drift when an Ingress routes to a URL other than the one recorded in status
#[derive(Debug)]
pub struct IngressExposeDetector {
    ctx: ExposeContext,
}

impl IngressExposeDetector {
    #[must_use]
    pub fn new(ctx: ExposeContext) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl ChangeDetector for IngressExposeDetector {
    fn name(&self) -> &'static str {
        "expose-ingress"
    }

    fn always_run(&self) -> bool {
        false
    }

    async fn is_up_to_date(&self, svc: &mut SpinnakerService) -> Result<bool> {
        for exposed in EXPOSED_SERVICES {
            let expected = match exposed.pinned_url(svc) {
                Some(pinned) => Some(pinned),
                None => discover(&self.ctx, svc, exposed).await?.map(|d| d.url),
            };
            let Some(expected) = expected else {
                continue;
            };
            let recorded = exposed.status_url(svc.status.as_ref());
            if recorded != Some(expected.as_str()) {
                debug!(service = exposed.name, expected = %expected, recorded = ?recorded, "ingress URL changed");
                return Ok(false);
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::memory::InMemoryCluster;
    use crate::cluster::IngressRoute;
    use crate::constants::API_OVERRIDE_URL_PATH;
    use crate::crd::SpinnakerServiceSpec;
    use serde_json::json;
    use std::sync::Arc;

    fn route(host: Option<&str>, path: Option<&str>, service: &str, port: BackendPort) -> IngressRoute {
        IngressRoute {
            host: host.map(str::to_string),
            path: path.map(str::to_string),
            service_name: service.to_string(),
            port: Some(port),
        }
    }

    fn ingress(routes: Vec<IngressRoute>, tls_hosts: &[&str]) -> IngressView {
        IngressView {
            name: "spinnaker".to_string(),
            api_version: "networking.k8s.io/v1".to_string(),
            routes,
            tls_hosts: tls_hosts.iter().map(|h| (*h).to_string()).collect(),
            lb_hostname: Some("lb.example.com".to_string()),
            lb_ip: None,
        }
    }

    fn svc() -> SpinnakerService {
        let mut svc = SpinnakerService::new("spinnaker", SpinnakerServiceSpec::default());
        svc.metadata.namespace = Some("spin".to_string());
        svc
    }

    #[test]
    fn rules_match_by_service_and_port() {
        let ingresses = vec![ingress(
            vec![
                route(Some("other.acme.io"), None, "spin-gate", BackendPort::Number(9999)),
                route(Some("spin.acme.io"), Some("/api/v1/*"), "spin-gate", BackendPort::Number(8084)),
                route(Some("spin.acme.io"), Some("/"), "spin-deck", BackendPort::Name("http".to_string())),
            ],
            &["spin.acme.io"],
        )];
        assert_eq!(
            find_url(&ingresses, "spin-gate", 8084),
            Some(DiscoveredUrl {
                url: "https://spin.acme.io/api/v1".to_string(),
                path: "/api/v1".to_string()
            })
        );
        assert_eq!(
            find_url(&ingresses, "spin-deck", 9000).map(|d| d.url),
            Some("https://spin.acme.io".to_string())
        );
        assert_eq!(find_url(&ingresses, "spin-gate", 8085), None);
    }

    #[test]
    fn hostless_rule_falls_back_to_load_balancer() {
        let ingresses = vec![ingress(
            vec![route(None, None, "spin-deck", BackendPort::Number(9000))],
            &[],
        )];
        assert_eq!(
            find_url(&ingresses, "spin-deck", 9000).map(|d| d.url),
            Some("http://lb.example.com".to_string())
        );
    }

    fn cluster_with_gate_path() -> InMemoryCluster {
        let cluster = InMemoryCluster::new();
        cluster.put_ingress(
            "spin",
            ingress(
                vec![route(Some("spin.acme.io"), Some("/api/v1"), "spin-gate", BackendPort::Number(8084))],
                &[],
            ),
        );
        cluster
    }

    #[tokio::test]
    async fn gate_path_configures_profile_and_probe() {
        let cluster = cluster_with_gate_path();
        let mut s = svc();
        s.spec.spinnaker_config.profiles.insert(
            GATE.to_string(),
            json!({"server": {"tomcat": {"internalProxies": "10\\..*"}}}),
        );
        let mut t = IngressExposeTransformer::new(ExposeContext::new(Arc::new(cluster), 80));
        t.transform_config(&mut s).await.unwrap();

        let gate = s.profile(GATE).unwrap();
        assert_eq!(props::get_str(gate, "server.servlet.context-path"), Some("/api/v1"));
        assert_eq!(props::get_str(gate, "server.tomcat.internalProxies"), Some("10\\..*"));
        assert_eq!(props::get_str(gate, "server.tomcat.protocolHeader"), Some("X-Forwarded-Proto"));
        assert_eq!(
            props::get_str(s.config(), API_OVERRIDE_URL_PATH),
            Some("http://spin.acme.io/api/v1")
        );

        let mut m: GeneratedManifestSet = serde_json::from_value(json!({
            "gate": {"deployment": {
                "metadata": {"name": "spin-gate"},
                "spec": {"selector": {}, "template": {"spec": {"containers": [{
                    "name": "gate",
                    "readinessProbe": {"exec": {"command": ["wget", "http://localhost:8084/health"]}}
                }]}}}
            }}
        }))
        .unwrap();
        t.transform_manifests(&s, &mut m).await.unwrap();
        let probe = m
            .get_mut(GATE)
            .unwrap()
            .container_mut(GATE)
            .unwrap()
            .readiness_probe
            .clone()
            .unwrap();
        assert!(probe.exec.is_none());
        let http = probe.http_get.unwrap();
        assert_eq!(http.path.as_deref(), Some("/api/v1/health"));
        assert_eq!(http.port, IntOrString::Int(8084));
    }

    #[tokio::test]
    async fn both_passes_are_idempotent() {
        let mut t = IngressExposeTransformer::new(ExposeContext::new(
            Arc::new(cluster_with_gate_path()),
            80,
        ));
        let mut s = svc();
        t.transform_config(&mut s).await.unwrap();
        let config_once = serde_json::to_value(&s).unwrap();
        t.transform_config(&mut s).await.unwrap();
        assert_eq!(serde_json::to_value(&s).unwrap(), config_once);
        assert_eq!(
            s.status.as_ref().unwrap().api_url.as_deref(),
            Some("http://spin.acme.io/api/v1")
        );

        let mut m: GeneratedManifestSet = serde_json::from_value(json!({
            "gate": {"deployment": {
                "metadata": {"name": "spin-gate"},
                "spec": {"selector": {}, "template": {"spec": {"containers": [{
                    "name": "gate",
                    "readinessProbe": {"exec": {"command": ["wget", "http://localhost:8084/health"]}}
                }]}}}
            }}
        }))
        .unwrap();
        t.transform_manifests(&s, &mut m).await.unwrap();
        let manifests_once = serde_json::to_value(&m).unwrap();
        t.transform_manifests(&s, &mut m).await.unwrap();
        assert_eq!(serde_json::to_value(&m).unwrap(), manifests_once);
    }

    #[tokio::test]
    async fn detector_compares_discovered_and_recorded_urls() {
        let cluster = cluster_with_gate_path();
        let detector = IngressExposeDetector::new(ExposeContext::new(Arc::new(cluster), 80));
        let mut s = svc();
        assert!(!detector.is_up_to_date(&mut s).await.unwrap());

        s.status_mut().api_url = Some("http://spin.acme.io/api/v1".to_string());
        assert!(detector.is_up_to_date(&mut s).await.unwrap());

        s.spec.spinnaker_config.config =
            json!({"security": {"apiSecurity": {"overrideBaseUrl": "https://api.acme.io"}}});
        assert!(!detector.is_up_to_date(&mut s).await.unwrap());
    }

    #[tokio::test]
    async fn listing_failures_abort() {
        let cluster = InMemoryCluster::new();
        cluster.fail_reads("forbidden");
        let detector = IngressExposeDetector::new(ExposeContext::new(Arc::new(cluster), 80));
        assert!(detector.is_up_to_date(&mut svc()).await.is_err());
    }
}
