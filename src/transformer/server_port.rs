//! Follows a custom `server.port` from a service profile into the generated objects.
//!
//! The container port, the readiness probe and the Service target port are rewritten.
//! Services without a custom port keep the generated defaults.

use super::Transformer;
use crate::crd::SpinnakerService;
use crate::error::Result;
use crate::generated::{GeneratedManifestSet, ServiceBundle};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ContainerPort, Probe};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use regex::Regex;
use std::sync::LazyLock;
use tracing::debug;

static URL_PORT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(https?://[^/:\s]+):\d+").expect("URL port pattern is valid")
});

pub struct ServerPortTransformer;

#[async_trait]
impl Transformer for ServerPortTransformer {
    fn name(&self) -> &'static str {
        "server-port"
    }

    async fn transform_manifests(
        &mut self,
        svc: &SpinnakerService,
        manifests: &mut GeneratedManifestSet,
    ) -> Result<()> {
        for (service, bundle) in manifests.iter_mut() {
            let Some(port) = svc.custom_server_port(service) else {
                continue;
            };
            debug!(service = %service, port, "applying custom server port");
            apply_port(service, bundle, port);
        }
        Ok(())
    }
}

fn apply_port(service: &str, bundle: &mut ServiceBundle, port: i32) {
    if let Some(container) = bundle.container_mut(service) {
        let ports = container.ports.get_or_insert_with(Vec::new);
        match ports.first_mut() {
            Some(first) => first.container_port = port,
            None => ports.push(ContainerPort {
                container_port: port,
                name: Some("http".to_string()),
                ..ContainerPort::default()
            }),
        }
        if let Some(probe) = container.readiness_probe.as_mut() {
            rewrite_probe_port(probe, port);
        }
    }

    if let Some(port_spec) = bundle
        .service
        .as_mut()
        .and_then(|s| s.spec.as_mut())
        .and_then(|s| s.ports.as_mut())
        .and_then(|p| p.first_mut())
    {
        port_spec.target_port = Some(IntOrString::Int(port));
    }
}

/// Point an exec (URL in the command line), HTTP or TCP probe at `port`
pub fn rewrite_probe_port(probe: &mut Probe, port: i32) {
    if let Some(exec) = probe.exec.as_mut() {
        for arg in exec.command.iter_mut().flatten() {
            let replaced = URL_PORT.replace_all(arg, format!("${{1}}:{port}").as_str());
            *arg = replaced.into_owned();
        }
    }
    if let Some(http) = probe.http_get.as_mut() {
        http.port = IntOrString::Int(port);
    }
    if let Some(tcp) = probe.tcp_socket.as_mut() {
        tcp.port = IntOrString::Int(port);
    }
}
