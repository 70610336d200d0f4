//! # Spinnaker Operator
//!
//! A Kubernetes operator that deploys Spinnaker from a declarative `SpinnakerService`
//! resource and keeps it converged.
//!
//! Each reconciliation asks the change detectors whether the cluster already matches
//! the resource. Only when it does not are manifests regenerated, transformed and
//! applied.

use anyhow::Result;
use clap::Parser;
use spinnaker_operator::config::{self, ControllerConfig};
use spinnaker_operator::runtime::{initialization, watch_loop};

/// Command line flags; each overrides the matching environment variable
#[derive(Debug, Parser)]
#[command(name = "spinnaker-operator", version, about)]
struct Cli {
    /// Only watch SpinnakerService resources in this namespace
    #[arg(long, env = "WATCH_NAMESPACE")]
    namespace: Option<String>,

    /// Base URL of the manifest generator
    #[arg(long, env = "GENERATOR_URL")]
    generator_url: Option<String>,

    /// Port of the metrics and probe server
    #[arg(long, env = "METRICS_PORT")]
    metrics_port: Option<u16>,
}

impl Cli {
    fn apply(self, config: &mut ControllerConfig) {
        if let Some(namespace) = self.namespace.filter(|ns| !ns.is_empty()) {
            config.watch_namespace = Some(namespace);
        }
        if let Some(url) = self.generator_url {
            config.generator_url = url;
        }
        if let Some(port) = self.metrics_port {
            config.metrics_port = port;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut settings = ControllerConfig::from_env();
    cli.apply(&mut settings);
    let controller_config = config::shared(settings);

    let init = initialization::initialize(controller_config).await?;
    watch_loop::run_watch_loop(
        init.client,
        init.services,
        init.reconciler,
        init.server_state,
        init.controller_config,
    )
    .await
}
