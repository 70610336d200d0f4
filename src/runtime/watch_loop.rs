//! # Watch Loop
//!
//! Controller watch loop that monitors SpinnakerService resources, and the objects
//! generated for them, and triggers reconciliation when they change.

use crate::config::SharedControllerConfig;
use crate::constants::{MANAGED_BY_LABEL, OPERATOR_NAME};
use crate::controller::reconciler::{reconcile, Reconciler, TriggerSource};
use crate::controller::server::ServerState;
use crate::crd::SpinnakerService;
use crate::runtime::error_policy::{handle_reconciliation_error, handle_watch_stream_error};
use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Service;
use kube::api::Api;
use kube::Client;
use kube_runtime::{watcher, Controller};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{debug, info, warn, Instrument};

fn owned_api<K>(client: &Client, namespace: Option<&str>) -> Api<K>
where
    K: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope, DynamicType = ()>
        + Clone
        + serde::de::DeserializeOwned
        + std::fmt::Debug,
{
    match namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    }
}

/// Run the controller watch loop until a shutdown signal arrives.
///
/// The stream is restarted after it ends or after errors that drop it.
pub async fn run_watch_loop(
    client: Client,
    services: Api<SpinnakerService>,
    reconciler: Arc<Reconciler>,
    server_state: Arc<ServerState>,
    controller_config: SharedControllerConfig,
) -> Result<(), anyhow::Error> {
    info!("Starting controller watch loop...");

    let shutdown_state = server_state.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("Received shutdown signal (SIGINT/SIGTERM), initiating graceful shutdown...");
        shutdown_state.is_ready.store(false, Ordering::Relaxed);
        info!("Marked server as not ready, waiting for in-flight reconciliations to complete...");
    });

    let owned_selector = format!("{MANAGED_BY_LABEL}={OPERATOR_NAME}");

    loop {
        if !server_state.is_ready.load(Ordering::Relaxed) {
            info!("Shutdown requested, exiting watch loop");
            break;
        }

        let config = controller_config.read().await;
        let namespace = config.watch_namespace.clone();
        let restart_delay = config.watch_restart_delay_duration();
        drop(config);

        let owned = watcher::Config::default().labels(&owned_selector);
        Controller::new(services.clone(), watcher::Config::default().any_semantic())
            .owns(owned_api::<Deployment>(&client, namespace.as_deref()), owned.clone())
            .owns(owned_api::<Service>(&client, namespace.as_deref()), owned)
            .shutdown_on_signal()
            .run(
                |obj, ctx| reconcile(obj, ctx, TriggerSource::Watch),
                handle_reconciliation_error,
                reconciler.clone(),
            )
            .filter_map(move |x| async move {
                match &x {
                    Ok((obj, _action)) => {
                        debug!(resource = %obj.name, "watch.event.success");
                        Some(x)
                    }
                    Err(e) => {
                        let error_string = format!("{e:?}");
                        handle_watch_stream_error(&error_string, restart_delay)
                            .await
                            .map(|()| x)
                    }
                }
            })
            .for_each(|_| futures::future::ready(()))
            .instrument(tracing::info_span!("controller.watch", operation = "watch_loop"))
            .await;

        if !server_state.is_ready.load(Ordering::Relaxed) {
            info!("Shutdown requested, exiting watch loop");
            break;
        }

        let delay = controller_config
            .read()
            .await
            .watch_restart_delay_after_end_duration();
        warn!("Controller watch stream ended, restarting in {:?}...", delay);
        tokio::time::sleep(delay).await;
    }

    info!("Controller stopped gracefully");
    Ok(())
}
