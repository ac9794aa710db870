//! Main controller implementation.
//!
//! This module contains the `Controller` struct that wires the Ironic
//! provisioner, the host watcher and the metrics server together.

use crate::config::ControllerConfig;
use crate::error::ControllerError;
use crate::metrics::ControllerMetrics;
use crate::provisioner::ironic::{IronicProvisionerFactory, IronicSettings};
use crate::reconciler::Reconciler;
use crate::server::{self, ServerState};
use crate::watcher::Watcher;
use crds::BareMetalHost;
use ironic_client::{IronicClient, IronicClientTrait};
use kube::{Api, Client};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Main controller for BareMetalHost management.
#[derive(Debug)]
pub struct Controller {
    host_watcher: JoinHandle<Result<(), ControllerError>>,
    metrics_server: JoinHandle<Result<(), ControllerError>>,
}

impl Controller {
    /// Creates a new controller instance and starts its background tasks.
    pub async fn new(config: ControllerConfig) -> Result<Self, ControllerError> {
        info!("Initializing BareMetalHost Controller");

        let kube_client = Client::try_default().await?;

        let mut ironic = IronicClient::new(config.ironic_endpoint.clone())?;
        if let Some((username, password)) = config.ironic_credentials.clone() {
            ironic = ironic.with_basic_auth(username, password);
        }
        let ironic: Arc<dyn IronicClientTrait> = Arc::new(ironic);

        // Hosts keep reconciling while Ironic is down; readiness reports it.
        match ironic.check_available().await {
            Ok(()) => info!("Ironic API reachable at {}", config.ironic_endpoint),
            Err(e) => warn!("Ironic API at {} not reachable yet: {}", config.ironic_endpoint, e),
        }

        let metrics = ControllerMetrics::new()?;
        let factory = IronicProvisionerFactory::new(
            Arc::clone(&ironic),
            IronicSettings {
                deploy_kernel_url: config.deploy_kernel_url.clone(),
                deploy_ramdisk_url: config.deploy_ramdisk_url.clone(),
                provisioning_limit: config.provisioning_limit,
            },
        );

        let host_api: Api<BareMetalHost> = match config.namespace.as_deref() {
            Some(ns) => Api::namespaced(kube_client.clone(), ns),
            None => Api::all(kube_client.clone()),
        };

        let reconciler = Arc::new(Reconciler::new(kube_client, Arc::new(factory), metrics.clone()));
        let watcher_instance = Watcher::new(reconciler, host_api);

        let host_watcher = tokio::spawn(async move { watcher_instance.watch_hosts().await });

        let state = ServerState { metrics, ironic };
        let metrics_addr = config.metrics_addr;
        let metrics_server = tokio::spawn(async move { server::serve(metrics_addr, state).await });

        Ok(Self {
            host_watcher,
            metrics_server,
        })
    }

    /// Runs the controller until shutdown.
    pub async fn run(mut self) -> Result<(), ControllerError> {
        info!("BareMetalHost Controller running");

        // Wait for either task to exit (they should run forever)
        tokio::select! {
            result = &mut self.host_watcher => {
                result.map_err(|e| ControllerError::Watch(format!("BareMetalHost watcher panicked: {}", e)))??;
            }
            result = &mut self.metrics_server => {
                result.map_err(|e| ControllerError::Watch(format!("Metrics server panicked: {}", e)))??;
            }
        }

        Ok(())
    }
}
