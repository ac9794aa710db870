//! Kubernetes resource watchers.
//!
//! Drives reconciliation of `BareMetalHost` resources with
//! `kube_runtime::Controller`, which handles reconnection and retries.

use crate::error::ControllerError;
use crate::reconciler::Reconciler;
use crds::BareMetalHost;
use futures::StreamExt;
use kube::Api;
use kube_runtime::{Controller, controller::{Action, Config as ControllerConfig}, watcher};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

/// Requeue delay after a failed reconciliation
pub const ERROR_REQUEUE: Duration = Duration::from_secs(60);

/// Hosts reconciled in parallel
const CONCURRENCY: u16 = 10;

/// Quiet period after the last event before reconciling
const DEBOUNCE: Duration = Duration::from_secs(1);

/// Watches BareMetalHost resources for changes.
#[derive(Debug)]
pub struct Watcher {
    reconciler: Arc<Reconciler>,
    host_api: Api<BareMetalHost>,
}

impl Watcher {
    /// Creates a new watcher instance.
    pub fn new(reconciler: Arc<Reconciler>, host_api: Api<BareMetalHost>) -> Self {
        Self {
            reconciler,
            host_api,
        }
    }

    /// Runs the BareMetalHost controller loop until the watch stream ends.
    pub async fn watch_hosts(&self) -> Result<(), ControllerError> {
        info!("Starting BareMetalHost watcher");

        let controller_config = ControllerConfig::default()
            .debounce(DEBOUNCE)
            .concurrency(CONCURRENCY);

        Controller::new(self.host_api.clone(), watcher::Config::default())
            .with_config(controller_config)
            .run(reconcile, error_policy, Arc::clone(&self.reconciler))
            .for_each(|res| async move {
                match res {
                    Ok((host, _)) => debug!("Reconciled BareMetalHost {}", host),
                    Err(e) => error!("BareMetalHost controller error: {}", e),
                }
            })
            .await;

        info!("BareMetalHost watcher stopped");
        Ok(())
    }
}

async fn reconcile(host: Arc<BareMetalHost>, reconciler: Arc<Reconciler>) -> Result<Action, ControllerError> {
    reconciler.reconcile_host(&host).await
}

fn error_policy(host: Arc<BareMetalHost>, error: &ControllerError, _reconciler: Arc<Reconciler>) -> Action {
    error!(
        "Reconciliation error for BareMetalHost {}/{}: {}",
        host.metadata.namespace.as_deref().unwrap_or("<unknown>"),
        host.metadata.name.as_deref().unwrap_or("<unknown>"),
        error
    );
    Action::requeue(ERROR_REQUEUE)
}
