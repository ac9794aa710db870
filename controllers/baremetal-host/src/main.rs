//! BareMetalHost Controller
//!
//! Drives physical hosts through their provisioning lifecycle:
//! registration, inspection, preparation, provisioning and teardown.
//!
//! This controller reconciles `BareMetalHost` resources against the Ironic
//! bare metal service, holding hosts back while Ironic has no capacity for
//! more concurrent inspections or deployments.

mod action_result;
mod backoff;
mod config;
mod controller;
mod error;
mod host_actions;
mod host_state_machine;
#[cfg(test)]
mod host_state_machine_test;
mod metrics;
mod provisioner;
mod reconcile_info;
mod reconciler;
mod server;
#[cfg(test)]
mod test_utils;
mod watcher;

use crate::config::ControllerConfig;
use crate::error::ControllerError;
use controller::Controller;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    tracing_subscriber::fmt::init();

    // kube and reqwest both use rustls; pick the ring provider up front
    if rustls::crypto::ring::default_provider().install_default().is_err() {
        warn!("rustls crypto provider already installed");
    }

    info!("Starting BareMetalHost Controller");

    let config = ControllerConfig::from_env()?;
    config.log();

    // Initialize and run controller
    let controller = Controller::new(config).await?;
    controller.run().await?;

    Ok(())
}
