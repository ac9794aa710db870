//! Controller configuration loaded from the environment.

use crate::error::ControllerError;
use std::env;
use std::net::SocketAddr;
use tracing::info;

/// Default Ironic endpoint inside a metal3 deployment
pub const DEFAULT_IRONIC_ENDPOINT: &str = "http://ironic.metal3:6385";

/// Default number of hosts allowed to inspect or provision at once
pub const DEFAULT_PROVISIONING_LIMIT: usize = 20;

/// Default listen address for `/metrics` and the probes
pub const DEFAULT_METRICS_ADDR: &str = "0.0.0.0:8080";

/// Runtime configuration of the controller
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Ironic API endpoint
    pub ironic_endpoint: String,
    /// HTTP basic auth for Ironic, if configured
    pub ironic_credentials: Option<(String, String)>,
    /// Maximum hosts concurrently in a capacity-limited state
    pub provisioning_limit: usize,
    /// Namespace to watch, all namespaces when unset
    pub namespace: Option<String>,
    /// Address of the metrics/probe server
    pub metrics_addr: SocketAddr,
    /// Deploy ramdisk kernel handed to Ironic on enrollment
    pub deploy_kernel_url: Option<String>,
    /// Deploy ramdisk image handed to Ironic on enrollment
    pub deploy_ramdisk_url: Option<String>,
}

impl ControllerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, ControllerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let ironic_endpoint = lookup("IRONIC_ENDPOINT")
            .unwrap_or_else(|| DEFAULT_IRONIC_ENDPOINT.to_string());

        let ironic_credentials = match (lookup("IRONIC_USERNAME"), lookup("IRONIC_PASSWORD")) {
            (Some(username), Some(password)) => Some((username, password)),
            (None, None) => None,
            _ => {
                return Err(ControllerError::InvalidConfig(
                    "IRONIC_USERNAME and IRONIC_PASSWORD must be set together".to_string(),
                ));
            }
        };

        let provisioning_limit = match lookup("PROVISIONING_LIMIT") {
            Some(value) => value.parse::<usize>().map_err(|e| {
                ControllerError::InvalidConfig(format!(
                    "PROVISIONING_LIMIT must be a positive integer, got {:?}: {}",
                    value, e
                ))
            })?,
            None => DEFAULT_PROVISIONING_LIMIT,
        };
        if provisioning_limit == 0 {
            return Err(ControllerError::InvalidConfig(
                "PROVISIONING_LIMIT must be greater than zero".to_string(),
            ));
        }

        let metrics_addr_raw =
            lookup("METRICS_ADDR").unwrap_or_else(|| DEFAULT_METRICS_ADDR.to_string());
        let metrics_addr = metrics_addr_raw.parse::<SocketAddr>().map_err(|e| {
            ControllerError::InvalidConfig(format!(
                "METRICS_ADDR is not a socket address ({}): {}",
                metrics_addr_raw, e
            ))
        })?;

        Ok(Self {
            ironic_endpoint,
            ironic_credentials,
            provisioning_limit,
            namespace: lookup("WATCH_NAMESPACE").filter(|ns| !ns.is_empty()),
            metrics_addr,
            deploy_kernel_url: lookup("DEPLOY_KERNEL_URL"),
            deploy_ramdisk_url: lookup("DEPLOY_RAMDISK_URL"),
        })
    }

    /// Log the effective configuration (without secrets)
    pub fn log(&self) {
        info!("Configuration:");
        info!("  Ironic endpoint: {}", self.ironic_endpoint);
        info!(
            "  Ironic auth: {}",
            if self.ironic_credentials.is_some() { "http basic" } else { "none" }
        );
        info!("  Provisioning limit: {}", self.provisioning_limit);
        info!("  Namespace: {}", self.namespace.as_deref().unwrap_or("all namespaces"));
        info!("  Metrics address: {}", self.metrics_addr);
    }
}
