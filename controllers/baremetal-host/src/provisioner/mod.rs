//! Provisioner abstraction.
//!
//! A `Provisioner` drives one host through the hardware-management backend.
//! Every operation is polled: callers invoke it once per reconciliation and
//! read the returned `ProvisionResult` to decide whether the work finished,
//! is still running, or failed.
//!
//! Two outcomes are kept apart on purpose:
//! - `Ok(result)` with a non-empty `error_message`: the operation failed on
//!   the host and the failure belongs in the host status.
//! - `Err(ProvisionerError)`: the backend could not be reached or answered
//!   unexpectedly; the reconciliation is retried without touching status.

pub mod ironic;

use async_trait::async_trait;
use crds::{BareMetalHost, HardwareDetails};
use ironic_client::IronicError;
use k8s_openapi::api::core::v1::Secret;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Transient provisioner failures.
#[derive(Debug, Error)]
pub enum ProvisionerError {
    /// Backend API error
    #[error("Ironic error: {0}")]
    Ironic(#[from] IronicError),

    /// Operation needs a registered host
    #[error("Host {0} is not registered with the provisioner")]
    NotRegistered(String),

    /// Backend reported a state the operation cannot work from
    #[error("Unexpected backend state: {0}")]
    UnexpectedState(String),

    /// Host or credentials are unusable
    #[error("Invalid host configuration: {0}")]
    InvalidHost(String),

    /// Controller bug
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Outcome of one provisioner call.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProvisionResult {
    /// Work is still in progress or the host changed; persist and requeue
    pub dirty: bool,
    /// How long to wait before polling again
    pub requeue_after: Duration,
    /// Set when the operation failed on the host
    pub error_message: String,
}

impl ProvisionResult {
    /// Nothing left to do
    pub fn operation_complete() -> Self {
        Self::default()
    }

    /// Work started or still running, poll again after `delay`
    pub fn operation_continuing(delay: Duration) -> Self {
        Self {
            dirty: true,
            requeue_after: delay,
            error_message: String::new(),
        }
    }

    /// The operation failed on the host
    pub fn operation_failed(message: impl Into<String>) -> Self {
        Self {
            dirty: false,
            requeue_after: Duration::ZERO,
            error_message: message.into(),
        }
    }

    pub fn failed(&self) -> bool {
        !self.error_message.is_empty()
    }
}

/// Observed hardware state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HardwareState {
    /// `None` when the backend does not know the power state
    pub powered_on: Option<bool>,
}

/// Data written to the config drive during provisioning.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HostConfigData {
    pub user_data: Option<String>,
    pub network_data: Option<String>,
    pub meta_data: Option<String>,
}

/// BMC username and password read from the credentials Secret.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct BmcCredentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for BmcCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BmcCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl BmcCredentials {
    /// Extract `username` and `password` from a credentials Secret
    pub fn from_secret(secret: &Secret) -> Result<Self, ProvisionerError> {
        let name = secret.metadata.name.as_deref().unwrap_or("<unknown>");
        let field = |key: &str| -> Result<String, ProvisionerError> {
            let bytes = secret
                .data
                .as_ref()
                .and_then(|data| data.get(key))
                .map(|value| value.0.clone())
                .or_else(|| {
                    secret
                        .string_data
                        .as_ref()
                        .and_then(|data| data.get(key))
                        .map(|value| value.clone().into_bytes())
                })
                .ok_or_else(|| {
                    ProvisionerError::InvalidHost(format!("secret {} has no {} field", name, key))
                })?;
            let value = String::from_utf8(bytes).map_err(|e| {
                ProvisionerError::InvalidHost(format!("secret {} field {} is not UTF-8: {}", name, key, e))
            })?;
            let value = value.trim().to_string();
            if value.is_empty() {
                return Err(ProvisionerError::InvalidHost(format!(
                    "secret {} field {} is empty",
                    name, key
                )));
            }
            Ok(value)
        };

        Ok(Self {
            username: field("username")?,
            password: field("password")?,
        })
    }
}

/// Operations on the hardware-management backend for one host.
///
/// An instance is scoped to a single reconciliation of a single host.
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Register the host and check the BMC answers with the current credentials.
    ///
    /// Returns the backend identifier of the host alongside the result.
    async fn validate_management_access(
        &mut self,
        credentials_changed: bool,
        force: bool,
    ) -> Result<(ProvisionResult, String), ProvisionerError>;

    /// Collect hardware details; `None` until inspection has finished.
    async fn inspect_hardware(
        &mut self,
        force: bool,
    ) -> Result<(ProvisionResult, Option<HardwareDetails>), ProvisionerError>;

    /// Refresh observed power state
    async fn update_hardware_state(&mut self) -> Result<HardwareState, ProvisionerError>;

    /// Take over a host that was provisioned elsewhere
    async fn adopt(&mut self, force: bool) -> Result<ProvisionResult, ProvisionerError>;

    /// Bring the host's cleaning state in line with its settings.
    ///
    /// `unprepared` means the applied settings differ from the requested
    /// ones. The returned flag is true when this call started a cleaning run.
    async fn prepare(&mut self, unprepared: bool) -> Result<(ProvisionResult, bool), ProvisionerError>;

    /// Write the image and boot the host
    async fn provision(&mut self, config: HostConfigData) -> Result<ProvisionResult, ProvisionerError>;

    /// Remove the image and return the host to the available pool
    async fn deprovision(&mut self, force: bool) -> Result<ProvisionResult, ProvisionerError>;

    /// Forget the host entirely
    async fn delete(&mut self) -> Result<ProvisionResult, ProvisionerError>;

    async fn power_on(&mut self) -> Result<ProvisionResult, ProvisionerError>;

    async fn power_off(&mut self) -> Result<ProvisionResult, ProvisionerError>;

    /// Whether the backend is up
    async fn is_ready(&mut self) -> Result<bool, ProvisionerError>;

    /// Whether another host may enter a capacity-limited state. Must not
    /// change any backend state.
    async fn has_provisioning_capacity(&mut self) -> Result<bool, ProvisionerError>;
}

/// Builds a provisioner for one reconciliation.
pub trait ProvisionerFactory: Send + Sync {
    fn build(&self, host: &BareMetalHost, credentials: BmcCredentials) -> Box<dyn Provisioner>;
}
