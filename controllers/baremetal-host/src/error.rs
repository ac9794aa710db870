//! Controller-specific error types.
//!
//! This module defines the errors surfaced by the BareMetalHost Controller
//! that are not covered by upstream library errors.

use crate::metrics::MetricsError;
use crate::provisioner::ProvisionerError;
use ironic_client::IronicError;
use kube::Error as KubeError;
use thiserror::Error;

/// Errors that can occur in the BareMetalHost Controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Ironic API error
    #[error("Ironic error: {0}")]
    Ironic(#[from] IronicError),

    /// Provisioner backend failed transiently
    #[error("Provisioner error: {0}")]
    Provisioner(#[from] ProvisionerError),

    /// Metrics registration or encoding failed
    #[error("Metrics error: {0}")]
    Metrics(#[from] MetricsError),

    /// Status or patch body could not be serialized
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Object is missing a field the controller relies on
    #[error("Missing field: {0}")]
    MissingField(String),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),

    /// Metrics/probe server failed
    #[error("Server error: {0}")]
    Server(#[from] std::io::Error),
}
