//! Prometheus metrics for the BareMetalHost Controller.
//!
//! | Metric | Type | Labels |
//! |--------|------|--------|
//! | `metal3_provisioning_delayed_total` | Counter | `host` |
//! | `metal3_host_registration_required_total` | Counter | `host` |
//! | `metal3_credentials_updated_total` | Counter | |
//! | `metal3_credentials_validated_total` | Counter | |
//! | `metal3_state_changes_total` | Counter | `from`, `to` |
//! | `metal3_host_errors_total` | Counter | `error_type` |
//! | `metal3_reconcile_total` | Counter | `result` |
//!
//! Counters that describe a status change are bumped from post-save
//! callbacks, so they only move once the status has been persisted.

use std::fmt;

use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use thiserror::Error;

/// Errors that can occur during metrics operations.
#[derive(Debug, Error)]
pub enum MetricsError {
    /// Failed to register a metric with Prometheus.
    #[error("failed to register metric: {0}")]
    RegistrationFailed(#[from] prometheus::Error),

    /// Failed to encode metrics output.
    #[error("failed to encode metrics: {0}")]
    EncodingFailed(String),
}

/// Counters exported by the controller, registered on a private registry.
///
/// Every counter is internally reference counted, so cloned handles can be
/// moved into post-save callbacks.
#[derive(Clone)]
pub struct ControllerMetrics {
    registry: Registry,
    delayed_provisioning_hosts: IntCounterVec,
    registration_required: IntCounterVec,
    credentials_updated: IntCounter,
    credentials_validated: IntCounter,
    state_changes: IntCounterVec,
    host_errors: IntCounterVec,
    reconciles: IntCounterVec,
}

impl fmt::Debug for ControllerMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ControllerMetrics").finish_non_exhaustive()
    }
}

impl ControllerMetrics {
    /// Creates the counters and registers them with a new registry.
    ///
    /// # Errors
    ///
    /// Returns an error if any metric fails to register.
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();

        let delayed_provisioning_hosts = IntCounterVec::new(
            Opts::new(
                "metal3_provisioning_delayed_total",
                "Times a host was held back because provisioning capacity was exhausted",
            ),
            &["host"],
        )?;
        registry.register(Box::new(delayed_provisioning_hosts.clone()))?;

        let registration_required = IntCounterVec::new(
            Opts::new(
                "metal3_host_registration_required_total",
                "Times a host had to be (re-)registered with the provisioner",
            ),
            &["host"],
        )?;
        registry.register(Box::new(registration_required.clone()))?;

        let credentials_updated = IntCounter::with_opts(Opts::new(
            "metal3_credentials_updated_total",
            "Times new BMC credentials were picked up",
        ))?;
        registry.register(Box::new(credentials_updated.clone()))?;

        let credentials_validated = IntCounter::with_opts(Opts::new(
            "metal3_credentials_validated_total",
            "Times BMC credentials were verified against the host",
        ))?;
        registry.register(Box::new(credentials_validated.clone()))?;

        let state_changes = IntCounterVec::new(
            Opts::new(
                "metal3_state_changes_total",
                "Provisioning state transitions",
            ),
            &["from", "to"],
        )?;
        registry.register(Box::new(state_changes.clone()))?;

        let host_errors = IntCounterVec::new(
            Opts::new("metal3_host_errors_total", "Host operation failures by type"),
            &["error_type"],
        )?;
        registry.register(Box::new(host_errors.clone()))?;

        let reconciles = IntCounterVec::new(
            Opts::new("metal3_reconcile_total", "Reconciliations by outcome"),
            &["result"],
        )?;
        registry.register(Box::new(reconciles.clone()))?;

        Ok(Self {
            registry,
            delayed_provisioning_hosts,
            registration_required,
            credentials_updated,
            credentials_validated,
            state_changes,
            host_errors,
            reconciles,
        })
    }

    /// Counter of capacity delays for one host ("namespace/name")
    pub fn delayed_provisioning_counter(&self, host: &str) -> IntCounter {
        self.delayed_provisioning_hosts.with_label_values(&[host])
    }

    /// Counter of registrations for one host ("namespace/name")
    pub fn registration_required_counter(&self, host: &str) -> IntCounter {
        self.registration_required.with_label_values(&[host])
    }

    pub fn credentials_updated_counter(&self) -> IntCounter {
        self.credentials_updated.clone()
    }

    pub fn credentials_validated_counter(&self) -> IntCounter {
        self.credentials_validated.clone()
    }

    pub fn state_change_counter(&self, from: &str, to: &str) -> IntCounter {
        self.state_changes.with_label_values(&[from, to])
    }

    pub fn host_error_counter(&self, error_type: &str) -> IntCounter {
        self.host_errors.with_label_values(&[error_type])
    }

    /// Count a finished reconciliation by `ActionResult::outcome` label
    pub fn reconcile_completed(&self, result: &str) {
        self.reconciles.with_label_values(&[result]).inc();
    }

    /// Encode all metrics in the Prometheus text exposition format.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails.
    pub fn encode_text(&self) -> Result<String, MetricsError> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(|e| MetricsError::EncodingFailed(e.to_string()))?;
        String::from_utf8(buffer).map_err(|e| MetricsError::EncodingFailed(e.to_string()))
    }
}
