//! Per-reconciliation context handed to the host state machine.

use crate::provisioner::HostConfigData;
use crds::BareMetalHost;
use k8s_openapi::api::core::v1::Secret;
use std::fmt;
use tracing::Span;

/// Side effect to run once the host status has been persisted
pub type PostSaveCallback = Box<dyn FnOnce() + Send>;

/// Identity of the host being reconciled
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HostRequest {
    pub namespace: String,
    pub name: String,
}

impl HostRequest {
    pub fn from_host(host: &BareMetalHost) -> Self {
        Self {
            namespace: host.metadata.namespace.clone().unwrap_or_default(),
            name: host.metadata.name.clone().unwrap_or_default(),
        }
    }
}

impl fmt::Display for HostRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

pub struct ReconcileInfo {
    pub request: HostRequest,
    pub host: BareMetalHost,
    /// BMC credentials Secret, when it could be read
    pub bmc_creds_secret: Option<Secret>,
    /// Config drive contents, loaded for hosts about to be provisioned
    pub host_config: HostConfigData,
    /// Run in order after a successful status write
    pub post_save_callbacks: Vec<PostSaveCallback>,
    pub span: Span,
}

impl ReconcileInfo {
    pub fn new(request: HostRequest, host: BareMetalHost, bmc_creds_secret: Option<Secret>) -> Self {
        let span = tracing::info_span!("reconcile", host = %request);
        Self {
            request,
            host,
            bmc_creds_secret,
            host_config: HostConfigData::default(),
            post_save_callbacks: Vec::new(),
            span,
        }
    }

    pub fn push_callback(&mut self, callback: impl FnOnce() + Send + 'static) {
        self.post_save_callbacks.push(Box::new(callback));
    }

    /// Drain and run the queued callbacks in the order they were added
    pub fn run_post_save_callbacks(&mut self) {
        for callback in self.post_save_callbacks.drain(..) {
            callback();
        }
    }
}
