//! Test utilities for unit testing the host state machine
//!
//! Provides a host builder, a default reconcile context and a provisioner
//! whose results are set by the test.

#[cfg(test)]
use crate::provisioner::{
    HardwareState, HostConfigData, ProvisionResult, Provisioner, ProvisionerError,
};
#[cfg(test)]
use crate::reconcile_info::{HostRequest, ReconcileInfo};
#[cfg(test)]
use async_trait::async_trait;
#[cfg(test)]
use crds::*;
#[cfg(test)]
use k8s_openapi::api::core::v1::Secret;
#[cfg(test)]
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

/// Builder for test hosts in a given provisioning state
#[cfg(test)]
pub struct HostBuilder {
    host: BareMetalHost,
}

/// Host that is online, wants an image and has verified credentials
#[cfg(test)]
pub fn host(state: ProvisioningState) -> HostBuilder {
    let creds = CredentialsStatus {
        credentials: Some(SecretReference {
            name: "secretRefName".to_string(),
            namespace: "secretNs".to_string(),
        }),
        credentials_version: "100".to_string(),
    };

    let mut host = BareMetalHost::new(
        "myhost",
        BareMetalHostSpec {
            online: true,
            image: Some(Image {
                url: "not-empty".to_string(),
                ..Default::default()
            }),
            root_device_hints: Some(RootDeviceHints::default()),
            ..Default::default()
        },
    );
    host.metadata.namespace = Some("myns".to_string());
    host.status = Some(BareMetalHostStatus {
        provisioning: ProvisionStatus {
            state,
            boot_mode: Some(DEFAULT_BOOT_MODE),
            // empty image: needs provisioning
            image: Image::default(),
            ..Default::default()
        },
        good_credentials: creds.clone(),
        tried_credentials: creds,
        operational_status: OperationalStatus::Ok,
        ..Default::default()
    });

    HostBuilder { host }
}

#[cfg(test)]
impl HostBuilder {
    pub fn build(self) -> BareMetalHost {
        self.host
    }

    pub fn externally_provisioned(mut self) -> Self {
        self.host.spec.externally_provisioned = true;
        self
    }

    pub fn image_url(mut self, url: &str) -> Self {
        self.host.spec.image = Some(Image {
            url: url.to_string(),
            ..Default::default()
        });
        self
    }

    /// Image already written (or being written) to the host
    pub fn status_image(mut self, url: &str) -> Self {
        self.host.status_mut().provisioning.image.url = url.to_string();
        self
    }

    pub fn without_image(mut self) -> Self {
        self.host.spec.image = None;
        self
    }

    pub fn status_error(mut self, error_type: ErrorType, message: &str, count: u32) -> Self {
        let status = self.host.status_mut();
        status.operational_status = OperationalStatus::Error;
        status.error_type = Some(error_type);
        status.error_message = message.to_string();
        status.error_count = count;
        self
    }

    pub fn operational_status(mut self, operational_status: OperationalStatus) -> Self {
        self.host.status_mut().operational_status = operational_status;
        self
    }
}

/// Secret matching the host's good credentials
#[cfg(test)]
pub fn make_default_reconcile_info(host: BareMetalHost) -> ReconcileInfo {
    let good = host
        .status
        .as_ref()
        .map(|status| status.good_credentials.clone())
        .unwrap_or_default();
    let reference = good.credentials.unwrap_or_default();
    let secret = Secret {
        metadata: ObjectMeta {
            name: Some(reference.name),
            namespace: Some(reference.namespace),
            resource_version: Some(good.credentials_version),
            ..Default::default()
        },
        ..Default::default()
    };
    ReconcileInfo::new(HostRequest::from_host(&host), host, Some(secret))
}

/// Provisioner returning the same result from every operation
#[cfg(test)]
#[derive(Debug, Default)]
pub struct MockProvisioner {
    pub capacity: bool,
    pub next_result: ProvisionResult,
    /// Overrides `next_result` for `provision` only
    pub provision_result: Option<ProvisionResult>,
}

#[cfg(test)]
impl MockProvisioner {
    /// Mock with provisioning capacity available
    pub fn new() -> Self {
        Self {
            capacity: true,
            next_result: ProvisionResult::default(),
            provision_result: None,
        }
    }

    pub fn set_capacity(&mut self, capacity: bool) {
        self.capacity = capacity;
    }

    pub fn set_next_error(&mut self, message: &str) {
        self.next_result = ProvisionResult::operation_failed(message);
    }

    /// Deploy still running, every other operation unchanged
    pub fn set_provision_in_progress(&mut self) {
        self.provision_result = Some(ProvisionResult::operation_continuing(std::time::Duration::from_secs(10)));
    }

    pub fn set_next_result(&mut self, dirty: bool) {
        self.next_result = ProvisionResult {
            dirty,
            ..Default::default()
        };
    }
}

#[cfg(test)]
#[async_trait]
impl Provisioner for MockProvisioner {
    async fn validate_management_access(
        &mut self,
        _credentials_changed: bool,
        _force: bool,
    ) -> Result<(ProvisionResult, String), ProvisionerError> {
        Ok((self.next_result.clone(), String::new()))
    }

    async fn inspect_hardware(
        &mut self,
        _force: bool,
    ) -> Result<(ProvisionResult, Option<HardwareDetails>), ProvisionerError> {
        Ok((self.next_result.clone(), Some(HardwareDetails::default())))
    }

    async fn update_hardware_state(&mut self) -> Result<HardwareState, ProvisionerError> {
        Ok(HardwareState::default())
    }

    async fn adopt(&mut self, _force: bool) -> Result<ProvisionResult, ProvisionerError> {
        Ok(self.next_result.clone())
    }

    async fn prepare(&mut self, _unprepared: bool) -> Result<(ProvisionResult, bool), ProvisionerError> {
        Ok((self.next_result.clone(), false))
    }

    async fn provision(&mut self, _config: HostConfigData) -> Result<ProvisionResult, ProvisionerError> {
        Ok(self.provision_result.clone().unwrap_or_else(|| self.next_result.clone()))
    }

    async fn deprovision(&mut self, _force: bool) -> Result<ProvisionResult, ProvisionerError> {
        Ok(self.next_result.clone())
    }

    async fn delete(&mut self) -> Result<ProvisionResult, ProvisionerError> {
        Ok(self.next_result.clone())
    }

    async fn power_on(&mut self) -> Result<ProvisionResult, ProvisionerError> {
        Ok(self.next_result.clone())
    }

    async fn power_off(&mut self) -> Result<ProvisionResult, ProvisionerError> {
        Ok(self.next_result.clone())
    }

    async fn is_ready(&mut self) -> Result<bool, ProvisionerError> {
        Ok(true)
    }

    async fn has_provisioning_capacity(&mut self) -> Result<bool, ProvisionerError> {
        Ok(self.capacity)
    }
}

/// UUID of the Ironic node backing [`ironic_host`]
#[cfg(test)]
pub const NODE_UUID: &str = "33ce8659-7400-4c68-9535-d10766f07a58";

/// Registered host with a redfish BMC, ready for Ironic provisioner tests
#[cfg(test)]
pub fn ironic_host() -> BareMetalHost {
    let mut host = host(ProvisioningState::Ready).build();
    host.spec.bmc = Some(BmcDetails {
        address: "redfish://192.168.111.1:8000/redfish/v1/Systems/1".to_string(),
        credentials_name: "myhost-bmc-secret".to_string(),
        disable_certificate_verification: true,
    });
    host.status_mut().provisioning.id = NODE_UUID.to_string();
    host
}

/// Ironic provisioner talking to the given mock
#[cfg(test)]
pub fn ironic_provisioner(
    client: &ironic_client::MockIronicClient,
    host: BareMetalHost,
) -> crate::provisioner::ironic::IronicProvisioner {
    use crate::provisioner::ironic::{IronicProvisioner, IronicSettings};
    use std::sync::Arc;

    IronicProvisioner::new(
        Arc::new(client.clone()),
        Arc::new(IronicSettings {
            deploy_kernel_url: Some("http://172.22.0.1/images/ironic-python-agent.kernel".to_string()),
            deploy_ramdisk_url: Some("http://172.22.0.1/images/ironic-python-agent.initramfs".to_string()),
            provisioning_limit: 2,
        }),
        host,
        crate::provisioner::BmcCredentials {
            username: "admin".to_string(),
            password: "password".to_string(),
        },
    )
}
