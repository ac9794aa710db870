//! BareMetalHost CRD
//!
//! Declares a physical machine, how to reach its BMC, and the image it
//! should run. The status block is owned by the baremetal-host controller
//! and records where the host is in its provisioning lifecycle.

use crate::credentials::{CredentialsStatus, SecretReference};
use crate::hardware::HardwareDetails;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[kube(
    group = "metal3.io",
    version = "v1alpha1",
    kind = "BareMetalHost",
    namespaced,
    status = "BareMetalHostStatus",
    shortname = "bmh",
    printcolumn = r#"{"name":"State","type":"string","jsonPath":".status.provisioning.state"}"#,
    printcolumn = r#"{"name":"Status","type":"string","jsonPath":".status.operationalStatus"}"#,
    printcolumn = r#"{"name":"Online","type":"boolean","jsonPath":".spec.online"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct BareMetalHostSpec {
    /// Whether the host should be powered on
    #[serde(default)]
    pub online: bool,

    /// How to reach the baseboard management controller
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bmc: Option<BmcDetails>,

    /// MAC address of the NIC the host boots from
    #[serde(
        default,
        rename = "bootMACAddress",
        skip_serializing_if = "Option::is_none"
    )]
    pub boot_mac_address: Option<String>,

    /// Firmware boot mode (defaults to UEFI)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boot_mode: Option<BootMode>,

    /// Image to write to the host
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<Image>,

    /// Host was provisioned by something other than this controller
    #[serde(default)]
    pub externally_provisioned: bool,

    /// Hints for selecting the root disk
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_device_hints: Option<RootDeviceHints>,

    /// Secret holding cloud-init user data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_data: Option<SecretReference>,

    /// Secret holding network configuration data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_data: Option<SecretReference>,

    /// Secret holding instance metadata
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta_data: Option<SecretReference>,
}

/// Baseboard management controller connection details
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct BmcDetails {
    /// BMC URL (e.g. "ipmi://10.0.0.10", "redfish://bmc.example/redfish/v1/Systems/1")
    pub address: String,

    /// Name of the Secret holding `username` and `password`
    pub credentials_name: String,

    /// Skip TLS verification when talking to the BMC
    #[serde(default)]
    pub disable_certificate_verification: bool,
}

/// Image to provision onto the host
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Image {
    /// Location of the image
    #[serde(default)]
    pub url: String,

    /// Checksum value or URL of a checksum file
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub checksum: String,

    /// Checksum algorithm ("md5", "sha256", "sha512")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum_type: Option<String>,

    /// Disk format ("raw", "qcow2", "vdi", "vmdk", "live-iso")
    #[serde(default, rename = "format", skip_serializing_if = "Option::is_none")]
    pub disk_format: Option<String>,
}

/// Root disk selection hints
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct RootDeviceHints {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hctl: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vendor: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serial_number: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_size_gigabytes: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wwn: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotational: Option<bool>,
}

/// Firmware boot mode
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash, Default)]
pub enum BootMode {
    #[default]
    #[serde(rename = "UEFI")]
    Uefi,

    #[serde(rename = "UEFISecureBoot")]
    UefiSecureBoot,

    #[serde(rename = "legacy")]
    Legacy,
}

/// Boot mode used when the spec does not ask for one
pub const DEFAULT_BOOT_MODE: BootMode = BootMode::Uefi;

impl BootMode {
    /// Wire value
    pub fn as_str(self) -> &'static str {
        match self {
            BootMode::Uefi => "UEFI",
            BootMode::UefiSecureBoot => "UEFISecureBoot",
            BootMode::Legacy => "legacy",
        }
    }
}

impl fmt::Display for BootMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a host is in its provisioning lifecycle
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash, Default)]
pub enum ProvisioningState {
    /// Freshly created, not yet looked at
    #[default]
    #[serde(rename = "")]
    None,

    /// No BMC details, nothing can be done
    #[serde(rename = "unmanaged")]
    Unmanaged,

    #[serde(rename = "registering")]
    Registering,

    #[serde(rename = "inspecting")]
    Inspecting,

    #[serde(rename = "match profile")]
    MatchProfile,

    #[serde(rename = "preparing")]
    Preparing,

    #[serde(rename = "ready")]
    Ready,

    #[serde(rename = "provisioning")]
    Provisioning,

    #[serde(rename = "provisioned")]
    Provisioned,

    #[serde(rename = "externally provisioned")]
    ExternallyProvisioned,

    #[serde(rename = "deprovisioning")]
    Deprovisioning,

    #[serde(rename = "deleting")]
    Deleting,
}

impl ProvisioningState {
    /// Wire value
    pub fn as_str(self) -> &'static str {
        match self {
            ProvisioningState::None => "",
            ProvisioningState::Unmanaged => "unmanaged",
            ProvisioningState::Registering => "registering",
            ProvisioningState::Inspecting => "inspecting",
            ProvisioningState::MatchProfile => "match profile",
            ProvisioningState::Preparing => "preparing",
            ProvisioningState::Ready => "ready",
            ProvisioningState::Provisioning => "provisioning",
            ProvisioningState::Provisioned => "provisioned",
            ProvisioningState::ExternallyProvisioned => "externally provisioned",
            ProvisioningState::Deprovisioning => "deprovisioning",
            ProvisioningState::Deleting => "deleting",
        }
    }
}

impl fmt::Display for ProvisioningState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse health of the host
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash, Default)]
pub enum OperationalStatus {
    #[default]
    #[serde(rename = "OK")]
    Ok,

    #[serde(rename = "discovered")]
    Discovered,

    #[serde(rename = "error")]
    Error,

    /// Waiting for provisioning capacity
    #[serde(rename = "delayed")]
    Delayed,
}

/// Category of the last failure
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash)]
pub enum ErrorType {
    #[serde(rename = "registration error")]
    RegistrationError,

    /// Registration failed for a host that is already provisioned
    #[serde(rename = "provisioned registration error")]
    ProvisionedRegistrationError,

    #[serde(rename = "inspection error")]
    InspectionError,

    #[serde(rename = "preparation error")]
    PreparationError,

    #[serde(rename = "provisioning error")]
    ProvisioningError,

    #[serde(rename = "deprovisioning error")]
    DeprovisioningError,

    #[serde(rename = "power management error")]
    PowerManagementError,
}

impl ErrorType {
    /// Wire value
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorType::RegistrationError => "registration error",
            ErrorType::ProvisionedRegistrationError => "provisioned registration error",
            ErrorType::InspectionError => "inspection error",
            ErrorType::PreparationError => "preparation error",
            ErrorType::ProvisioningError => "provisioning error",
            ErrorType::DeprovisioningError => "deprovisioning error",
            ErrorType::PowerManagementError => "power management error",
        }
    }
}

impl fmt::Display for ErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Provisioning progress recorded by the controller
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionStatus {
    /// Current lifecycle state
    #[serde(default)]
    pub state: ProvisioningState,

    /// Backend identifier of the host
    #[serde(default, rename = "ID")]
    pub id: String,

    /// Image most recently written to the host
    #[serde(default)]
    pub image: Image,

    /// Boot mode applied to the host
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boot_mode: Option<BootMode>,

    /// Root device hints the host was prepared with
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_device_hints: Option<RootDeviceHints>,
}

/// Start and end of a lifecycle operation
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct OperationMetric {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<chrono::DateTime<chrono::Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<chrono::DateTime<chrono::Utc>>,
}

impl OperationMetric {
    /// Duration of a finished operation
    pub fn duration(&self) -> Option<chrono::Duration> {
        match (self.start, self.end) {
            (Some(start), Some(end)) if end >= start => Some(end - start),
            _ => None,
        }
    }
}

/// Timings of the long-running lifecycle operations
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct OperationHistory {
    #[serde(default)]
    pub register: OperationMetric,

    #[serde(default)]
    pub inspect: OperationMetric,

    #[serde(default)]
    pub provision: OperationMetric,

    #[serde(default)]
    pub deprovision: OperationMetric,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct BareMetalHostStatus {
    #[serde(default)]
    pub operational_status: OperationalStatus,

    /// Set whenever operational status is `error`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<ErrorType>,

    /// Consecutive failures, drives retry backoff
    #[serde(default)]
    pub error_count: u32,

    #[serde(default)]
    pub error_message: String,

    #[serde(default)]
    pub provisioning: ProvisionStatus,

    /// Last credentials verified against the BMC
    #[serde(default)]
    pub good_credentials: CredentialsStatus,

    /// Last credentials tried against the BMC
    #[serde(default)]
    pub tried_credentials: CredentialsStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hardware: Option<HardwareDetails>,

    #[serde(default)]
    pub powered_on: bool,

    #[serde(default)]
    pub operation_history: OperationHistory,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<chrono::DateTime<chrono::Utc>>,
}

impl BareMetalHost {
    /// Status block, created on first use
    pub fn status_mut(&mut self) -> &mut BareMetalHostStatus {
        self.status.get_or_insert_with(BareMetalHostStatus::default)
    }

    /// Current provisioning state (`None` when the status block is missing)
    pub fn provisioning_state(&self) -> ProvisioningState {
        self.status
            .as_ref()
            .map(|s| s.provisioning.state)
            .unwrap_or_default()
    }

    pub fn operational_status(&self) -> OperationalStatus {
        self.status
            .as_ref()
            .map(|s| s.operational_status)
            .unwrap_or_default()
    }

    pub fn error_type(&self) -> Option<ErrorType> {
        self.status.as_ref().and_then(|s| s.error_type)
    }

    pub fn error_count(&self) -> u32 {
        self.status.as_ref().map_or(0, |s| s.error_count)
    }

    /// Set the operational status, returning whether it changed
    pub fn set_operational_status(&mut self, status: OperationalStatus) -> bool {
        let current = &mut self.status_mut().operational_status;
        if *current == status {
            return false;
        }
        *current = status;
        true
    }

    /// Record a failure and bump the error count
    pub fn set_error(&mut self, error_type: ErrorType, message: impl Into<String>) {
        let status = self.status_mut();
        status.operational_status = OperationalStatus::Error;
        status.error_type = Some(error_type);
        status.error_message = message.into();
        status.error_count += 1;
    }

    /// Return to `OK`, dropping the error type and message
    ///
    /// The error count is kept so backoff survives until a state completes.
    /// A provisioned registration error is only dropped on a state change,
    /// so it is left untouched here. Returns whether anything changed.
    pub fn clear_error(&mut self) -> bool {
        if self.error_type() == Some(ErrorType::ProvisionedRegistrationError) {
            return false;
        }
        let status = self.status_mut();
        let mut dirty = false;
        if status.operational_status != OperationalStatus::Ok {
            status.operational_status = OperationalStatus::Ok;
            dirty = true;
        }
        if status.error_type.take().is_some() {
            dirty = true;
        }
        if !status.error_message.is_empty() {
            status.error_message.clear();
            dirty = true;
        }
        dirty
    }

    /// Mark the host as waiting for provisioning capacity
    ///
    /// A provisioned registration error is carried through the delay.
    pub fn set_delayed(&mut self) -> bool {
        let status = self.status_mut();
        let mut dirty = false;
        if status.operational_status != OperationalStatus::Delayed {
            status.operational_status = OperationalStatus::Delayed;
            dirty = true;
        }
        if status.error_type != Some(ErrorType::ProvisionedRegistrationError) {
            if status.error_type.take().is_some() {
                dirty = true;
            }
            if !status.error_message.is_empty() {
                status.error_message.clear();
                dirty = true;
            }
        }
        dirty
    }

    /// Leave the delayed status, restoring a carried error if there is one
    pub fn clear_delayed(&mut self) -> bool {
        let status = self.status_mut();
        let next = if status.error_type.is_some() {
            OperationalStatus::Error
        } else {
            OperationalStatus::Ok
        };
        if status.operational_status == next {
            return false;
        }
        status.operational_status = next;
        true
    }

    /// BMC address and credentials Secret are both known
    pub fn has_bmc_details(&self) -> bool {
        self.spec
            .bmc
            .as_ref()
            .is_some_and(|bmc| !bmc.address.is_empty() && !bmc.credentials_name.is_empty())
    }

    /// Host is online, has an image, and nothing has been written yet
    pub fn needs_provisioning(&self) -> bool {
        if !self.spec.online {
            return false;
        }
        let Some(image) = &self.spec.image else {
            return false;
        };
        if image.url.is_empty() {
            return false;
        }
        self.status
            .as_ref()
            .is_none_or(|s| s.provisioning.image.url.is_empty())
    }

    /// Record the BMC credentials Secret revision being tried
    pub fn update_tried_credentials(&mut self, secret: &k8s_openapi::api::core::v1::Secret) {
        self.status_mut().tried_credentials = CredentialsStatus::from_secret(secret);
    }

    /// Record the BMC credentials Secret revision as verified
    pub fn update_good_credentials(&mut self, secret: &k8s_openapi::api::core::v1::Secret) {
        self.status_mut().good_credentials = CredentialsStatus::from_secret(secret);
    }

    /// Timing record of the operation carried out in `state`, if tracked
    pub fn operation_metric_mut(&mut self, state: ProvisioningState) -> Option<&mut OperationMetric> {
        let history = &mut self.status_mut().operation_history;
        match state {
            ProvisioningState::Registering => Some(&mut history.register),
            ProvisioningState::Inspecting => Some(&mut history.inspect),
            ProvisioningState::Provisioning => Some(&mut history.provision),
            ProvisioningState::Deprovisioning => Some(&mut history.deprovision),
            _ => None,
        }
    }

    /// "namespace/name" for logs and metric labels
    pub fn host_key(&self) -> String {
        format!(
            "{}/{}",
            self.metadata.namespace.as_deref().unwrap_or_default(),
            self.metadata.name.as_deref().unwrap_or_default()
        )
    }
}
