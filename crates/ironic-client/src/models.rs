//! Ironic API data models
//!
//! Only the fields the controller reads or writes are modelled; unknown
//! fields in responses are ignored.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Ironic node provision state
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ProvisionState {
    #[serde(rename = "enroll")]
    Enroll,
    #[serde(rename = "verifying")]
    Verifying,
    #[serde(rename = "manageable")]
    Manageable,
    #[serde(rename = "available")]
    Available,
    #[serde(rename = "active")]
    Active,
    #[serde(rename = "deploying")]
    Deploying,
    #[serde(rename = "wait call-back")]
    DeployWait,
    #[serde(rename = "deploy failed")]
    DeployFail,
    #[serde(rename = "cleaning")]
    Cleaning,
    #[serde(rename = "clean wait")]
    CleanWait,
    #[serde(rename = "clean failed")]
    CleanFail,
    #[serde(rename = "inspecting")]
    Inspecting,
    #[serde(rename = "inspect wait")]
    InspectWait,
    #[serde(rename = "inspect failed")]
    InspectFail,
    #[serde(rename = "adopting")]
    Adopting,
    #[serde(rename = "adopt failed")]
    AdoptFail,
    #[serde(rename = "deleting")]
    Deleting,
    #[serde(rename = "error")]
    Error,
    /// Any state this client does not know about
    #[serde(other)]
    Unknown,
}

impl ProvisionState {
    pub fn as_str(self) -> &'static str {
        match self {
            ProvisionState::Enroll => "enroll",
            ProvisionState::Verifying => "verifying",
            ProvisionState::Manageable => "manageable",
            ProvisionState::Available => "available",
            ProvisionState::Active => "active",
            ProvisionState::Deploying => "deploying",
            ProvisionState::DeployWait => "wait call-back",
            ProvisionState::DeployFail => "deploy failed",
            ProvisionState::Cleaning => "cleaning",
            ProvisionState::CleanWait => "clean wait",
            ProvisionState::CleanFail => "clean failed",
            ProvisionState::Inspecting => "inspecting",
            ProvisionState::InspectWait => "inspect wait",
            ProvisionState::InspectFail => "inspect failed",
            ProvisionState::Adopting => "adopting",
            ProvisionState::AdoptFail => "adopt failed",
            ProvisionState::Deleting => "deleting",
            ProvisionState::Error => "error",
            ProvisionState::Unknown => "unknown",
        }
    }

    /// States in which the conductor is actively working on the node
    pub fn is_busy(self) -> bool {
        matches!(
            self,
            ProvisionState::Inspecting
                | ProvisionState::InspectWait
                | ProvisionState::Deploying
                | ProvisionState::DeployWait
                | ProvisionState::Cleaning
                | ProvisionState::CleanWait
        )
    }
}

impl fmt::Display for ProvisionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Power state as reported by Ironic
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PowerState {
    #[serde(rename = "power on")]
    On,
    #[serde(rename = "power off")]
    Off,
    #[serde(other)]
    Unknown,
}

/// Requested power state change
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PowerTarget {
    #[serde(rename = "power on")]
    On,
    #[serde(rename = "power off")]
    Off,
    #[serde(rename = "rebooting")]
    Reboot,
}

/// Provision state change verbs
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProvisionTarget {
    Manage,
    Provide,
    Inspect,
    Clean,
    Active,
    Deleted,
    Adopt,
    Abort,
}

/// A single manual cleaning step
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CleanStep {
    pub interface: String,
    pub step: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub args: Map<String, Value>,
}

/// Body of `PUT /v1/nodes/{node}/states/provision`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProvisionStateOpts {
    pub target: ProvisionTarget,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clean_steps: Option<Vec<CleanStep>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configdrive: Option<Value>,
}

impl ProvisionStateOpts {
    /// Plain state change without steps or config drive
    pub fn new(target: ProvisionTarget) -> Self {
        Self {
            target,
            clean_steps: None,
            configdrive: None,
        }
    }
}

/// Ironic node
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Node {
    pub uuid: String,

    #[serde(default)]
    pub name: Option<String>,

    pub provision_state: ProvisionState,

    #[serde(default)]
    pub target_provision_state: Option<String>,

    #[serde(default)]
    pub power_state: Option<PowerState>,

    #[serde(default)]
    pub target_power_state: Option<PowerState>,

    #[serde(default)]
    pub maintenance: bool,

    #[serde(default)]
    pub maintenance_reason: Option<String>,

    #[serde(default)]
    pub last_error: Option<String>,

    #[serde(default)]
    pub inspection_finished_at: Option<chrono::DateTime<chrono::Utc>>,

    #[serde(default)]
    pub driver: String,

    #[serde(default)]
    pub driver_info: Map<String, Value>,

    #[serde(default)]
    pub instance_info: Map<String, Value>,

    #[serde(default)]
    pub properties: Map<String, Value>,
}

impl Node {
    /// Minimal node in the given state, used by fixtures and the mock client
    pub fn new(uuid: impl Into<String>, provision_state: ProvisionState) -> Self {
        Self {
            uuid: uuid.into(),
            name: None,
            provision_state,
            target_provision_state: None,
            power_state: None,
            target_power_state: None,
            maintenance: false,
            maintenance_reason: None,
            last_error: None,
            inspection_finished_at: None,
            driver: String::new(),
            driver_info: Map::new(),
            instance_info: Map::new(),
            properties: Map::new(),
        }
    }

    /// `last_error` if set and non-empty
    pub fn error(&self) -> Option<&str> {
        self.last_error.as_deref().filter(|e| !e.is_empty())
    }
}

/// Body of `POST /v1/nodes`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeCreate {
    pub name: String,
    pub driver: String,
    pub driver_info: Map<String, Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boot_interface: Option<String>,

    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub properties: Map<String, Value>,
}

/// JSON patch operation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PatchOp {
    Add,
    Replace,
    Remove,
}

/// Element of a `PATCH /v1/nodes/{node}` body
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PatchOperation {
    pub op: PatchOp,
    pub path: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl PatchOperation {
    pub fn add(path: impl Into<String>, value: Value) -> Self {
        Self {
            op: PatchOp::Add,
            path: path.into(),
            value: Some(value),
        }
    }

    pub fn remove(path: impl Into<String>) -> Self {
        Self {
            op: PatchOp::Remove,
            path: path.into(),
            value: None,
        }
    }
}

/// `GET /v1/nodes/detail` response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeList {
    #[serde(default)]
    pub nodes: Vec<Node>,

    /// Link to the next page, absent on the last one
    #[serde(default)]
    pub next: Option<String>,
}

/// `GET /v1/nodes/{node}/inventory` response
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct InventoryResponse {
    #[serde(default)]
    pub inventory: Inventory,
}

/// Hardware inventory collected by the ramdisk agent
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Inventory {
    #[serde(default)]
    pub cpu: InventoryCpu,

    #[serde(default)]
    pub memory: InventoryMemory,

    #[serde(default)]
    pub interfaces: Vec<InventoryInterface>,

    #[serde(default)]
    pub disks: Vec<InventoryDisk>,

    #[serde(default)]
    pub system_vendor: InventorySystemVendor,

    #[serde(default)]
    pub hostname: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct InventoryCpu {
    #[serde(default)]
    pub model_name: Option<String>,
    /// Clock in MHz, reported as a string
    #[serde(default)]
    pub frequency: Option<String>,
    #[serde(default)]
    pub count: u32,
    #[serde(default)]
    pub architecture: Option<String>,
    #[serde(default)]
    pub flags: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct InventoryMemory {
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub physical_mb: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct InventoryInterface {
    pub name: String,
    #[serde(default)]
    pub mac_address: String,
    #[serde(default)]
    pub ipv4_address: Option<String>,
    #[serde(default)]
    pub speed_mbps: Option<u32>,
    #[serde(default)]
    pub product: Option<String>,
    #[serde(default)]
    pub has_carrier: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct InventoryDisk {
    pub name: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub rotational: bool,
    #[serde(default)]
    pub wwn: Option<String>,
    #[serde(default)]
    pub serial: Option<String>,
    #[serde(default)]
    pub vendor: Option<String>,
    #[serde(default)]
    pub hctl: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct InventorySystemVendor {
    #[serde(default)]
    pub product_name: Option<String>,
    #[serde(default)]
    pub serial_number: Option<String>,
    #[serde(default)]
    pub manufacturer: Option<String>,
}
