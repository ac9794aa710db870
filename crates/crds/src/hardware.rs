//! Hardware inventory reported by inspection

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Hardware details collected while inspecting a host
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct HardwareDetails {
    #[serde(default)]
    pub system_vendor: HardwareSystemVendor,

    #[serde(default)]
    pub firmware: Firmware,

    /// Installed memory in MiB
    #[serde(default, rename = "ramMebibytes")]
    pub ram_mebibytes: u64,

    #[serde(default)]
    pub nics: Vec<Nic>,

    #[serde(default)]
    pub storage: Vec<Storage>,

    #[serde(default, rename = "cpu")]
    pub cpu: Cpu,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub hostname: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct HardwareSystemVendor {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub manufacturer: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub product_name: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub serial_number: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Firmware {
    #[serde(default)]
    pub bios: Bios,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Bios {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub date: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub vendor: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
}

/// A network interface
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Nic {
    pub name: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub model: String,

    /// MAC address
    pub mac: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ip: String,

    #[serde(default)]
    pub speed_gbps: u32,

    /// Whether the NIC is able to boot over PXE
    #[serde(default)]
    pub pxe: bool,
}

/// A disk or other storage device
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Storage {
    pub name: String,

    #[serde(default)]
    pub rotational: bool,

    #[serde(default)]
    pub size_bytes: u64,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub vendor: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub model: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub serial_number: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub wwn: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub hctl: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Cpu {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub arch: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub model: String,

    #[serde(default)]
    pub clock_megahertz: f64,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub flags: Vec<String>,

    #[serde(default)]
    pub count: u32,
}
