//! Conversion of the Ironic inspection inventory into `HardwareDetails`.

use crds::{Bios, Cpu, Firmware, HardwareDetails, HardwareSystemVendor, Nic, Storage};
use ironic_client::Inventory;

/// Translate an agent inventory into host status hardware details
pub fn hardware_details(inventory: &Inventory) -> HardwareDetails {
    let cpu = Cpu {
        arch: inventory.cpu.architecture.clone().unwrap_or_default(),
        model: inventory.cpu.model_name.clone().unwrap_or_default(),
        clock_megahertz: inventory
            .cpu
            .frequency
            .as_deref()
            .and_then(|f| f.trim().parse::<f64>().ok())
            .unwrap_or_default(),
        flags: {
            let mut flags = inventory.cpu.flags.clone();
            flags.sort();
            flags
        },
        count: inventory.cpu.count,
    };

    let nics = inventory
        .interfaces
        .iter()
        .map(|iface| Nic {
            name: iface.name.clone(),
            model: iface.product.clone().unwrap_or_default(),
            mac: iface.mac_address.clone(),
            ip: iface.ipv4_address.clone().unwrap_or_default(),
            speed_gbps: iface.speed_mbps.unwrap_or_default() / 1000,
            pxe: false,
        })
        .collect();

    let storage = inventory
        .disks
        .iter()
        .map(|disk| Storage {
            name: disk.name.clone(),
            rotational: disk.rotational,
            size_bytes: disk.size,
            vendor: disk.vendor.clone().unwrap_or_default(),
            model: disk.model.clone().unwrap_or_default(),
            serial_number: disk.serial.clone().unwrap_or_default(),
            wwn: disk.wwn.clone().unwrap_or_default(),
            hctl: disk.hctl.clone().unwrap_or_default(),
        })
        .collect();

    HardwareDetails {
        system_vendor: HardwareSystemVendor {
            manufacturer: inventory.system_vendor.manufacturer.clone().unwrap_or_default(),
            product_name: inventory.system_vendor.product_name.clone().unwrap_or_default(),
            serial_number: inventory.system_vendor.serial_number.clone().unwrap_or_default(),
        },
        firmware: Firmware { bios: Bios::default() },
        ram_mebibytes: inventory.memory.physical_mb,
        nics,
        storage,
        cpu,
        hostname: inventory.hostname.clone().unwrap_or_default(),
    }
}
