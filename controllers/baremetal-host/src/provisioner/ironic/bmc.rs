//! BMC address parsing.
//!
//! Maps a `spec.bmc.address` URL onto an Ironic hardware type and the
//! `driver_info` fields that type expects.

use crate::provisioner::BmcCredentials;
use serde_json::{Map, Value, json};

/// Ironic driver selection for a BMC
#[derive(Debug, Clone, PartialEq)]
pub struct BmcAccess {
    pub driver: String,
    pub driver_info: Map<String, Value>,
}

struct ParsedAddress<'a> {
    scheme: &'a str,
    host: &'a str,
    port: Option<u16>,
    path: &'a str,
}

fn split_address(address: &str) -> Result<ParsedAddress<'_>, String> {
    let (scheme, rest) = address.split_once("://").unwrap_or(("ipmi", address));
    let (authority, path) = match rest.find('/') {
        Some(index) => rest.split_at(index),
        None => (rest, ""),
    };

    let (host, port) = if let Some(stripped) = authority.strip_prefix('[') {
        // [v6addr]:port
        let (host, tail) = stripped
            .split_once(']')
            .ok_or_else(|| format!("malformed IPv6 BMC address {:?}", address))?;
        (host, tail.strip_prefix(':'))
    } else {
        match authority.rsplit_once(':') {
            Some((host, port)) => (host, Some(port)),
            None => (authority, None),
        }
    };

    if host.is_empty() {
        return Err(format!("BMC address {:?} has no host", address));
    }

    let port = port
        .map(|p| {
            p.parse::<u16>()
                .map_err(|e| format!("invalid port in BMC address {:?}: {}", address, e))
        })
        .transpose()?;

    Ok(ParsedAddress {
        scheme,
        host,
        port,
        path,
    })
}

fn host_with_port(host: &str, port: Option<u16>) -> String {
    let host = if host.contains(':') {
        format!("[{}]", host)
    } else {
        host.to_string()
    };
    match port {
        Some(port) => format!("{}:{}", host, port),
        None => host,
    }
}

/// Build the Ironic driver and `driver_info` for a BMC address.
///
/// Returns a human readable message for addresses that cannot be used, which
/// callers record as a registration failure.
pub fn bmc_access(
    address: &str,
    credentials: &BmcCredentials,
    disable_certificate_verification: bool,
) -> Result<BmcAccess, String> {
    let parsed = split_address(address)?;
    let mut driver_info = Map::new();

    let driver = match parsed.scheme {
        "ipmi" | "libvirt" => {
            driver_info.insert("ipmi_address".to_string(), json!(parsed.host));
            driver_info.insert("ipmi_port".to_string(), json!(parsed.port.unwrap_or(623)));
            driver_info.insert("ipmi_username".to_string(), json!(credentials.username));
            driver_info.insert("ipmi_password".to_string(), json!(credentials.password));
            "ipmi"
        }
        "redfish" | "redfish+https" | "redfish+http" => {
            let scheme = if parsed.scheme == "redfish+http" { "http" } else { "https" };
            if parsed.path.is_empty() || parsed.path == "/" {
                return Err(format!("redfish BMC address {:?} needs a system path", address));
            }
            driver_info.insert(
                "redfish_address".to_string(),
                json!(format!("{}://{}", scheme, host_with_port(parsed.host, parsed.port))),
            );
            driver_info.insert("redfish_system_id".to_string(), json!(parsed.path));
            driver_info.insert("redfish_username".to_string(), json!(credentials.username));
            driver_info.insert("redfish_password".to_string(), json!(credentials.password));
            driver_info.insert(
                "redfish_verify_ca".to_string(),
                json!(!disable_certificate_verification),
            );
            "redfish"
        }
        other => return Err(format!("unknown BMC type {:?} for address {:?}", other, address)),
    };

    Ok(BmcAccess {
        driver: driver.to_string(),
        driver_info,
    })
}
