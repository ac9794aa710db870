//! Metal3 CRD Definitions
//!
//! Kubernetes Custom Resource Definitions for the bare metal host controller.

pub mod bare_metal_host;
pub mod credentials;
pub mod hardware;

pub use bare_metal_host::*;
pub use credentials::*;
pub use hardware::*;
