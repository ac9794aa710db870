//! Ironic REST API Client
//!
//! A Rust client library for the Ironic bare metal service. Covers node
//! enrollment, provision and power state changes, maintenance mode, and the
//! hardware inventory collected during inspection.
//!
//! # Example
//!
//! ```no_run
//! use ironic_client::{IronicClient, ProvisionStateOpts, ProvisionTarget};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = IronicClient::new("http://ironic.metal3:6385".to_string())?;
//!
//! // Look up a node and move it to manageable
//! let node = client.get_node("metal3~host-0").await?;
//! client
//!     .change_provision_state(&node.uuid, &ProvisionStateOpts::new(ProvisionTarget::Manage))
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod error;
pub mod models;
#[path = "trait.rs"]
pub mod ironic_trait;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use client::IronicClient;
pub use error::IronicError;
pub use models::*;
pub use ironic_trait::IronicClientTrait;
#[cfg(any(test, feature = "test-util"))]
pub use mock::MockIronicClient;
