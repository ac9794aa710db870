//! IronicClient trait for mocking
//!
//! This trait abstracts the IronicClient so provisioner logic can be unit
//! tested against `MockIronicClient` instead of a running Ironic.

use crate::error::IronicError;
use crate::models::*;

/// Trait for Ironic API client operations
///
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
#[async_trait::async_trait]
pub trait IronicClientTrait: Send + Sync {
    /// Get the base URL
    fn base_url(&self) -> &str;

    /// Check the API root answers
    async fn check_available(&self) -> Result<(), IronicError>;

    // Nodes
    async fn get_node(&self, ident: &str) -> Result<Node, IronicError>;
    async fn list_nodes(&self) -> Result<Vec<Node>, IronicError>;
    async fn create_node(&self, request: &NodeCreate) -> Result<Node, IronicError>;
    async fn update_node(&self, ident: &str, patch: &[PatchOperation]) -> Result<Node, IronicError>;
    async fn delete_node(&self, ident: &str) -> Result<(), IronicError>;

    // State changes
    async fn change_provision_state(&self, ident: &str, opts: &ProvisionStateOpts) -> Result<(), IronicError>;
    async fn change_power_state(&self, ident: &str, target: PowerTarget) -> Result<(), IronicError>;
    async fn set_maintenance(&self, ident: &str, reason: &str) -> Result<(), IronicError>;
    async fn clear_maintenance(&self, ident: &str) -> Result<(), IronicError>;

    // Inspection data
    async fn get_inventory(&self, ident: &str) -> Result<Inventory, IronicError>;

    /// Look up a node by UUID or name, mapping "not found" to `None`
    async fn find_node(&self, ident: &str) -> Result<Option<Node>, IronicError> {
        match self.get_node(ident).await {
            Ok(node) => Ok(Some(node)),
            Err(IronicError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}
