//! Mock IronicClient for unit testing
//!
//! Stores nodes in memory and records every state change request so tests
//! can assert on what the caller asked Ironic to do.

use crate::error::IronicError;
use crate::ironic_trait::IronicClientTrait;
use crate::models::*;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Mock IronicClient for testing
#[derive(Clone, Debug)]
pub struct MockIronicClient {
    base_url: String,
    // In-memory storage, keyed by node UUID
    nodes: Arc<Mutex<HashMap<String, Node>>>,
    inventories: Arc<Mutex<HashMap<String, Inventory>>>,
    // Requests recorded for assertions
    provision_requests: Arc<Mutex<Vec<(String, ProvisionStateOpts)>>>,
    power_requests: Arc<Mutex<Vec<(String, PowerTarget)>>>,
    patches: Arc<Mutex<Vec<(String, Vec<PatchOperation>)>>>,
    available: Arc<Mutex<bool>>,
    next_id: Arc<Mutex<u64>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockIronicClient {
    /// Create a new mock client
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            nodes: Arc::new(Mutex::new(HashMap::new())),
            inventories: Arc::new(Mutex::new(HashMap::new())),
            provision_requests: Arc::new(Mutex::new(Vec::new())),
            power_requests: Arc::new(Mutex::new(Vec::new())),
            patches: Arc::new(Mutex::new(Vec::new())),
            available: Arc::new(Mutex::new(true)),
            next_id: Arc::new(Mutex::new(1)),
        }
    }

    /// Add a node to the mock store (for test setup)
    pub fn add_node(&self, node: Node) {
        lock(&self.nodes).insert(node.uuid.clone(), node);
    }

    /// Set the inventory returned for a node (for test setup)
    pub fn set_inventory(&self, uuid: &str, inventory: Inventory) {
        lock(&self.inventories).insert(uuid.to_string(), inventory);
    }

    /// Make the API root report as unavailable
    pub fn set_available(&self, available: bool) {
        *lock(&self.available) = available;
    }

    /// Current copy of a node
    pub fn node(&self, uuid: &str) -> Option<Node> {
        lock(&self.nodes).get(uuid).cloned()
    }

    /// Provision state changes requested so far
    pub fn provision_requests(&self) -> Vec<(String, ProvisionStateOpts)> {
        lock(&self.provision_requests).clone()
    }

    /// Power state changes requested so far
    pub fn power_requests(&self) -> Vec<(String, PowerTarget)> {
        lock(&self.power_requests).clone()
    }

    /// Patches applied so far
    pub fn patches(&self) -> Vec<(String, Vec<PatchOperation>)> {
        lock(&self.patches).clone()
    }

    fn next_uuid(&self) -> String {
        let mut id = lock(&self.next_id);
        let current = *id;
        *id += 1;
        format!("00000000-0000-0000-0000-{:012}", current)
    }

    /// Resolve a UUID or name to the stored UUID
    fn resolve(&self, ident: &str) -> Result<String, IronicError> {
        let nodes = lock(&self.nodes);
        if nodes.contains_key(ident) {
            return Ok(ident.to_string());
        }
        nodes
            .values()
            .find(|n| n.name.as_deref() == Some(ident))
            .map(|n| n.uuid.clone())
            .ok_or_else(|| IronicError::NotFound(format!("node {}", ident)))
    }
}

#[async_trait::async_trait]
impl IronicClientTrait for MockIronicClient {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn check_available(&self) -> Result<(), IronicError> {
        if *lock(&self.available) {
            Ok(())
        } else {
            Err(IronicError::Api("Ironic API is not available".to_string()))
        }
    }

    async fn get_node(&self, ident: &str) -> Result<Node, IronicError> {
        let uuid = self.resolve(ident)?;
        self.node(&uuid)
            .ok_or_else(|| IronicError::NotFound(format!("node {}", ident)))
    }

    async fn list_nodes(&self) -> Result<Vec<Node>, IronicError> {
        Ok(lock(&self.nodes).values().cloned().collect())
    }

    async fn create_node(&self, request: &NodeCreate) -> Result<Node, IronicError> {
        let mut node = Node::new(self.next_uuid(), ProvisionState::Enroll);
        node.name = Some(request.name.clone());
        node.driver = request.driver.clone();
        node.driver_info = request.driver_info.clone();
        node.properties = request.properties.clone();
        self.add_node(node.clone());
        Ok(node)
    }

    async fn update_node(&self, ident: &str, patch: &[PatchOperation]) -> Result<Node, IronicError> {
        let uuid = self.resolve(ident)?;
        lock(&self.patches).push((uuid.clone(), patch.to_vec()));

        let mut nodes = lock(&self.nodes);
        let node = nodes
            .get_mut(&uuid)
            .ok_or_else(|| IronicError::NotFound(format!("node {}", ident)))?;
        for operation in patch {
            let (section, key) = match operation.path.trim_start_matches('/').split_once('/') {
                Some((section, key)) => (section, Some(key)),
                None => (operation.path.trim_start_matches('/'), None),
            };
            let target = match section {
                "driver_info" => &mut node.driver_info,
                "instance_info" => &mut node.instance_info,
                "properties" => &mut node.properties,
                _ => continue,
            };
            match (operation.op, key, &operation.value) {
                (PatchOp::Remove, Some(key), _) => {
                    target.remove(key);
                }
                (PatchOp::Remove, None, _) => target.clear(),
                (_, Some(key), Some(value)) => {
                    target.insert(key.to_string(), value.clone());
                }
                (_, None, Some(serde_json::Value::Object(map))) => *target = map.clone(),
                _ => {}
            }
        }
        Ok(node.clone())
    }

    async fn delete_node(&self, ident: &str) -> Result<(), IronicError> {
        let uuid = self.resolve(ident)?;
        lock(&self.nodes).remove(&uuid);
        Ok(())
    }

    async fn change_provision_state(&self, ident: &str, opts: &ProvisionStateOpts) -> Result<(), IronicError> {
        let uuid = self.resolve(ident)?;
        lock(&self.provision_requests).push((uuid, opts.clone()));
        Ok(())
    }

    async fn change_power_state(&self, ident: &str, target: PowerTarget) -> Result<(), IronicError> {
        let uuid = self.resolve(ident)?;
        lock(&self.power_requests).push((uuid, target));
        Ok(())
    }

    async fn set_maintenance(&self, ident: &str, reason: &str) -> Result<(), IronicError> {
        let uuid = self.resolve(ident)?;
        if let Some(node) = lock(&self.nodes).get_mut(&uuid) {
            node.maintenance = true;
            node.maintenance_reason = Some(reason.to_string());
        }
        Ok(())
    }

    async fn clear_maintenance(&self, ident: &str) -> Result<(), IronicError> {
        let uuid = self.resolve(ident)?;
        if let Some(node) = lock(&self.nodes).get_mut(&uuid) {
            node.maintenance = false;
            node.maintenance_reason = None;
        }
        Ok(())
    }

    async fn get_inventory(&self, ident: &str) -> Result<Inventory, IronicError> {
        let uuid = self.resolve(ident)?;
        lock(&self.inventories)
            .get(&uuid)
            .cloned()
            .ok_or_else(|| IronicError::NotFound(format!("inventory for node {}", ident)))
    }
}
