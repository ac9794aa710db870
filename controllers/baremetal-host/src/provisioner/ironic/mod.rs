//! Ironic-backed provisioner.
//!
//! Each host maps onto one Ironic node named `namespace~name`. Operations
//! look at the node's provision state, request at most one state change, and
//! report whether the host needs to be polled again.

mod bmc;
mod inventory;
mod prepare;
#[cfg(test)]
mod ironic_test;

use crate::provisioner::{
    BmcCredentials, HardwareState, HostConfigData, ProvisionResult, Provisioner,
    ProvisionerError, ProvisionerFactory,
};
use async_trait::async_trait;
use crds::{BareMetalHost, BootMode, HardwareDetails, RootDeviceHints};
use ironic_client::{
    IronicClientTrait, IronicError, Node, NodeCreate, PatchOperation, PowerState, PowerTarget,
    ProvisionState, ProvisionStateOpts, ProvisionTarget,
};
use serde_json::{Map, Value, json};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Poll interval while a provision state change is running
pub const PROVISION_REQUEUE_DELAY: Duration = Duration::from_secs(10);

/// Poll interval while a power change is running
pub const POWER_REQUEUE_DELAY: Duration = Duration::from_secs(10);

/// Poll interval while inspection is running
pub const INSPECT_REQUEUE_DELAY: Duration = Duration::from_secs(15);

/// Poll interval while the node is being torn down
pub const DEPROVISION_REQUEUE_DELAY: Duration = Duration::from_secs(10);

/// Settings shared by every Ironic provisioner instance
#[derive(Debug, Clone)]
pub struct IronicSettings {
    pub deploy_kernel_url: Option<String>,
    pub deploy_ramdisk_url: Option<String>,
    /// Maximum nodes allowed in a busy state at once
    pub provisioning_limit: usize,
}

/// Builds `IronicProvisioner`s sharing one client
pub struct IronicProvisionerFactory {
    client: Arc<dyn IronicClientTrait>,
    settings: Arc<IronicSettings>,
}

impl IronicProvisionerFactory {
    pub fn new(client: Arc<dyn IronicClientTrait>, settings: IronicSettings) -> Self {
        Self {
            client,
            settings: Arc::new(settings),
        }
    }
}

impl ProvisionerFactory for IronicProvisionerFactory {
    fn build(&self, host: &BareMetalHost, credentials: BmcCredentials) -> Box<dyn Provisioner> {
        Box::new(IronicProvisioner::new(
            Arc::clone(&self.client),
            Arc::clone(&self.settings),
            host.clone(),
            credentials,
        ))
    }
}

/// Provisioner for a single host backed by Ironic
pub struct IronicProvisioner {
    client: Arc<dyn IronicClientTrait>,
    settings: Arc<IronicSettings>,
    host: BareMetalHost,
    credentials: BmcCredentials,
    /// Node UUID, empty until the host is registered
    node_id: String,
}

impl IronicProvisioner {
    pub fn new(
        client: Arc<dyn IronicClientTrait>,
        settings: Arc<IronicSettings>,
        host: BareMetalHost,
        credentials: BmcCredentials,
    ) -> Self {
        let node_id = host
            .status
            .as_ref()
            .map(|s| s.provisioning.id.clone())
            .unwrap_or_default();
        Self {
            client,
            settings,
            host,
            credentials,
            node_id,
        }
    }

    /// Ironic node name for the host
    pub fn node_name(&self) -> String {
        format!(
            "{}~{}",
            self.host.metadata.namespace.as_deref().unwrap_or_default(),
            self.host.metadata.name.as_deref().unwrap_or_default()
        )
    }

    /// Look the node up by stored UUID first, then by name
    async fn find_existing_node(&mut self) -> Result<Option<Node>, ProvisionerError> {
        if !self.node_id.is_empty() {
            if let Some(node) = self.client.find_node(&self.node_id).await? {
                return Ok(Some(node));
            }
            debug!("Node {} not found by UUID, trying name", self.node_id);
        }

        let node = self.client.find_node(&self.node_name()).await?;
        if let Some(node) = &node {
            self.node_id.clone_from(&node.uuid);
        }
        Ok(node)
    }

    /// The registered node, or `NotRegistered`
    async fn node(&mut self) -> Result<Node, ProvisionerError> {
        self.find_existing_node()
            .await?
            .ok_or_else(|| ProvisionerError::NotRegistered(self.host.host_key()))
    }

    /// Request a provision state change, treating a locked node as busy
    async fn change_provision_state(
        &self,
        node: &Node,
        opts: ProvisionStateOpts,
    ) -> Result<ProvisionResult, ProvisionerError> {
        info!(
            "Requesting provision state change of node {} ({}) to {:?}",
            node.uuid, node.provision_state, opts.target
        );
        match self.client.change_provision_state(&node.uuid, &opts).await {
            Ok(()) => Ok(ProvisionResult::operation_continuing(PROVISION_REQUEUE_DELAY)),
            Err(IronicError::Conflict(message)) => {
                debug!("Node {} is busy: {}", node.uuid, message);
                Ok(ProvisionResult::operation_continuing(PROVISION_REQUEUE_DELAY))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Toggle maintenance mode
    async fn set_maintenance_flag(
        &self,
        node: &Node,
        maintenance: bool,
        reason: &str,
    ) -> Result<ProvisionResult, ProvisionerError> {
        let result = if maintenance {
            self.client.set_maintenance(&node.uuid, reason).await
        } else {
            self.client.clear_maintenance(&node.uuid).await
        };
        match result {
            Ok(()) | Err(IronicError::Conflict(_)) => {
                Ok(ProvisionResult::operation_continuing(PROVISION_REQUEUE_DELAY))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn driver_info(&self) -> Result<bmc::BmcAccess, String> {
        let bmc = self
            .host
            .spec
            .bmc
            .as_ref()
            .ok_or_else(|| "host has no BMC details".to_string())?;
        let mut access = bmc::bmc_access(
            &bmc.address,
            &self.credentials,
            bmc.disable_certificate_verification,
        )?;
        if let Some(kernel) = &self.settings.deploy_kernel_url {
            access.driver_info.insert("deploy_kernel".to_string(), json!(kernel));
        }
        if let Some(ramdisk) = &self.settings.deploy_ramdisk_url {
            access.driver_info.insert("deploy_ramdisk".to_string(), json!(ramdisk));
        }
        Ok(access)
    }

    fn boot_mode(&self) -> BootMode {
        self.host
            .status
            .as_ref()
            .and_then(|s| s.provisioning.boot_mode)
            .or(self.host.spec.boot_mode)
            .unwrap_or_default()
    }

    /// Ironic `capabilities` property for the host's boot mode
    fn capabilities(&self) -> String {
        match self.boot_mode() {
            BootMode::Uefi => "boot_mode:uefi".to_string(),
            BootMode::UefiSecureBoot => "boot_mode:uefi,secure_boot:true".to_string(),
            BootMode::Legacy => "boot_mode:bios".to_string(),
        }
    }

    /// Patch writing the image and root disk selection into `instance_info`
    fn instance_info_patch(&self) -> Result<Vec<PatchOperation>, ProvisionerError> {
        let image = self
            .host
            .spec
            .image
            .as_ref()
            .filter(|image| !image.url.is_empty())
            .ok_or_else(|| ProvisionerError::InvalidHost(format!("host {} has no image", self.host.host_key())))?;

        let mut patch = vec![
            PatchOperation::add("/instance_info/image_source", json!(image.url)),
            PatchOperation::add("/instance_info/capabilities", json!({ "boot_mode": self.boot_mode_name() })),
        ];
        match &image.checksum_type {
            Some(algorithm) if !image.checksum.is_empty() => {
                patch.push(PatchOperation::add("/instance_info/image_os_hash_algo", json!(algorithm)));
                patch.push(PatchOperation::add("/instance_info/image_os_hash_value", json!(image.checksum)));
            }
            _ if !image.checksum.is_empty() => {
                patch.push(PatchOperation::add("/instance_info/image_checksum", json!(image.checksum)));
            }
            _ => {}
        }
        if let Some(format) = &image.disk_format {
            patch.push(PatchOperation::add("/instance_info/image_disk_format", json!(format)));
        }
        if let Some(hints) = self.host.spec.root_device_hints.as_ref().and_then(root_device_hints) {
            patch.push(PatchOperation::add("/instance_info/root_device", hints));
        }
        Ok(patch)
    }

    fn boot_mode_name(&self) -> &'static str {
        match self.boot_mode() {
            BootMode::Uefi | BootMode::UefiSecureBoot => "uefi",
            BootMode::Legacy => "bios",
        }
    }

    /// Config drive contents for the host
    fn config_drive(&self, config: &HostConfigData) -> Value {
        let meta_data = config
            .meta_data
            .as_deref()
            .and_then(|raw| serde_json::from_str::<Value>(raw).ok())
            .unwrap_or_else(|| {
                json!({
                    "uuid": self.host.metadata.uid.as_deref().unwrap_or_default(),
                    "metal3-namespace": self.host.metadata.namespace.as_deref().unwrap_or_default(),
                    "metal3-name": self.host.metadata.name.as_deref().unwrap_or_default(),
                    "local-hostname": self.host.metadata.name.as_deref().unwrap_or_default(),
                    "local_hostname": self.host.metadata.name.as_deref().unwrap_or_default(),
                })
            });

        let mut drive = Map::new();
        drive.insert("meta_data".to_string(), meta_data);
        if let Some(user_data) = &config.user_data {
            drive.insert("user_data".to_string(), json!(user_data));
        }
        if let Some(network_data) = config
            .network_data
            .as_deref()
            .and_then(|raw| serde_json::from_str::<Value>(raw).ok())
        {
            drive.insert("network_data".to_string(), network_data);
        }
        Value::Object(drive)
    }

    async fn change_power_state(&mut self, target: PowerTarget) -> Result<ProvisionResult, ProvisionerError> {
        let node = self.node().await?;
        let wanted = match target {
            PowerTarget::On => PowerState::On,
            _ => PowerState::Off,
        };

        if node.target_power_state.is_some() {
            debug!("Node {} power change already in progress", node.uuid);
            return Ok(ProvisionResult::operation_continuing(POWER_REQUEUE_DELAY));
        }
        if node.power_state == Some(wanted) {
            return Ok(ProvisionResult::operation_complete());
        }

        info!("Changing power state of node {} to {:?}", node.uuid, target);
        match self.client.change_power_state(&node.uuid, target).await {
            Ok(()) | Err(IronicError::Conflict(_)) => {
                Ok(ProvisionResult::operation_continuing(POWER_REQUEUE_DELAY))
            }
            Err(IronicError::InvalidRequest(message)) => Ok(ProvisionResult::operation_failed(message)),
            Err(e) => Err(e.into()),
        }
    }
}

/// Ironic `root_device` hints, `None` when no hint is set
fn root_device_hints(hints: &RootDeviceHints) -> Option<Value> {
    let mut out = Map::new();
    let mut put = |key: &str, value: Option<Value>| {
        if let Some(value) = value {
            out.insert(key.to_string(), value);
        }
    };
    put("name", hints.device_name.as_ref().map(|v| json!(v)));
    put("hctl", hints.hctl.as_ref().map(|v| json!(v)));
    put("model", hints.model.as_ref().map(|v| json!(format!("<in> {}", v))));
    put("vendor", hints.vendor.as_ref().map(|v| json!(format!("<in> {}", v))));
    put("serial", hints.serial_number.as_ref().map(|v| json!(v)));
    put("size", hints.min_size_gigabytes.map(|v| json!(format!(">= {}", v))));
    put("wwn", hints.wwn.as_ref().map(|v| json!(v)));
    put("rotational", hints.rotational.map(|v| json!(v)));
    (!out.is_empty()).then_some(Value::Object(out))
}

#[async_trait]
impl Provisioner for IronicProvisioner {
    async fn validate_management_access(
        &mut self,
        credentials_changed: bool,
        force: bool,
    ) -> Result<(ProvisionResult, String), ProvisionerError> {
        let access = match self.driver_info() {
            Ok(access) => access,
            Err(message) => {
                return Ok((ProvisionResult::operation_failed(message), self.node_id.clone()));
            }
        };

        let Some(node) = self.find_existing_node().await? else {
            info!("Registering host {} as node {}", self.host.host_key(), self.node_name());
            let mut properties = Map::new();
            properties.insert("capabilities".to_string(), json!(self.capabilities()));
            let node = self
                .client
                .create_node(&NodeCreate {
                    name: self.node_name(),
                    driver: access.driver,
                    driver_info: access.driver_info,
                    boot_interface: Some("ipxe".to_string()),
                    properties,
                })
                .await?;
            self.node_id.clone_from(&node.uuid);
            return Ok((
                ProvisionResult::operation_continuing(PROVISION_REQUEUE_DELAY),
                node.uuid,
            ));
        };

        if credentials_changed {
            info!("Updating driver info of node {}", node.uuid);
            self.client
                .update_node(
                    &node.uuid,
                    &[PatchOperation::add("/driver_info", Value::Object(access.driver_info))],
                )
                .await?;
        }

        let result = match node.provision_state {
            ProvisionState::Enroll => {
                if let (Some(error), false) = (node.error(), force || credentials_changed) {
                    ProvisionResult::operation_failed(error)
                } else if node.target_provision_state.is_some() {
                    ProvisionResult::operation_continuing(PROVISION_REQUEUE_DELAY)
                } else {
                    self.change_provision_state(&node, ProvisionStateOpts::new(ProvisionTarget::Manage))
                        .await?
                }
            }
            ProvisionState::Verifying => ProvisionResult::operation_continuing(PROVISION_REQUEUE_DELAY),
            _ => ProvisionResult::operation_complete(),
        };
        Ok((result, node.uuid))
    }

    async fn inspect_hardware(
        &mut self,
        force: bool,
    ) -> Result<(ProvisionResult, Option<HardwareDetails>), ProvisionerError> {
        let node = self.node().await?;
        let start_inspection = ProvisionStateOpts::new(ProvisionTarget::Inspect);

        let result = match node.provision_state {
            ProvisionState::Inspecting | ProvisionState::InspectWait => {
                debug!("Inspection of node {} in progress", node.uuid);
                ProvisionResult::operation_continuing(INSPECT_REQUEUE_DELAY)
            }
            ProvisionState::InspectFail if !force => ProvisionResult::operation_failed(
                node.error().unwrap_or("inspection failed").to_string(),
            ),
            ProvisionState::InspectFail => self.change_provision_state(&node, start_inspection).await?,
            ProvisionState::Manageable if node.inspection_finished_at.is_none() || force => {
                self.change_provision_state(&node, start_inspection).await?
            }
            ProvisionState::Manageable | ProvisionState::Available | ProvisionState::Active
                if node.inspection_finished_at.is_some() =>
            {
                let inventory = self.client.get_inventory(&node.uuid).await?;
                return Ok((
                    ProvisionResult::operation_complete(),
                    Some(inventory::hardware_details(&inventory)),
                ));
            }
            ProvisionState::Available => {
                self.change_provision_state(&node, ProvisionStateOpts::new(ProvisionTarget::Manage))
                    .await?
            }
            other => {
                return Err(ProvisionerError::UnexpectedState(format!(
                    "node {} is {} while inspecting",
                    node.uuid, other
                )));
            }
        };
        Ok((result, None))
    }

    async fn update_hardware_state(&mut self) -> Result<HardwareState, ProvisionerError> {
        let Some(node) = self.find_existing_node().await? else {
            return Ok(HardwareState::default());
        };
        let powered_on = match node.power_state {
            Some(PowerState::On) => Some(true),
            Some(PowerState::Off) => Some(false),
            Some(PowerState::Unknown) | None => None,
        };
        Ok(HardwareState { powered_on })
    }

    async fn adopt(&mut self, force: bool) -> Result<ProvisionResult, ProvisionerError> {
        let node = self.node().await?;
        match node.provision_state {
            ProvisionState::Manageable => {
                self.client.update_node(&node.uuid, &self.instance_info_patch()?).await?;
                self.change_provision_state(&node, ProvisionStateOpts::new(ProvisionTarget::Adopt))
                    .await
            }
            ProvisionState::Adopting => Ok(ProvisionResult::operation_continuing(PROVISION_REQUEUE_DELAY)),
            ProvisionState::AdoptFail if force => {
                self.change_provision_state(&node, ProvisionStateOpts::new(ProvisionTarget::Adopt))
                    .await
            }
            ProvisionState::AdoptFail => Ok(ProvisionResult::operation_failed(
                node.error().unwrap_or("adoption failed").to_string(),
            )),
            _ => Ok(ProvisionResult::operation_complete()),
        }
    }

    async fn prepare(&mut self, unprepared: bool) -> Result<(ProvisionResult, bool), ProvisionerError> {
        self.prepare_node(unprepared).await
    }

    async fn provision(&mut self, config: HostConfigData) -> Result<ProvisionResult, ProvisionerError> {
        let node = self.node().await?;
        match node.provision_state {
            ProvisionState::Manageable => {
                self.change_provision_state(&node, ProvisionStateOpts::new(ProvisionTarget::Provide))
                    .await
            }
            ProvisionState::Available => {
                self.client.update_node(&node.uuid, &self.instance_info_patch()?).await?;
                let opts = ProvisionStateOpts {
                    target: ProvisionTarget::Active,
                    clean_steps: None,
                    configdrive: Some(self.config_drive(&config)),
                };
                self.change_provision_state(&node, opts).await
            }
            ProvisionState::Deploying
            | ProvisionState::DeployWait
            | ProvisionState::Cleaning
            | ProvisionState::CleanWait => {
                Ok(ProvisionResult::operation_continuing(PROVISION_REQUEUE_DELAY))
            }
            ProvisionState::DeployFail | ProvisionState::CleanFail | ProvisionState::Error => {
                Ok(ProvisionResult::operation_failed(
                    node.error()
                        .map_or_else(|| format!("node is in {} state", node.provision_state), str::to_string),
                ))
            }
            ProvisionState::Active => {
                let requested = self.host.spec.image.as_ref().map(|image| image.url.as_str()).unwrap_or_default();
                match node.instance_info.get("image_source").and_then(|source| source.as_str()) {
                    Some(deployed) if deployed != requested => Ok(ProvisionResult::operation_failed(format!(
                        "node is active with image {} but {} was requested",
                        deployed, requested
                    ))),
                    _ => {
                        info!("Node {} is active", node.uuid);
                        Ok(ProvisionResult::operation_complete())
                    }
                }
            }
            other => Err(ProvisionerError::UnexpectedState(format!(
                "node {} is {} while provisioning",
                node.uuid, other
            ))),
        }
    }

    async fn deprovision(&mut self, force: bool) -> Result<ProvisionResult, ProvisionerError> {
        let Some(node) = self.find_existing_node().await? else {
            return Ok(ProvisionResult::operation_complete());
        };
        match node.provision_state {
            ProvisionState::Active | ProvisionState::DeployFail | ProvisionState::Error => {
                self.change_provision_state(&node, ProvisionStateOpts::new(ProvisionTarget::Deleted))
                    .await
            }
            ProvisionState::Deleting
            | ProvisionState::Cleaning
            | ProvisionState::CleanWait
            | ProvisionState::Deploying
            | ProvisionState::DeployWait => {
                Ok(ProvisionResult::operation_continuing(DEPROVISION_REQUEUE_DELAY))
            }
            ProvisionState::CleanFail if !force => Ok(ProvisionResult::operation_failed(
                node.error().unwrap_or("cleaning failed").to_string(),
            )),
            ProvisionState::CleanFail if node.maintenance => {
                self.set_maintenance_flag(&node, false, "").await
            }
            ProvisionState::CleanFail => {
                self.change_provision_state(&node, ProvisionStateOpts::new(ProvisionTarget::Manage))
                    .await
            }
            _ => Ok(ProvisionResult::operation_complete()),
        }
    }

    async fn delete(&mut self) -> Result<ProvisionResult, ProvisionerError> {
        let Some(node) = self.find_existing_node().await? else {
            info!("Node for host {} is already gone", self.host.host_key());
            return Ok(ProvisionResult::operation_complete());
        };

        if !node.maintenance {
            info!("Setting maintenance on node {} before deletion", node.uuid);
            return self.set_maintenance_flag(&node, true, "host is being deleted").await;
        }

        info!("Deleting node {}", node.uuid);
        match self.client.delete_node(&node.uuid).await {
            Ok(()) | Err(IronicError::NotFound(_)) => Ok(ProvisionResult::operation_complete()),
            Err(IronicError::Conflict(_)) => {
                Ok(ProvisionResult::operation_continuing(PROVISION_REQUEUE_DELAY))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn power_on(&mut self) -> Result<ProvisionResult, ProvisionerError> {
        self.change_power_state(PowerTarget::On).await
    }

    async fn power_off(&mut self) -> Result<ProvisionResult, ProvisionerError> {
        self.change_power_state(PowerTarget::Off).await
    }

    async fn is_ready(&mut self) -> Result<bool, ProvisionerError> {
        match self.client.check_available().await {
            Ok(()) => Ok(true),
            Err(e) => {
                debug!("Ironic is not ready: {}", e);
                Ok(false)
            }
        }
    }

    async fn has_provisioning_capacity(&mut self) -> Result<bool, ProvisionerError> {
        let nodes = self.client.list_nodes().await?;
        let own_name = self.node_name();
        let mut busy = 0usize;
        for node in &nodes {
            if !node.provision_state.is_busy() {
                continue;
            }
            if node.uuid == self.node_id || node.name.as_deref() == Some(own_name.as_str()) {
                // Already holds a slot
                return Ok(true);
            }
            busy += 1;
        }
        debug!(
            "{} of {} provisioning slots in use",
            busy, self.settings.provisioning_limit
        );
        Ok(busy < self.settings.provisioning_limit)
    }
}
