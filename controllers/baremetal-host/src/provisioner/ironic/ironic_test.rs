//! Unit tests for the Ironic provisioner

#[cfg(test)]
mod tests {
    use super::super::{INSPECT_REQUEUE_DELAY, IronicProvisioner};
    use crate::provisioner::{HostConfigData, Provisioner};
    use crate::test_utils::*;
    use ironic_client::{
        InventoryCpu, IronicClientTrait, MockIronicClient, Node, PatchOp, PowerState, PowerTarget, ProvisionState,
        ProvisionTarget,
    };

    fn setup(state: ProvisionState) -> (MockIronicClient, IronicProvisioner) {
        let client = MockIronicClient::new("http://ironic.test:6385");
        let mut node = Node::new(NODE_UUID, state);
        node.name = Some("myns~myhost".to_string());
        client.add_node(node);
        let prov = ironic_provisioner(&client, ironic_host());
        (client, prov)
    }

    fn last_target(client: &MockIronicClient) -> Option<ProvisionTarget> {
        client.provision_requests().last().map(|(_, opts)| opts.target)
    }

    #[tokio::test]
    async fn test_validate_registers_new_node() {
        let client = MockIronicClient::new("http://ironic.test:6385");
        let mut host = ironic_host();
        host.status_mut().provisioning.id.clear();
        let mut prov = ironic_provisioner(&client, host);

        let (result, id) = prov.validate_management_access(false, false).await.unwrap();

        assert!(result.dirty, "Registration must be polled");
        assert!(!id.is_empty());
        let node = client.node(&id).unwrap();
        assert_eq!(node.name.as_deref(), Some("myns~myhost"));
        assert_eq!(node.driver, "redfish");
        assert_eq!(node.driver_info["redfish_system_id"], "/redfish/v1/Systems/1");
        assert_eq!(
            node.driver_info["deploy_kernel"],
            "http://172.22.0.1/images/ironic-python-agent.kernel"
        );
    }

    #[tokio::test]
    async fn test_validate_finds_node_by_name() {
        let (client, _) = setup(ProvisionState::Manageable);
        let mut host = ironic_host();
        host.status_mut().provisioning.id.clear();
        let mut prov = ironic_provisioner(&client, host);

        let (result, id) = prov.validate_management_access(false, false).await.unwrap();

        assert_eq!(id, NODE_UUID);
        assert!(!result.dirty);
        assert!(!result.failed());
    }

    #[tokio::test]
    async fn test_validate_enroll_requests_manage() {
        let (client, mut prov) = setup(ProvisionState::Enroll);

        let (result, _) = prov.validate_management_access(false, false).await.unwrap();

        assert!(result.dirty);
        assert_eq!(last_target(&client), Some(ProvisionTarget::Manage));
    }

    #[tokio::test]
    async fn test_validate_enroll_with_error() {
        let client = MockIronicClient::new("http://ironic.test:6385");
        let mut node = Node::new(NODE_UUID, ProvisionState::Enroll);
        node.last_error = Some("Failed to get power state".to_string());
        client.add_node(node);
        let mut prov = ironic_provisioner(&client, ironic_host());

        let (result, _) = prov.validate_management_access(false, false).await.unwrap();
        assert_eq!(result.error_message, "Failed to get power state");
        assert!(client.provision_requests().is_empty());

        // Forced retry goes through
        let (result, _) = prov.validate_management_access(false, true).await.unwrap();
        assert!(!result.failed());
        assert_eq!(last_target(&client), Some(ProvisionTarget::Manage));
    }

    #[tokio::test]
    async fn test_validate_verifying_continues() {
        let (_, mut prov) = setup(ProvisionState::Verifying);

        let (result, _) = prov.validate_management_access(false, false).await.unwrap();

        assert!(result.dirty);
    }

    #[tokio::test]
    async fn test_validate_updates_changed_credentials() {
        let (client, mut prov) = setup(ProvisionState::Manageable);

        prov.validate_management_access(true, false).await.unwrap();

        let patches = client.patches();
        assert_eq!(patches.len(), 1);
        assert_eq!(patches[0].1[0].path, "/driver_info");
        assert_eq!(patches[0].1[0].op, PatchOp::Add);
        assert_eq!(client.node(NODE_UUID).unwrap().driver_info["redfish_username"], "admin");
    }

    #[tokio::test]
    async fn test_validate_unknown_bmc() {
        let client = MockIronicClient::new("http://ironic.test:6385");
        let mut host = ironic_host();
        if let Some(bmc) = host.spec.bmc.as_mut() {
            bmc.address = "carrier-pigeon://coop".to_string();
        }
        let mut prov = ironic_provisioner(&client, host);

        let (result, _) = prov.validate_management_access(false, false).await.unwrap();

        assert!(result.failed());
        assert!(client.list_nodes().await.unwrap().is_empty(), "Nothing may be registered");
    }

    #[tokio::test]
    async fn test_inspect_starts_inspection() {
        let (client, mut prov) = setup(ProvisionState::Manageable);

        let (result, details) = prov.inspect_hardware(false).await.unwrap();

        assert!(result.dirty);
        assert!(details.is_none());
        assert_eq!(last_target(&client), Some(ProvisionTarget::Inspect));
    }

    #[tokio::test]
    async fn test_inspect_in_progress() {
        let (client, mut prov) = setup(ProvisionState::InspectWait);

        let (result, details) = prov.inspect_hardware(false).await.unwrap();

        assert!(result.dirty);
        assert_eq!(result.requeue_after, INSPECT_REQUEUE_DELAY);
        assert!(details.is_none());
        assert!(client.provision_requests().is_empty());
    }

    #[tokio::test]
    async fn test_inspect_failed() {
        let (client, mut prov) = setup(ProvisionState::InspectFail);

        let (result, _) = prov.inspect_hardware(false).await.unwrap();
        assert!(result.failed());

        let (result, _) = prov.inspect_hardware(true).await.unwrap();
        assert!(!result.failed());
        assert_eq!(last_target(&client), Some(ProvisionTarget::Inspect));
    }

    #[tokio::test]
    async fn test_inspect_finished_returns_details() {
        let client = MockIronicClient::new("http://ironic.test:6385");
        let mut node = Node::new(NODE_UUID, ProvisionState::Manageable);
        node.inspection_finished_at = Some(chrono::Utc::now());
        client.add_node(node);
        client.set_inventory(
            NODE_UUID,
            ironic_client::Inventory {
                cpu: InventoryCpu {
                    count: 8,
                    architecture: Some("x86_64".to_string()),
                    ..Default::default()
                },
                ..Default::default()
            },
        );
        let mut prov = ironic_provisioner(&client, ironic_host());

        let (result, details) = prov.inspect_hardware(false).await.unwrap();

        assert!(!result.dirty);
        let details = details.unwrap();
        assert_eq!(details.cpu.count, 8);
        assert_eq!(details.cpu.arch, "x86_64");
    }

    #[tokio::test]
    async fn test_provision_from_manageable_provides() {
        let (client, mut prov) = setup(ProvisionState::Manageable);

        let result = prov.provision(HostConfigData::default()).await.unwrap();

        assert!(result.dirty);
        assert_eq!(last_target(&client), Some(ProvisionTarget::Provide));
    }

    #[tokio::test]
    async fn test_provision_from_available_deploys() {
        let (client, mut prov) = setup(ProvisionState::Available);
        let config = HostConfigData {
            user_data: Some("#cloud-config\n".to_string()),
            network_data: Some(r#"{"links": []}"#.to_string()),
            meta_data: None,
        };

        let result = prov.provision(config).await.unwrap();

        assert!(result.dirty);
        let node = client.node(NODE_UUID).unwrap();
        assert_eq!(node.instance_info["image_source"], "not-empty");
        assert_eq!(node.instance_info["capabilities"]["boot_mode"], "uefi");

        let requests = client.provision_requests();
        let (_, opts) = requests.last().unwrap();
        assert_eq!(opts.target, ProvisionTarget::Active);
        let drive = opts.configdrive.as_ref().unwrap();
        assert_eq!(drive["user_data"], "#cloud-config\n");
        assert_eq!(drive["meta_data"]["metal3-name"], "myhost");
        assert!(drive["network_data"]["links"].is_array());
    }

    #[tokio::test]
    async fn test_provision_terminal_states() {
        let (_, mut prov) = setup(ProvisionState::Active);
        let result = prov.provision(HostConfigData::default()).await.unwrap();
        assert!(!result.dirty);
        assert!(!result.failed());

        let (_, mut prov) = setup(ProvisionState::DeployFail);
        let result = prov.provision(HostConfigData::default()).await.unwrap();
        assert!(result.failed());

        let (_, mut prov) = setup(ProvisionState::DeployWait);
        let result = prov.provision(HostConfigData::default()).await.unwrap();
        assert!(result.dirty);
    }

    #[tokio::test]
    async fn test_provision_active_with_other_image_fails() {
        let client = MockIronicClient::new("http://ironic.test:6385");
        let mut node = Node::new(NODE_UUID, ProvisionState::Active);
        node.instance_info
            .insert("image_source".to_string(), serde_json::json!("http://img/A.qcow2"));
        client.add_node(node);
        let mut prov = ironic_provisioner(&client, ironic_host());

        let result = prov.provision(HostConfigData::default()).await.unwrap();

        assert!(result.failed(), "Active node running another image is not a finished deploy");
        assert!(result.error_message.contains("http://img/A.qcow2"));

        let client = MockIronicClient::new("http://ironic.test:6385");
        let mut node = Node::new(NODE_UUID, ProvisionState::Active);
        node.instance_info.insert("image_source".to_string(), serde_json::json!("not-empty"));
        client.add_node(node);
        let mut prov = ironic_provisioner(&client, ironic_host());

        let result = prov.provision(HostConfigData::default()).await.unwrap();
        assert!(!result.failed());
        assert!(!result.dirty);
    }

    #[tokio::test]
    async fn test_adopt() {
        let (client, mut prov) = setup(ProvisionState::Manageable);
        let result = prov.adopt(false).await.unwrap();
        assert!(result.dirty);
        assert_eq!(last_target(&client), Some(ProvisionTarget::Adopt));

        let (_, mut prov) = setup(ProvisionState::AdoptFail);
        assert!(prov.adopt(false).await.unwrap().failed());

        let (_, mut prov) = setup(ProvisionState::Active);
        assert!(!prov.adopt(false).await.unwrap().dirty);
    }

    #[tokio::test]
    async fn test_deprovision() {
        let (client, mut prov) = setup(ProvisionState::Active);
        let result = prov.deprovision(false).await.unwrap();
        assert!(result.dirty);
        assert_eq!(last_target(&client), Some(ProvisionTarget::Deleted));

        let (_, mut prov) = setup(ProvisionState::Available);
        assert!(!prov.deprovision(false).await.unwrap().dirty);

        let (client, mut prov) = setup(ProvisionState::CleanFail);
        assert!(prov.deprovision(false).await.unwrap().failed());
        assert!(prov.deprovision(true).await.unwrap().dirty);
        assert_eq!(last_target(&client), Some(ProvisionTarget::Manage));
    }

    #[tokio::test]
    async fn test_deprovision_without_node() {
        let client = MockIronicClient::new("http://ironic.test:6385");
        let mut prov = ironic_provisioner(&client, ironic_host());

        let result = prov.deprovision(false).await.unwrap();

        assert!(!result.dirty);
        assert!(!result.failed());
    }

    #[tokio::test]
    async fn test_delete_sets_maintenance_first() {
        let (client, mut prov) = setup(ProvisionState::Available);

        let result = prov.delete().await.unwrap();
        assert!(result.dirty);
        assert!(client.node(NODE_UUID).unwrap().maintenance);

        let result = prov.delete().await.unwrap();
        assert!(!result.dirty);
        assert!(client.node(NODE_UUID).is_none(), "Node must be removed");

        let result = prov.delete().await.unwrap();
        assert!(!result.dirty, "Deleting a missing node is complete");
    }

    #[tokio::test]
    async fn test_power_on() {
        let client = MockIronicClient::new("http://ironic.test:6385");
        let mut node = Node::new(NODE_UUID, ProvisionState::Active);
        node.power_state = Some(PowerState::Off);
        client.add_node(node);
        let mut prov = ironic_provisioner(&client, ironic_host());

        let result = prov.power_on().await.unwrap();
        assert!(result.dirty);
        assert_eq!(client.power_requests(), vec![(NODE_UUID.to_string(), PowerTarget::On)]);

        let result = prov.power_off().await.unwrap();
        assert!(!result.dirty, "Already off");
    }

    #[tokio::test]
    async fn test_power_change_pending() {
        let client = MockIronicClient::new("http://ironic.test:6385");
        let mut node = Node::new(NODE_UUID, ProvisionState::Active);
        node.power_state = Some(PowerState::Off);
        node.target_power_state = Some(PowerState::On);
        client.add_node(node);
        let mut prov = ironic_provisioner(&client, ironic_host());

        let result = prov.power_on().await.unwrap();

        assert!(result.dirty);
        assert!(client.power_requests().is_empty());
    }

    #[tokio::test]
    async fn test_update_hardware_state() {
        let client = MockIronicClient::new("http://ironic.test:6385");
        let mut node = Node::new(NODE_UUID, ProvisionState::Active);
        node.power_state = Some(PowerState::On);
        client.add_node(node);
        let mut prov = ironic_provisioner(&client, ironic_host());

        let state = prov.update_hardware_state().await.unwrap();

        assert_eq!(state.powered_on, Some(true));
    }

    #[tokio::test]
    async fn test_is_ready() {
        let (client, mut prov) = setup(ProvisionState::Available);
        assert!(prov.is_ready().await.unwrap());

        client.set_available(false);
        assert!(!prov.is_ready().await.unwrap());
    }

    #[tokio::test]
    async fn test_provisioning_capacity() {
        // Limit is 2 busy nodes
        let (client, mut prov) = setup(ProvisionState::Available);
        client.add_node(Node::new("busy-1", ProvisionState::Deploying));
        assert!(prov.has_provisioning_capacity().await.unwrap());

        client.add_node(Node::new("busy-2", ProvisionState::CleanWait));
        assert!(!prov.has_provisioning_capacity().await.unwrap());

        // A host already holding a slot keeps it
        let (client, mut prov) = setup(ProvisionState::Inspecting);
        client.add_node(Node::new("busy-1", ProvisionState::Deploying));
        client.add_node(Node::new("busy-2", ProvisionState::CleanWait));
        assert!(prov.has_provisioning_capacity().await.unwrap());
    }
}
