//! Preparation (manual cleaning) of an Ironic node.

use super::{IronicProvisioner, PROVISION_REQUEUE_DELAY};
use crate::provisioner::{ProvisionResult, ProvisionerError};
use ironic_client::{CleanStep, ProvisionState, ProvisionStateOpts, ProvisionTarget};
use tracing::{debug, info};

impl IronicProvisioner {
    /// Manual cleaning steps needed to apply the host's settings.
    ///
    /// TODO: derive RAID and firmware steps once those settings exist on the host spec.
    pub(super) fn manual_cleaning_steps(&self) -> Vec<CleanStep> {
        Vec::new()
    }

    /// Drive the node through manual cleaning.
    ///
    /// Returns whether this call started a cleaning run.
    pub(super) async fn prepare_node(
        &mut self,
        unprepared: bool,
    ) -> Result<(ProvisionResult, bool), ProvisionerError> {
        let node = self.node().await?;
        let steps = if unprepared {
            self.manual_cleaning_steps()
        } else {
            Vec::new()
        };
        debug!(
            "Preparing node {} in state {} (unprepared: {}, steps: {})",
            node.uuid,
            node.provision_state,
            unprepared,
            steps.len()
        );

        match node.provision_state {
            ProvisionState::Manageable if !steps.is_empty() => {
                info!("Starting manual cleaning of node {}", node.uuid);
                let opts = ProvisionStateOpts {
                    clean_steps: Some(steps),
                    ..ProvisionStateOpts::new(ProvisionTarget::Clean)
                };
                let result = self.change_provision_state(&node, opts).await?;
                Ok((result, true))
            }
            ProvisionState::Manageable => Ok((ProvisionResult::operation_complete(), false)),
            ProvisionState::Available if !steps.is_empty() => {
                // Manual cleaning starts from manageable
                let result = self
                    .change_provision_state(&node, ProvisionStateOpts::new(ProvisionTarget::Manage))
                    .await?;
                Ok((result, false))
            }
            ProvisionState::Available => Ok((ProvisionResult::operation_complete(), false)),
            ProvisionState::CleanFail if !unprepared => {
                // Settings already applied; only a settings change retries cleaning
                debug!(
                    "Node {} failed cleaning ({}), waiting for new settings",
                    node.uuid,
                    node.last_error.as_deref().unwrap_or("no error reported")
                );
                Ok((ProvisionResult::operation_complete(), false))
            }
            ProvisionState::CleanFail => {
                let result = if node.maintenance {
                    info!("Clearing maintenance on node {} after failed cleaning", node.uuid);
                    self.set_maintenance_flag(&node, false, "").await?
                } else {
                    self.change_provision_state(&node, ProvisionStateOpts::new(ProvisionTarget::Manage))
                        .await?
                };
                Ok((result, false))
            }
            ProvisionState::Cleaning | ProvisionState::CleanWait => Ok((
                ProvisionResult::operation_continuing(PROVISION_REQUEUE_DELAY),
                false,
            )),
            other => Err(ProvisionerError::UnexpectedState(format!(
                "node {} is {} while preparing",
                node.uuid, other
            ))),
        }
    }
}
