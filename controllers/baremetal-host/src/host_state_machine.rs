//! Host lifecycle state machine.
//!
//! One call to [`HostStateMachine::reconcile_state`] advances a host by at
//! most one provisioning state:
//!
//! ```text
//! registering -> inspecting -> match profile -> preparing -> ready
//!     -> provisioning -> provisioned
//! ```
//!
//! `inspecting` and `provisioning` are capacity limited: a host only enters
//! (or stays in) them while the provisioner reports free capacity, and is
//! marked `delayed` otherwise.

use crate::action_result::{ActionResult, STEADY_STATE_REQUEUE};
use crate::host_actions::{
    action_adopting, action_deleting, action_deprovisioning, action_inspecting, action_manage_power,
    action_preparing, action_provisioning, register_host,
};
use crate::metrics::ControllerMetrics;
use crate::provisioner::{Provisioner, ProvisionerError};
use crate::reconcile_info::ReconcileInfo;
use crds::{BareMetalHost, DEFAULT_BOOT_MODE, ErrorType, OperationalStatus, ProvisioningState};
use tracing::{debug, info};

pub struct HostStateMachine<'a> {
    provisioner: &'a mut dyn Provisioner,
    metrics: &'a ControllerMetrics,
    next_state: ProvisioningState,
    /// Whether BMC credentials could be loaded for this pass
    have_creds: bool,
}

/// States a host may only occupy while the provisioner has capacity
fn is_capacity_limited(state: ProvisioningState) -> bool {
    matches!(
        state,
        ProvisioningState::Inspecting | ProvisioningState::Provisioning
    )
}

impl<'a> HostStateMachine<'a> {
    pub fn new(provisioner: &'a mut dyn Provisioner, metrics: &'a ControllerMetrics, have_creds: bool) -> Self {
        Self {
            provisioner,
            metrics,
            next_state: ProvisioningState::None,
            have_creds,
        }
    }

    /// Run one pass of the state machine against `info.host`
    pub async fn reconcile_state(&mut self, info: &mut ReconcileInfo) -> ActionResult {
        let initial_state = info.host.provisioning_state();
        self.next_state = initial_state;

        let result = self.run(info, initial_state).await;

        if self.next_state != initial_state {
            if let Some(result) = self.update_host_state_from(initial_state, info).await {
                return result;
            }
        }
        result
    }

    async fn run(&mut self, info: &mut ReconcileInfo, initial_state: ProvisioningState) -> ActionResult {
        if self.check_initiate_delete(info) {
            return ActionResult::Complete;
        }

        if let Some(result) = self.ensure_registered(info).await {
            let counter = self.metrics.registration_required_counter(&info.request.to_string());
            info.push_callback(move || counter.inc());
            return result;
        }

        if update_boot_mode_status(&mut info.host) {
            return ActionResult::Update;
        }

        if let Some(result) = self.check_delayed_host(info, initial_state).await {
            return result;
        }

        let result = match initial_state {
            ProvisioningState::None => Ok(self.handle_none(info)),
            ProvisioningState::Unmanaged => Ok(self.handle_unmanaged(info)),
            ProvisioningState::Registering => Ok(self.handle_registering(info)),
            ProvisioningState::Inspecting => self.handle_inspecting(info).await,
            ProvisioningState::MatchProfile => Ok(self.handle_match_profile(info)),
            ProvisioningState::Preparing => self.handle_preparing(info).await,
            ProvisioningState::Ready => self.handle_ready(info).await,
            ProvisioningState::Provisioning => self.handle_provisioning(info).await,
            ProvisioningState::Provisioned => self.handle_provisioned(info).await,
            ProvisioningState::ExternallyProvisioned => self.handle_externally_provisioned(info).await,
            ProvisioningState::Deprovisioning => self.handle_deprovisioning(info).await,
            ProvisioningState::Deleting => self.handle_deleting(info).await,
        };
        result.unwrap_or_else(ActionResult::Error)
    }

    /// Move a host marked for deletion onto the teardown path
    fn check_initiate_delete(&mut self, info: &ReconcileInfo) -> bool {
        if info.host.metadata.deletion_timestamp.is_none() {
            return false;
        }
        match self.next_state {
            ProvisioningState::Deprovisioning | ProvisioningState::Deleting => false,
            ProvisioningState::Provisioning | ProvisioningState::Provisioned => {
                info!("Host {} is being deleted, deprovisioning first", info.request);
                self.next_state = ProvisioningState::Deprovisioning;
                true
            }
            _ => {
                info!("Host {} is being deleted", info.request);
                self.next_state = ProvisioningState::Deleting;
                true
            }
        }
    }

    async fn ensure_registered(&mut self, info: &mut ReconcileInfo) -> Option<ActionResult> {
        if !self.have_creds {
            return None;
        }

        match self.next_state {
            ProvisioningState::None
            | ProvisioningState::Unmanaged
            | ProvisioningState::MatchProfile
            | ProvisioningState::Deleting => return None,
            ProvisioningState::Registering => {}
            _ => {
                let retrying = info.host.error_type() == Some(ErrorType::RegistrationError)
                    || info.bmc_creds_secret.as_ref().is_some_and(|secret| {
                        info.host
                            .status
                            .as_ref()
                            .is_none_or(|status| !status.good_credentials.matches(secret))
                    });
                if retrying {
                    info!("Retrying registration of host {}", info.request);
                    if let Some(metric) = info.host.operation_metric_mut(ProvisioningState::Registering) {
                        metric.start = Some(chrono::Utc::now());
                        metric.end = None;
                    }
                }
            }
        }

        match register_host(&mut *self.provisioner, self.metrics, info).await {
            Ok(Some(ActionResult::Complete)) if self.next_state != ProvisioningState::Registering => {
                Some(ActionResult::Update)
            }
            Ok(result) => result,
            Err(e) => Some(ActionResult::Error(e)),
        }
    }

    /// Hold the host back while the provisioner has no free capacity
    async fn check_delayed_host(
        &mut self,
        info: &mut ReconcileInfo,
        initial_state: ProvisioningState,
    ) -> Option<ActionResult> {
        if info.host.operational_status() == OperationalStatus::Delayed {
            return Some(match self.provisioner.has_provisioning_capacity().await {
                Ok(false) => self.delay(info),
                Ok(true) => {
                    info!("Capacity available again for host {}", info.request);
                    info.host.clear_delayed();
                    ActionResult::Update
                }
                Err(e) => ActionResult::Error(e),
            });
        }

        if is_capacity_limited(initial_state) {
            match self.provisioner.has_provisioning_capacity().await {
                Ok(true) => {}
                Ok(false) => return Some(self.delay(info)),
                Err(e) => return Some(ActionResult::Error(e)),
            }
        }
        None
    }

    fn delay(&self, info: &mut ReconcileInfo) -> ActionResult {
        info!("No provisioning capacity, delaying host {}", info.request);
        info.host.set_delayed();
        let counter = self.metrics.delayed_provisioning_counter(&info.request.to_string());
        info.push_callback(move || counter.inc());
        ActionResult::Delayed
    }

    /// Commit `next_state` to the host status.
    ///
    /// Returns a result to use instead of the handler's when entering the
    /// new state has to wait for capacity.
    async fn update_host_state_from(
        &mut self,
        initial_state: ProvisioningState,
        info: &mut ReconcileInfo,
    ) -> Option<ActionResult> {
        let next_state = self.next_state;

        if is_capacity_limited(next_state) {
            match self.provisioner.has_provisioning_capacity().await {
                Ok(true) => {}
                Ok(false) => {
                    self.next_state = initial_state;
                    return Some(self.delay(info));
                }
                Err(e) => {
                    self.next_state = initial_state;
                    return Some(ActionResult::Error(e));
                }
            }
        }

        info!(
            "Host {} changing provisioning state from {} to {}",
            info.request,
            initial_state.as_str(),
            next_state.as_str()
        );

        let now = chrono::Utc::now();
        if let Some(metric) = info.host.operation_metric_mut(initial_state) {
            metric.end = Some(now);
        }
        if let Some(metric) = info.host.operation_metric_mut(next_state) {
            metric.start = Some(now);
            metric.end = None;
        }

        let status = info.host.status_mut();
        status.provisioning.state = next_state;
        if status.error_type == Some(ErrorType::ProvisionedRegistrationError) {
            // Only cleared by leaving the state that produced it
            status.operational_status = OperationalStatus::Ok;
            status.error_type = None;
            status.error_message.clear();
        }
        // Leaving ready keeps the count of earlier failures
        if initial_state != ProvisioningState::Ready {
            status.error_count = 0;
        }

        let counter = self
            .metrics
            .state_change_counter(initial_state.as_str(), next_state.as_str());
        info.push_callback(move || counter.inc());
        None
    }

    fn handle_none(&mut self, info: &mut ReconcileInfo) -> ActionResult {
        info.host.clear_error();
        self.next_state = if info.host.has_bmc_details() {
            ProvisioningState::Registering
        } else {
            ProvisioningState::Unmanaged
        };
        ActionResult::Complete
    }

    fn handle_unmanaged(&mut self, info: &mut ReconcileInfo) -> ActionResult {
        if info.host.has_bmc_details() {
            self.next_state = ProvisioningState::Registering;
            return ActionResult::Complete;
        }
        debug!("Host {} has no BMC details", info.request);
        ActionResult::ContinueNoWrite {
            delay: STEADY_STATE_REQUEUE,
        }
    }

    fn handle_registering(&mut self, info: &mut ReconcileInfo) -> ActionResult {
        // Reaching a handler means the current credentials were accepted
        info.host.clear_error();
        self.next_state = if info.host.spec.externally_provisioned {
            ProvisioningState::ExternallyProvisioned
        } else {
            ProvisioningState::Inspecting
        };
        ActionResult::Complete
    }

    async fn handle_inspecting(&mut self, info: &mut ReconcileInfo) -> Result<ActionResult, ProvisionerError> {
        let result = action_inspecting(&mut *self.provisioner, self.metrics, info).await?;
        if matches!(result, ActionResult::Complete) {
            self.next_state = ProvisioningState::MatchProfile;
        }
        Ok(result)
    }

    fn handle_match_profile(&mut self, info: &mut ReconcileInfo) -> ActionResult {
        info.host.clear_error();
        self.next_state = ProvisioningState::Preparing;
        ActionResult::Complete
    }

    async fn handle_preparing(&mut self, info: &mut ReconcileInfo) -> Result<ActionResult, ProvisionerError> {
        let result = action_preparing(&mut *self.provisioner, self.metrics, info).await?;
        if matches!(result, ActionResult::Complete) {
            self.next_state = ProvisioningState::Ready;
        }
        Ok(result)
    }

    async fn handle_ready(&mut self, info: &mut ReconcileInfo) -> Result<ActionResult, ProvisionerError> {
        if info.host.spec.externally_provisioned {
            info.host.clear_error();
            self.next_state = ProvisioningState::ExternallyProvisioned;
            return Ok(ActionResult::Complete);
        }

        if info.host.needs_provisioning() {
            info.host.clear_error();
            self.next_state = ProvisioningState::Provisioning;
            return Ok(ActionResult::Complete);
        }

        action_manage_power(&mut *self.provisioner, self.metrics, info).await
    }

    async fn handle_provisioning(&mut self, info: &mut ReconcileInfo) -> Result<ActionResult, ProvisionerError> {
        if provisioning_cancelled(&info.host) {
            info!("Provisioning of host {} cancelled", info.request);
            self.next_state = ProvisioningState::Deprovisioning;
            return Ok(ActionResult::Complete);
        }

        let result = action_provisioning(&mut *self.provisioner, self.metrics, info).await?;
        if matches!(result, ActionResult::Complete) {
            self.next_state = ProvisioningState::Provisioned;
        }
        Ok(result)
    }

    async fn handle_provisioned(&mut self, info: &mut ReconcileInfo) -> Result<ActionResult, ProvisionerError> {
        if provisioning_cancelled(&info.host) {
            info!("Image of host {} changed or removed, deprovisioning", info.request);
            self.next_state = ProvisioningState::Deprovisioning;
            return Ok(ActionResult::Complete);
        }

        action_manage_power(&mut *self.provisioner, self.metrics, info).await
    }

    async fn handle_externally_provisioned(
        &mut self,
        info: &mut ReconcileInfo,
    ) -> Result<ActionResult, ProvisionerError> {
        if !info.host.spec.externally_provisioned {
            self.next_state = ProvisioningState::Inspecting;
            return Ok(ActionResult::Complete);
        }

        if let Some(result) = action_adopting(&mut *self.provisioner, self.metrics, info).await? {
            return Ok(result);
        }
        action_manage_power(&mut *self.provisioner, self.metrics, info).await
    }

    async fn handle_deprovisioning(&mut self, info: &mut ReconcileInfo) -> Result<ActionResult, ProvisionerError> {
        let result = action_deprovisioning(&mut *self.provisioner, self.metrics, info).await?;
        if matches!(result, ActionResult::Complete) {
            self.next_state = if info.host.metadata.deletion_timestamp.is_some() {
                ProvisioningState::Deleting
            } else {
                ProvisioningState::Ready
            };
        }
        Ok(result)
    }

    async fn handle_deleting(&mut self, info: &mut ReconcileInfo) -> Result<ActionResult, ProvisionerError> {
        action_deleting(&mut *self.provisioner, self.metrics, info).await
    }
}

/// Whether the requested image no longer matches what is (being) written
pub fn provisioning_cancelled(host: &BareMetalHost) -> bool {
    let Some(image) = &host.spec.image else {
        return true;
    };
    if image.url.is_empty() {
        return true;
    }
    let applied = host
        .status
        .as_ref()
        .map(|status| status.provisioning.image.url.as_str())
        .unwrap_or_default();
    !applied.is_empty() && applied != image.url
}

/// Copy the requested boot mode into status, defaulting it when unset.
///
/// Returns whether the status changed.
pub fn update_boot_mode_status(host: &mut BareMetalHost) -> bool {
    let requested = host.spec.boot_mode;
    let status = host.status_mut();
    match (requested, status.provisioning.boot_mode) {
        (Some(mode), Some(current)) if mode == current => false,
        (Some(mode), _) => {
            status.provisioning.boot_mode = Some(mode);
            true
        }
        (None, None) => {
            status.provisioning.boot_mode = Some(DEFAULT_BOOT_MODE);
            true
        }
        (None, Some(_)) => false,
    }
}
