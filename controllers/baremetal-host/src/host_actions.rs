//! Provisioner calls made on behalf of the host state machine.
//!
//! Each action runs one provisioner operation, folds its outcome into the
//! host status and reports what the reconciler should do next. Operation
//! failures are recorded on the host; only transient backend faults come
//! back as `Err`.

use crate::action_result::{ActionResult, STEADY_STATE_REQUEUE};
use crate::metrics::ControllerMetrics;
use crate::provisioner::{ProvisionResult, Provisioner, ProvisionerError};
use crate::reconcile_info::ReconcileInfo;
use crds::{ErrorType, Image, ProvisioningState};
use tracing::{debug, info, warn};

/// Record a failed operation on the host and count it once persisted
pub fn record_action_failure(
    info: &mut ReconcileInfo,
    metrics: &ControllerMetrics,
    error_type: ErrorType,
    message: impl Into<String>,
) -> ActionResult {
    let message = message.into();
    warn!("{} for host {}: {}", error_type, info.request, message);
    info.host.set_error(error_type, message);
    let counter = metrics.host_error_counter(error_type.as_str());
    info.push_callback(move || counter.inc());
    ActionResult::Failed {
        error_count: info.host.error_count(),
    }
}

fn continuing(result: &ProvisionResult) -> ActionResult {
    ActionResult::Continue {
        delay: result.requeue_after,
    }
}

/// Register the host with the provisioner and check its credentials.
///
/// Returns `None` when the host was already registered and nothing about
/// its registration changed.
pub async fn register_host(
    provisioner: &mut dyn Provisioner,
    metrics: &ControllerMetrics,
    info: &mut ReconcileInfo,
) -> Result<Option<ActionResult>, ProvisionerError> {
    let secret = info
        .bmc_creds_secret
        .clone()
        .ok_or_else(|| ProvisionerError::Internal(format!("no credentials loaded for {}", info.request)))?;

    let status = info.host.status_mut();
    let credentials_changed = !status.good_credentials.matches(&secret);
    if credentials_changed {
        info!("New BMC credentials for host {}", info.request);
        info.host.update_tried_credentials(&secret);
        let counter = metrics.credentials_updated_counter();
        info.push_callback(move || counter.inc());
    }

    let force = info.host.error_type() == Some(ErrorType::RegistrationError);
    let (result, provisioner_id) = provisioner
        .validate_management_access(credentials_changed, force)
        .await?;

    if result.failed() {
        let error_type = match info.host.provisioning_state() {
            ProvisioningState::Provisioned | ProvisioningState::ExternallyProvisioned => {
                ErrorType::ProvisionedRegistrationError
            }
            _ => ErrorType::RegistrationError,
        };
        return Ok(Some(record_action_failure(info, metrics, error_type, result.error_message)));
    }

    let status = info.host.status_mut();
    if !provisioner_id.is_empty() && status.provisioning.id != provisioner_id {
        info!("Host {} registered as {}", info.request, provisioner_id);
        status.provisioning.id = provisioner_id;
        return Ok(Some(ActionResult::Update));
    }

    if result.dirty {
        info.host.clear_error();
        return Ok(Some(continuing(&result)));
    }

    if credentials_changed {
        info!("BMC credentials verified for host {}", info.request);
        info.host.update_good_credentials(&secret);
        let counter = metrics.credentials_validated_counter();
        info.push_callback(move || counter.inc());
        info.host.clear_error();
        return Ok(Some(ActionResult::Complete));
    }

    if info.host.error_type() == Some(ErrorType::RegistrationError) {
        info.host.clear_error();
        return Ok(Some(ActionResult::Complete));
    }

    Ok(None)
}

/// Run or poll hardware inspection, storing the details once available
pub async fn action_inspecting(
    provisioner: &mut dyn Provisioner,
    metrics: &ControllerMetrics,
    info: &mut ReconcileInfo,
) -> Result<ActionResult, ProvisionerError> {
    let force = info.host.error_type() == Some(ErrorType::InspectionError);
    let (result, details) = provisioner.inspect_hardware(force).await?;

    if result.failed() {
        return Ok(record_action_failure(info, metrics, ErrorType::InspectionError, result.error_message));
    }
    if result.dirty {
        info.host.clear_error();
        return Ok(continuing(&result));
    }

    let Some(details) = details else {
        debug!("No hardware details for {} yet", info.request);
        return Ok(ActionResult::ContinueNoWrite {
            delay: result.requeue_after,
        });
    };

    info.host.status_mut().hardware = Some(details);
    info.host.clear_error();
    Ok(ActionResult::Complete)
}

/// Bring the backend cleaning state in line with the host settings
pub async fn action_preparing(
    provisioner: &mut dyn Provisioner,
    metrics: &ControllerMetrics,
    info: &mut ReconcileInfo,
) -> Result<ActionResult, ProvisionerError> {
    let requested_hints = info.host.spec.root_device_hints.clone();
    let unprepared = info.host.status_mut().provisioning.root_device_hints != requested_hints;

    let (result, started) = provisioner.prepare(unprepared).await?;

    if result.failed() {
        // Force a fresh preparation on the next attempt
        info.host.status_mut().provisioning.root_device_hints = None;
        return Ok(record_action_failure(info, metrics, ErrorType::PreparationError, result.error_message));
    }

    if started {
        info!("Started preparing host {}", info.request);
        info.host.status_mut().provisioning.root_device_hints = requested_hints.clone();
    }
    if result.dirty {
        return Ok(continuing(&result));
    }

    info.host.status_mut().provisioning.root_device_hints = requested_hints;
    info.host.clear_error();
    Ok(ActionResult::Complete)
}

/// Write the image to the host
pub async fn action_provisioning(
    provisioner: &mut dyn Provisioner,
    metrics: &ControllerMetrics,
    info: &mut ReconcileInfo,
) -> Result<ActionResult, ProvisionerError> {
    // Record the image being written so a later spec change cancels the deploy
    if info.host.status_mut().provisioning.image.url.is_empty() {
        let image = info.host.spec.image.clone().unwrap_or_default();
        info.host.status_mut().provisioning.image = image;
    }

    let result = provisioner.provision(info.host_config.clone()).await?;

    if result.failed() {
        return Ok(record_action_failure(info, metrics, ErrorType::ProvisioningError, result.error_message));
    }
    if result.dirty {
        return Ok(continuing(&result));
    }

    info!("Provisioning of host {} complete", info.request);
    info.host.clear_error();
    Ok(ActionResult::Complete)
}

/// Take over an externally provisioned host
pub async fn action_adopting(
    provisioner: &mut dyn Provisioner,
    metrics: &ControllerMetrics,
    info: &mut ReconcileInfo,
) -> Result<Option<ActionResult>, ProvisionerError> {
    let force = info.host.error_type() == Some(ErrorType::ProvisioningError);
    let result = provisioner.adopt(force).await?;

    if result.failed() {
        return Ok(Some(record_action_failure(
            info,
            metrics,
            ErrorType::ProvisioningError,
            result.error_message,
        )));
    }
    if result.dirty {
        return Ok(Some(continuing(&result)));
    }
    Ok(None)
}

/// Remove the image from the host
pub async fn action_deprovisioning(
    provisioner: &mut dyn Provisioner,
    metrics: &ControllerMetrics,
    info: &mut ReconcileInfo,
) -> Result<ActionResult, ProvisionerError> {
    let force = info.host.error_type() == Some(ErrorType::DeprovisioningError);
    let result = provisioner.deprovision(force).await?;

    if result.failed() {
        return Ok(record_action_failure(info, metrics, ErrorType::DeprovisioningError, result.error_message));
    }
    if result.dirty {
        return Ok(continuing(&result));
    }

    info!("Deprovisioning of host {} complete", info.request);
    info.host.status_mut().provisioning.image = Image::default();
    info.host.clear_error();
    Ok(ActionResult::Complete)
}

/// Remove the host from the provisioner
pub async fn action_deleting(
    provisioner: &mut dyn Provisioner,
    metrics: &ControllerMetrics,
    info: &mut ReconcileInfo,
) -> Result<ActionResult, ProvisionerError> {
    let result = provisioner.delete().await?;

    if result.failed() {
        return Ok(record_action_failure(info, metrics, ErrorType::DeprovisioningError, result.error_message));
    }
    if result.dirty {
        return Ok(continuing(&result));
    }

    info!("Host {} removed from the provisioner", info.request);
    Ok(ActionResult::Deleted)
}

/// Keep the power state of a settled host in line with `spec.online`
pub async fn action_manage_power(
    provisioner: &mut dyn Provisioner,
    metrics: &ControllerMetrics,
    info: &mut ReconcileInfo,
) -> Result<ActionResult, ProvisionerError> {
    let hardware = provisioner.update_hardware_state().await?;

    let status = info.host.status_mut();
    if let Some(powered_on) = hardware.powered_on {
        if status.powered_on != powered_on {
            info!("Host {} power state is now {}", info.request, powered_on);
            status.powered_on = powered_on;
            return Ok(ActionResult::Update);
        }
    }

    let desired = info.host.spec.online;
    if info.host.status_mut().powered_on == desired {
        return Ok(ActionResult::ContinueNoWrite {
            delay: STEADY_STATE_REQUEUE,
        });
    }

    info!("Powering {} host {}", if desired { "on" } else { "off" }, info.request);
    let result = if desired {
        provisioner.power_on().await?
    } else {
        provisioner.power_off().await?
    };

    if result.failed() {
        return Ok(record_action_failure(info, metrics, ErrorType::PowerManagementError, result.error_message));
    }
    if result.dirty {
        return Ok(continuing(&result));
    }

    info.host.status_mut().powered_on = desired;
    info.host.clear_error();
    Ok(ActionResult::Update)
}
