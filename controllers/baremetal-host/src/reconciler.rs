//! Reconciliation of `BareMetalHost` resources.
//!
//! Each pass loads the BMC credentials, builds a provisioner for the host,
//! runs one step of the host state machine and writes the resulting status
//! back. Metric callbacks queued by the state machine only run once that
//! write has succeeded.

use crate::action_result::ActionResult;
use crate::error::ControllerError;
use crate::host_actions::record_action_failure;
use crate::host_state_machine::HostStateMachine;
use crate::metrics::ControllerMetrics;
use crate::provisioner::{BmcCredentials, HostConfigData, ProvisionerFactory};
use crate::reconcile_info::{HostRequest, ReconcileInfo};
use chrono::Utc;
use crds::{BareMetalHost, BareMetalHostStatus, ErrorType, ProvisioningState, SecretReference};
use k8s_openapi::api::core::v1::Secret;
use kube::api::{Patch, PatchParams};
use kube::{Api, Client, ResourceExt};
use kube_runtime::controller::Action;
use serde_json::Value;
use std::sync::Arc;
use tracing::{Instrument, debug, error, info, warn};

/// Finalizer holding a host until it has been removed from the provisioner
pub const HOST_FINALIZER: &str = "baremetalhost.metal3.io";

/// Secret keys holding config drive contents, in lookup order
const USER_DATA_KEYS: &[&str] = &["userData", "value"];
const NETWORK_DATA_KEYS: &[&str] = &["networkData", "nmstate"];
const META_DATA_KEYS: &[&str] = &["metaData"];

/// Reconciles BareMetalHost resources.
pub struct Reconciler {
    client: Client,
    provisioner_factory: Arc<dyn ProvisionerFactory>,
    metrics: ControllerMetrics,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler").field("metrics", &self.metrics).finish_non_exhaustive()
    }
}

impl Reconciler {
    /// Creates a new reconciler instance.
    pub fn new(
        client: Client,
        provisioner_factory: Arc<dyn ProvisionerFactory>,
        metrics: ControllerMetrics,
    ) -> Self {
        Self {
            client,
            provisioner_factory,
            metrics,
        }
    }

    /// Reconciles a BareMetalHost resource.
    ///
    /// This method:
    /// 1. Makes sure the host carries the finalizer
    /// 2. Loads the BMC credentials Secret
    /// 3. Runs one pass of the host state machine
    /// 4. Persists the status when it changed, then runs the queued callbacks
    /// 5. Drops the finalizer once the host is deleted from the provisioner
    pub async fn reconcile_host(&self, host: &BareMetalHost) -> Result<Action, ControllerError> {
        let request = HostRequest::from_host(host);
        if request.name.is_empty() || request.namespace.is_empty() {
            return Err(ControllerError::MissingField(
                "BareMetalHost missing name or namespace".to_string(),
            ));
        }
        let api: Api<BareMetalHost> = Api::namespaced(self.client.clone(), &request.namespace);
        let mut host = host.clone();

        if host.metadata.deletion_timestamp.is_none() {
            if !has_finalizer(&host) {
                debug!("Adding finalizer to host {}", request);
                host = self.add_finalizer(&api, &host).await?;
            }
        } else if !has_finalizer(&host) {
            debug!("Host {} is being deleted and already released", request);
            return Ok(Action::await_change());
        }

        let stored_status = host.status.clone();
        let secret = self.fetch_bmc_secret(&host).await?;
        let mut info = ReconcileInfo::new(request, host, secret);
        let span = info.span.clone();

        async {
            let credentials = match self.load_credentials(&info) {
                Ok(credentials) => credentials,
                Err(message) => {
                    let result = record_action_failure(&mut info, &self.metrics, ErrorType::RegistrationError, message);
                    return self.finish(&api, &mut info, stored_status.as_ref(), result).await;
                }
            };
            let have_creds = credentials.is_some();

            if info.host.provisioning_state() == ProvisioningState::Provisioning {
                info.host_config = self.load_host_config(&info.host).await?;
            }

            let mut provisioner = self
                .provisioner_factory
                .build(&info.host, credentials.unwrap_or_default());
            let result = HostStateMachine::new(provisioner.as_mut(), &self.metrics, have_creds)
                .reconcile_state(&mut info)
                .await;

            self.finish(&api, &mut info, stored_status.as_ref(), result).await
        }
        .instrument(span)
        .await
    }

    /// Persist the state machine outcome and turn it into a requeue decision
    async fn finish(
        &self,
        api: &Api<BareMetalHost>,
        info: &mut ReconcileInfo,
        stored_status: Option<&BareMetalHostStatus>,
        result: ActionResult,
    ) -> Result<Action, ControllerError> {
        self.metrics.reconcile_completed(result.outcome());

        match result {
            ActionResult::Error(e) => {
                error!("Failed to reconcile host {}: {}", info.request, e);
                return Err(e.into());
            }
            ActionResult::Deleted => {
                info!("Host {} removed from the provisioner, releasing it", info.request);
                self.remove_finalizer(api, &info.host).await?;
                return Ok(Action::await_change());
            }
            _ => {}
        }

        if result.dirty() {
            info.host.status_mut().last_updated = Some(Utc::now());
            self.save_status(api, &info.host, stored_status).await?;
            info.run_post_save_callbacks();
        }

        Ok(requeue_action(&result))
    }

    /// Resolve credentials for this pass.
    ///
    /// `Ok(None)` means the host runs without credentials: it has no BMC, or
    /// it is being deleted and the Secret is already gone. `Err` carries the
    /// message to record as a registration error.
    fn load_credentials(&self, info: &ReconcileInfo) -> Result<Option<BmcCredentials>, String> {
        if !info.host.has_bmc_details() {
            return Ok(None);
        }
        let deleting = info.host.metadata.deletion_timestamp.is_some();

        let Some(secret) = info.bmc_creds_secret.as_ref() else {
            if deleting {
                return Ok(None);
            }
            let name = info
                .host
                .spec
                .bmc
                .as_ref()
                .map(|bmc| bmc.credentials_name.as_str())
                .unwrap_or_default();
            return Err(format!("BMC credentials secret {} not found", name));
        };

        match BmcCredentials::from_secret(secret) {
            Ok(credentials) => Ok(Some(credentials)),
            Err(e) if deleting => {
                warn!("Ignoring unusable BMC credentials of deleted host {}: {}", info.request, e);
                Ok(None)
            }
            Err(e) => Err(e.to_string()),
        }
    }

    async fn fetch_bmc_secret(&self, host: &BareMetalHost) -> Result<Option<Secret>, ControllerError> {
        let Some(bmc) = host.spec.bmc.as_ref().filter(|bmc| !bmc.credentials_name.is_empty()) else {
            return Ok(None);
        };
        let namespace = host.namespace().unwrap_or_default();
        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), &namespace);
        Ok(secrets.get_opt(&bmc.credentials_name).await?)
    }

    async fn load_host_config(&self, host: &BareMetalHost) -> Result<HostConfigData, ControllerError> {
        let namespace = host.namespace().unwrap_or_default();
        Ok(HostConfigData {
            user_data: self
                .read_secret_value(&namespace, host.spec.user_data.as_ref(), USER_DATA_KEYS)
                .await?,
            network_data: self
                .read_secret_value(&namespace, host.spec.network_data.as_ref(), NETWORK_DATA_KEYS)
                .await?,
            meta_data: self
                .read_secret_value(&namespace, host.spec.meta_data.as_ref(), META_DATA_KEYS)
                .await?,
        })
    }

    async fn read_secret_value(
        &self,
        host_namespace: &str,
        reference: Option<&SecretReference>,
        keys: &[&str],
    ) -> Result<Option<String>, ControllerError> {
        let Some(reference) = reference.filter(|r| !r.name.is_empty()) else {
            return Ok(None);
        };
        let namespace = if reference.namespace.is_empty() {
            host_namespace
        } else {
            reference.namespace.as_str()
        };
        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let secret = secrets.get(&reference.name).await?;
        Ok(secret_value(&secret, keys))
    }

    async fn add_finalizer(
        &self,
        api: &Api<BareMetalHost>,
        host: &BareMetalHost,
    ) -> Result<BareMetalHost, ControllerError> {
        let mut finalizers = host.finalizers().to_vec();
        finalizers.push(HOST_FINALIZER.to_string());
        let patch = serde_json::json!({
            "metadata": {
                "finalizers": finalizers,
                "resourceVersion": host.metadata.resource_version,
            }
        });
        Ok(api
            .patch(&host.name_any(), &PatchParams::default(), &Patch::Merge(&patch))
            .await?)
    }

    async fn remove_finalizer(&self, api: &Api<BareMetalHost>, host: &BareMetalHost) -> Result<(), ControllerError> {
        let finalizers: Vec<&String> = host.finalizers().iter().filter(|f| *f != HOST_FINALIZER).collect();
        let patch = serde_json::json!({
            "metadata": {
                "finalizers": finalizers,
            }
        });
        api.patch(&host.name_any(), &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    /// Write the status subresource.
    ///
    /// The patch carries the resourceVersion the host was read at, so a
    /// concurrent writer makes this fail with a conflict.
    async fn save_status(
        &self,
        api: &Api<BareMetalHost>,
        host: &BareMetalHost,
        stored_status: Option<&BareMetalHostStatus>,
    ) -> Result<(), ControllerError> {
        let patch = status_patch(host, stored_status)?;
        api.patch_status(&host.name_any(), &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }
}

/// Merge patch body writing the host's status over `stored_status`.
///
/// Fields set in `stored_status` but unset now are sent as `null`; a merge
/// patch leaves omitted keys untouched on the server.
fn status_patch(
    host: &BareMetalHost,
    stored_status: Option<&BareMetalHostStatus>,
) -> Result<Value, ControllerError> {
    let mut status = serde_json::to_value(&host.status)?;
    if let Some(stored) = stored_status {
        null_removed_keys(&serde_json::to_value(stored)?, &mut status);
    }
    Ok(serde_json::json!({
        "metadata": {
            "resourceVersion": host.metadata.resource_version,
        },
        "status": status,
    }))
}

fn null_removed_keys(stored: &Value, desired: &mut Value) {
    let (Value::Object(stored), Value::Object(desired)) = (stored, desired) else {
        return;
    };
    for (key, old) in stored {
        match desired.get_mut(key) {
            Some(new) => null_removed_keys(old, new),
            None => {
                desired.insert(key.clone(), Value::Null);
            }
        }
    }
}

fn has_finalizer(host: &BareMetalHost) -> bool {
    host.finalizers().iter().any(|f| f == HOST_FINALIZER)
}

/// First non-empty value among `keys`, from `data` or `stringData`
fn secret_value(secret: &Secret, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| {
        let from_data = secret
            .data
            .as_ref()
            .and_then(|data| data.get(*key))
            .and_then(|value| String::from_utf8(value.0.clone()).ok());
        let from_string_data = || {
            secret
                .string_data
                .as_ref()
                .and_then(|data| data.get(*key))
                .cloned()
        };
        from_data.or_else(from_string_data).filter(|value| !value.is_empty())
    })
}

fn requeue_action(result: &ActionResult) -> Action {
    match result.requeue_after() {
        Some(delay) => Action::requeue(delay),
        None => Action::await_change(),
    }
}
