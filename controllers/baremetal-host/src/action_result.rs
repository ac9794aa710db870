//! Outcome of one pass of the host state machine.
//!
//! The reconciler turns an `ActionResult` into a status write (when
//! `dirty()`) and a requeue decision.

use crate::backoff::FibonacciBackoff;
use crate::provisioner::ProvisionerError;
use std::time::Duration;

/// Requeue delay for a host waiting on provisioning capacity
pub const DELAYED_REQUEUE: Duration = Duration::from_secs(30);

/// Poll interval for hosts in a steady state
pub const STEADY_STATE_REQUEUE: Duration = Duration::from_secs(60);

#[derive(Debug)]
pub enum ActionResult {
    /// Work in progress, persist and poll again after `delay`
    Continue { delay: Duration },
    /// Work in progress, nothing to persist
    ContinueNoWrite { delay: Duration },
    /// Status changed, persist and run again straight away
    Update,
    /// The current step finished
    Complete,
    /// No provisioning capacity, try again later
    Delayed,
    /// The operation failed on the host; retry with backoff
    Failed { error_count: u32 },
    /// The host is gone from the backend and may be released
    Deleted,
    /// Transient failure reaching the backend
    Error(ProvisionerError),
}

impl ActionResult {
    /// Whether the host status must be written back
    pub fn dirty(&self) -> bool {
        matches!(
            self,
            ActionResult::Continue { .. }
                | ActionResult::Update
                | ActionResult::Complete
                | ActionResult::Delayed
                | ActionResult::Failed { .. }
        )
    }

    /// When to reconcile again; `None` waits for the next change event
    pub fn requeue_after(&self) -> Option<Duration> {
        match self {
            ActionResult::Continue { delay } | ActionResult::ContinueNoWrite { delay } => Some(*delay),
            ActionResult::Update | ActionResult::Complete => Some(Duration::ZERO),
            ActionResult::Delayed => Some(DELAYED_REQUEUE),
            ActionResult::Failed { error_count } => Some(FibonacciBackoff::for_host_errors(*error_count)),
            ActionResult::Deleted | ActionResult::Error(_) => None,
        }
    }

    /// Label for the reconcile outcome metric
    pub fn outcome(&self) -> &'static str {
        match self {
            ActionResult::Continue { .. } | ActionResult::ContinueNoWrite { .. } => "continue",
            ActionResult::Update | ActionResult::Complete => "success",
            ActionResult::Delayed => "delayed",
            ActionResult::Failed { .. } => "failed",
            ActionResult::Deleted => "deleted",
            ActionResult::Error(_) => "error",
        }
    }
}
