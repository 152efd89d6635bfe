//! Phase derivation and status assembly

use k8s_openapi::api::apps::v1::StatefulSet;

use splunk_common::crd::{AppDeploymentContext, Phase, ResourceRevisionMap, StandaloneStatus};
use splunk_common::Error;

/// What a pass observed, as far as the phase is concerned
#[derive(Clone, Copy, Debug)]
pub struct PhaseInputs<'a> {
    /// Phase recorded before this pass
    pub previous: Phase,
    /// The descriptor carries a deletion timestamp
    pub deleting: bool,
    /// Failure that ended the pass early
    pub failure: Option<&'a Error>,
    /// StatefulSet as stored after convergence
    pub stateful_set: Option<&'a StatefulSet>,
    /// True if this pass replaced the pod template
    pub template_updated: bool,
    /// Replicas requested by the descriptor
    pub desired_replicas: i32,
}

/// Ready replicas reported by a StatefulSet
pub fn ready_replicas(sts: &StatefulSet) -> i32 {
    sts.status
        .as_ref()
        .and_then(|s| s.ready_replicas)
        .unwrap_or(0)
}

fn rolling_out(sts: &StatefulSet) -> bool {
    let Some(status) = sts.status.as_ref() else {
        return sts.metadata.generation.is_some();
    };
    let generation_seen = match (sts.metadata.generation, status.observed_generation) {
        (Some(generation), Some(observed)) => observed >= generation,
        (Some(_), None) => false,
        _ => true,
    };
    let revision_settled = match (&status.current_revision, &status.update_revision) {
        (Some(current), Some(update)) => current == update,
        _ => true,
    };
    !generation_seen || !revision_settled
}

/// Phase for the observed state
///
/// Transient failures keep the previous phase; only validation, configuration
/// and invariant failures move the descriptor to Error.
pub fn derive_phase(inputs: &PhaseInputs<'_>) -> Phase {
    if inputs.deleting {
        return Phase::Terminating;
    }
    if let Some(error) = inputs.failure {
        return if error.is_phase_error() {
            Phase::Error
        } else {
            inputs.previous
        };
    }
    let Some(sts) = inputs.stateful_set else {
        return Phase::Pending;
    };
    if inputs.template_updated || rolling_out(sts) {
        return Phase::Updating;
    }
    let ready = ready_replicas(sts);
    match inputs.desired_replicas.cmp(&ready) {
        std::cmp::Ordering::Greater => Phase::ScalingUp,
        std::cmp::Ordering::Less => Phase::ScalingDown,
        std::cmp::Ordering::Equal => Phase::Ready,
    }
}

/// Everything a pass contributes to the status
#[derive(Clone, Debug, Default)]
pub struct Observed {
    /// The descriptor is being deleted
    pub deleting: bool,
    /// StatefulSet after convergence
    pub stateful_set: Option<StatefulSet>,
    /// True if the pod template was replaced
    pub template_updated: bool,
    /// Revisions to commit; only set once the workload converged
    pub revisions: Option<ResourceRevisionMap>,
    /// App framework state after this pass
    pub app_context: Option<AppDeploymentContext>,
}

/// Assemble the status a pass should leave behind
pub fn compute_status(
    previous: &StandaloneStatus,
    generation: Option<i64>,
    desired_replicas: i32,
    selector: String,
    observed: &Observed,
    failure: Option<&Error>,
) -> StandaloneStatus {
    let phase = derive_phase(&PhaseInputs {
        previous: previous.phase,
        deleting: observed.deleting,
        failure,
        stateful_set: observed.stateful_set.as_ref(),
        template_updated: observed.template_updated,
        desired_replicas,
    });
    let transient = failure.is_some_and(|e| !e.is_phase_error());

    StandaloneStatus {
        phase,
        replicas: desired_replicas,
        ready_replicas: observed
            .stateful_set
            .as_ref()
            .map(ready_replicas)
            .unwrap_or(previous.ready_replicas),
        selector,
        resource_rev_map: observed
            .revisions
            .clone()
            .unwrap_or_else(|| previous.resource_rev_map.clone()),
        app_context: observed
            .app_context
            .clone()
            .unwrap_or_else(|| previous.app_context.clone()),
        observed_generation: if transient {
            previous.observed_generation
        } else {
            generation
        },
        message: match failure {
            Some(e) if e.is_phase_error() => Some(e.to_string()),
            Some(_) => previous.message.clone(),
            None => None,
        },
    }
}
