//! Pod recycling for the `OnDelete` StatefulSet
//!
//! The StatefulSet controller never replaces pods on its own under
//! `OnDelete`. Each pass deletes at most one pod still running an old
//! revision; the controller recreates it from the current template.

use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use tracing::{debug, info};

use splunk_common::{ObjectStore, Result};

use crate::status::ready_replicas;

/// Label the StatefulSet controller stamps with a pod's revision
pub const REVISION_LABEL: &str = "controller-revision-hash";

fn is_ready(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .is_some_and(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        })
}

fn ordinal(pod: &Pod) -> Option<u32> {
    pod.metadata
        .name
        .as_deref()
        .and_then(|name| name.rsplit_once('-'))
        .and_then(|(_, n)| n.parse().ok())
}

/// Revision pods should converge to, if the rollout is not finished
fn pending_revision(sts: &StatefulSet) -> Option<&str> {
    let status = sts.status.as_ref()?;
    let observed = match (sts.metadata.generation, status.observed_generation) {
        (Some(generation), Some(observed)) => observed >= generation,
        (Some(_), None) => false,
        _ => true,
    };
    if !observed {
        return None;
    }
    let update = status.update_revision.as_deref()?;
    if status.current_revision.as_deref() == Some(update) {
        return None;
    }
    Some(update)
}

/// Delete one pod that is behind the StatefulSet's update revision
///
/// Stale pods that are not ready go first. A ready stale pod is only taken
/// down once every replica is ready, highest ordinal first. Nothing happens
/// while another pod of the instance is already terminating. Returns the
/// deleted pod's name.
pub async fn recycle_stale_pod<S: ObjectStore>(
    store: &S,
    sts: &StatefulSet,
) -> Result<Option<String>> {
    let Some(update) = pending_revision(sts) else {
        return Ok(None);
    };
    let Some(namespace) = sts.namespace() else {
        return Ok(None);
    };
    let Some(selector) = sts.spec.as_ref().and_then(|s| s.selector.match_labels.clone()) else {
        return Ok(None);
    };

    let pods: Vec<Pod> = store.list(&namespace, &selector).await?;
    if pods.iter().any(|p| p.metadata.deletion_timestamp.is_some()) {
        debug!("a pod is already terminating");
        return Ok(None);
    }

    let mut stale: Vec<&Pod> = pods
        .iter()
        .filter(|p| {
            p.labels()
                .get(REVISION_LABEL)
                .is_some_and(|rev| rev != update)
        })
        .collect();
    stale.sort_by_key(|p| std::cmp::Reverse(ordinal(p)));

    let desired = sts.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
    let victim = match stale.iter().find(|p| !is_ready(p)) {
        Some(pod) => Some(*pod),
        None if ready_replicas(sts) >= desired => stale.first().copied(),
        None => None,
    };
    let Some(pod) = victim else {
        if !stale.is_empty() {
            debug!(stale = stale.len(), "waiting for replicas before recycling");
        }
        return Ok(None);
    };

    let name = pod.name_any();
    store.delete::<Pod>(&namespace, &name).await?;
    info!(pod = %name, revision = update, "deleted pod behind update revision");
    Ok(Some(name))
}
