//! Teardown of a descriptor that is being deleted

use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use kube::runtime::events::EventType;
use kube::{Resource, ResourceExt};
use std::collections::BTreeMap;
use tracing::{debug, info};

use splunk_common::crd::Standalone;
use splunk_common::events::{actions, reasons, EventPublisher};
use splunk_common::{naming, Error, ObjectStore, Result, FINALIZER_DELETE_PVC, LABEL_INSTANCE};

/// Release a descriptor marked for deletion
///
/// Without the delete-pvc finalizer there is nothing to do: owned objects go
/// with the descriptor through garbage collection. With it, every volume
/// claim of the instance is deleted and then the finalizer is removed.
/// Safe to re-run at any point.
pub async fn finalize<S: ObjectStore>(
    store: &S,
    events: &dyn EventPublisher,
    cr: &Standalone,
) -> Result<()> {
    let name = cr.name_any();
    let namespace = cr
        .namespace()
        .ok_or_else(|| Error::validation_for(&name, "descriptor has no namespace"))?;

    if !cr.has_delete_pvc_finalizer() {
        debug!("no delete-pvc finalizer, leaving cleanup to garbage collection");
        return Ok(());
    }

    let selector = BTreeMap::from([(
        LABEL_INSTANCE.to_string(),
        naming::standalone_name(&name),
    )]);
    let claims: Vec<PersistentVolumeClaim> = store.list(&namespace, &selector).await?;
    for claim in &claims {
        store
            .delete::<PersistentVolumeClaim>(&namespace, &claim.name_any())
            .await?;
    }
    if !claims.is_empty() {
        info!(count = claims.len(), "deleted volume claims");
        events
            .publish(
                &cr.object_ref(&()),
                EventType::Normal,
                reasons::VOLUMES_DELETED,
                actions::DELETE,
                Some(format!("Deleted {} volume claims", claims.len())),
            )
            .await;
    }

    // `cr` predates the Terminating status write
    let Some(mut latest) = store.get::<Standalone>(&namespace, &name).await? else {
        return Ok(());
    };
    if let Some(finalizers) = latest.metadata.finalizers.as_mut() {
        finalizers.retain(|f| f != FINALIZER_DELETE_PVC);
    }
    store.update(&latest).await?;
    info!("removed delete-pvc finalizer");
    Ok(())
}
