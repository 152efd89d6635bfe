//! Create, update, scale, become Ready, delete

use std::time::Duration;

use chrono::Utc;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{ConfigMap, PersistentVolumeClaim, Pod, Secret, Service};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::api::ObjectMeta;
use serde_json::json;

use splunk_common::crd::{Phase, Standalone, StandaloneSpec};
use splunk_common::events::reasons;
use splunk_common::testing::Verb;
use splunk_common::{naming, FINALIZER_DELETE_PVC, LABEL_INSTANCE};
use splunk_standalone::builder::{selector_labels, template_hash};
use splunk_standalone::rollout::REVISION_LABEL;

use super::helpers::*;

// =============================================================================
// Story Tests: Convergence
// =============================================================================

/// Story: A new descriptor gets Services, secrets and a StatefulSet
#[tokio::test]
async fn story_new_instance_converges() {
    let h = Harness::new(StandaloneSpec::default());

    let requeue = h.apply().await.unwrap();
    assert_eq!(requeue, Some(Duration::from_secs(5)));

    let store = h.store();
    assert!(store
        .get_stored::<Service>(NAMESPACE, &naming::headless_service_name(NAME))
        .is_some());
    assert!(store
        .get_stored::<Service>(NAMESPACE, &naming::service_name(NAME))
        .is_some());
    assert!(store
        .get_stored::<Secret>(NAMESPACE, &naming::namespace_secret_name(NAMESPACE))
        .is_some());

    let sts = h.stateful_set();
    assert_eq!(mounted_secret(&sts), naming::versioned_secret_name(NAME, 1));
    assert_eq!(image(&sts), "splunk/splunk");
    // Neither SmartStore nor the app framework is configured
    assert!(store.list_stored::<ConfigMap>(NAMESPACE).is_empty());

    let status = h.latest().status.unwrap();
    assert_eq!(status.phase, Phase::Updating);
    assert_eq!(status.observed_generation, Some(1));
    assert_eq!(
        h.events.reasons().iter().filter(|r| *r == reasons::RESOURCE_CREATED).count(),
        3
    );
}

/// Story: Re-running a converged pass issues no writes at all
#[tokio::test]
async fn story_converged_pass_is_idempotent() {
    let mut spec = StandaloneSpec::default();
    spec.smartstore = smartstore_spec();
    spec.app_framework = app_framework_spec(600);
    let h = Harness::new(spec);
    h.apply().await.unwrap();
    h.mark_ready();
    h.apply().await.unwrap();

    h.store().clear_calls();
    h.apply().await.unwrap();
    assert!(h.store().mutations().is_empty(), "{:?}", h.store().mutations());
    assert_eq!(h.client.listings().len(), 1);
}

/// Story: Changing the image rewrites only the StatefulSet
#[tokio::test]
async fn story_image_change_updates_workload_only() {
    let h = Harness::new(StandaloneSpec::default());
    h.apply().await.unwrap();
    let before = h.stateful_set();

    h.edit(|cr| cr.spec.image = Some("splunk/splunk:9.1.2".to_string()))
        .await;
    h.apply().await.unwrap();

    let writes: Vec<(Verb, String)> = h
        .store()
        .mutations()
        .into_iter()
        .map(|c| (c.verb, c.kind))
        .collect();
    assert_eq!(
        writes,
        vec![
            (Verb::Update, "StatefulSet".to_string()),
            (Verb::UpdateStatus, "Standalone".to_string()),
        ]
    );
    let after = h.stateful_set();
    assert_eq!(image(&after), "splunk/splunk:9.1.2");
    assert_ne!(template_hash(&before), template_hash(&after));
    assert_eq!(h.latest().phase(), Phase::Updating);
}

/// Story: A new template reaches running pods by recycling them
#[tokio::test]
async fn story_template_change_recycles_stale_pods() {
    let h = Harness::new(StandaloneSpec::default());
    h.apply().await.unwrap();
    h.mark_ready();
    h.apply().await.unwrap();

    let mut labels = selector_labels(NAME);
    labels.insert(REVISION_LABEL.to_string(), "rev-1".to_string());
    let pod_name = format!("{}-0", naming::standalone_name(NAME));
    h.store()
        .insert(&Pod {
            metadata: ObjectMeta {
                name: Some(pod_name.clone()),
                namespace: Some(NAMESPACE.to_string()),
                labels: Some(labels),
                ..Default::default()
            },
            ..Default::default()
        })
        .unwrap();

    h.edit(|cr| cr.spec.image = Some("splunk/splunk:9.1.2".to_string()))
        .await;
    h.apply().await.unwrap();
    // Controller has not seen the new template yet
    assert_eq!(h.store().count(Verb::Delete, "Pod"), 0);

    let rolling = |current: &str| {
        let sts = h.stateful_set();
        h.store()
            .set_status::<StatefulSet>(
                NAMESPACE,
                &naming::standalone_name(NAME),
                json!({
                    "observedGeneration": sts.metadata.generation,
                    "replicas": 1,
                    "readyReplicas": 1,
                    "currentRevision": current,
                    "updateRevision": "rev-2",
                }),
            )
            .unwrap();
    };
    rolling("rev-1");
    h.apply().await.unwrap();

    assert_eq!(h.store().count(Verb::Delete, "Pod"), 1);
    assert!(h.store().get_stored::<Pod>(NAMESPACE, &pod_name).is_none());
    assert!(h.events.reasons().contains(&reasons::POD_RECYCLED.to_string()));
    assert_eq!(h.latest().phase(), Phase::Updating);

    rolling("rev-2");
    h.apply().await.unwrap();
    assert_eq!(h.store().count(Verb::Delete, "Pod"), 1);
    assert_eq!(h.latest().phase(), Phase::Ready);
}

/// Story: Scaling changes the replica count and leaves the template alone
#[tokio::test]
async fn story_scaling_keeps_template() {
    let h = Harness::new(StandaloneSpec::default());
    h.apply().await.unwrap();
    h.mark_ready();
    h.apply().await.unwrap();
    let before = h.stateful_set();

    h.edit(|cr| cr.spec.replicas = 2).await;
    h.apply().await.unwrap();

    let after = h.stateful_set();
    assert_eq!(after.spec.as_ref().and_then(|s| s.replicas), Some(2));
    assert_eq!(template_hash(&before), template_hash(&after));
    assert_eq!(h.store().count(Verb::Create, "Secret"), 0);
    assert_eq!(h.latest().status.unwrap().replicas, 2);
}

/// Story: Ready replicas flip the phase, publish once, and slow the requeue
#[tokio::test]
async fn story_ready_instance_rechecks_periodically() {
    let h = Harness::new(StandaloneSpec::default());
    h.apply().await.unwrap();
    h.mark_ready();

    let requeue = h.apply().await.unwrap();
    assert_eq!(requeue, Some(h.ctx.config.ready_requeue));
    assert_eq!(requeue, Some(Duration::from_secs(300)));
    let status = h.latest().status.unwrap();
    assert_eq!(status.phase, Phase::Ready);
    assert_eq!(status.ready_replicas, 1);

    h.apply().await.unwrap();
    let ready_events = h
        .events
        .reasons()
        .into_iter()
        .filter(|r| r == reasons::READY)
        .count();
    assert_eq!(ready_events, 1);
}

/// Story: A Ready instance with polling requeues for the next listing
#[tokio::test]
async fn story_ready_instance_requeues_for_poll() {
    let mut spec = StandaloneSpec::default();
    spec.app_framework = app_framework_spec(240);
    let h = Harness::new(spec);
    h.apply().await.unwrap();
    h.mark_ready();

    h.clock.advance(chrono::Duration::seconds(100));
    let requeue = h.apply().await.unwrap();
    assert_eq!(requeue, Some(Duration::from_secs(140)));
}

/// Story: A poll interval longer than the recheck never delays the recheck
#[tokio::test]
async fn story_long_poll_keeps_periodic_recheck() {
    let mut spec = StandaloneSpec::default();
    spec.app_framework = app_framework_spec(3600);
    let h = Harness::new(spec);
    h.apply().await.unwrap();
    h.mark_ready();

    let requeue = h.apply().await.unwrap();
    assert_eq!(requeue, Some(h.ctx.config.ready_requeue));
}

// =============================================================================
// Story Tests: Deletion
// =============================================================================

fn claim(volume: &str, instance: &str) -> PersistentVolumeClaim {
    PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(naming::pvc_name(volume, instance, 0)),
            namespace: Some(NAMESPACE.to_string()),
            labels: Some(selector_labels(instance)),
            ..Default::default()
        },
        ..Default::default()
    }
}

async fn mark_deleted(h: &Harness, finalizer: bool) {
    h.edit(|cr| {
        if finalizer {
            cr.metadata.finalizers = Some(vec![FINALIZER_DELETE_PVC.to_string()]);
        }
    })
    .await;
    // Deletion is stamped by the API server, never through an update
    let mut cr = h.latest();
    cr.metadata.deletion_timestamp = Some(Time(Utc::now()));
    h.store().insert(&cr).unwrap();
}

/// Story: The delete-pvc finalizer removes the instance's claims
#[tokio::test]
async fn story_deletion_with_finalizer_removes_claims() {
    let h = Harness::new(StandaloneSpec::default());
    h.apply().await.unwrap();
    h.store().insert(&claim("etc", NAME)).unwrap();
    h.store().insert(&claim("var", NAME)).unwrap();
    h.store().insert(&claim("var", "stack2")).unwrap();
    mark_deleted(&h, true).await;

    assert_eq!(h.apply().await.unwrap(), None);

    let left = h.store().list_stored::<PersistentVolumeClaim>(NAMESPACE);
    assert_eq!(left.len(), 1);
    assert_eq!(
        left[0].metadata.labels.as_ref().unwrap()[LABEL_INSTANCE],
        naming::standalone_name("stack2")
    );
    assert!(h.store().get_stored::<Standalone>(NAMESPACE, NAME).is_none());
    assert!(h.events.reasons().contains(&reasons::VOLUMES_DELETED.to_string()));
}

/// Story: Without the finalizer deletion only records Terminating
#[tokio::test]
async fn story_deletion_without_finalizer_is_hands_off() {
    let h = Harness::new(StandaloneSpec::default());
    h.apply().await.unwrap();
    h.store().insert(&claim("var", NAME)).unwrap();
    mark_deleted(&h, false).await;
    h.store().clear_calls();

    assert_eq!(h.apply().await.unwrap(), None);
    let writes: Vec<(Verb, String)> = h
        .store()
        .mutations()
        .into_iter()
        .map(|c| (c.verb, c.kind))
        .collect();
    assert_eq!(writes, vec![(Verb::UpdateStatus, "Standalone".to_string())]);
    assert_eq!(h.latest().phase(), Phase::Terminating);

    // Terminating is recorded once
    h.store().clear_calls();
    h.apply().await.unwrap();
    assert!(h.store().mutations().is_empty());
    assert_eq!(h.store().list_stored::<PersistentVolumeClaim>(NAMESPACE).len(), 1);
    assert!(h
        .store()
        .get_stored::<StatefulSet>(NAMESPACE, &naming::standalone_name(NAME))
        .is_some());
}
