//! SmartStore keys, versioned secrets and credential rotation

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use k8s_openapi::ByteString;
use kube::runtime::controller::Action;

use splunk_appframework::testing::credential_secret;
use splunk_common::crd::{Phase, StandaloneSpec};
use splunk_common::events::reasons;
use splunk_common::{naming, Error, ObjectStore, S3_ACCESS_KEY};
use splunk_standalone::builder::INDEXES_CONF_KEY;
use splunk_standalone::error_policy;

use super::helpers::*;

fn smartstore_harness() -> Harness {
    let mut spec = StandaloneSpec::default();
    spec.smartstore = smartstore_spec();
    Harness::new(spec)
}

async fn rewrite_secret(h: &Harness, f: impl FnOnce(&mut Secret)) {
    let mut secret: Secret = h.store().get_stored(NAMESPACE, SMARTSTORE_SECRET).unwrap();
    f(&mut secret);
    h.store().update(&secret).await.unwrap();
}

fn secret_versions(h: &Harness) -> Vec<String> {
    let prefix = naming::versioned_secret_prefix(NAME);
    let mut names: Vec<String> = h
        .store()
        .list_stored::<Secret>(NAMESPACE)
        .into_iter()
        .filter_map(|s| s.metadata.name)
        .filter(|n| n.starts_with(&prefix))
        .collect();
    names.sort();
    names
}

// =============================================================================
// Story Tests: SmartStore
// =============================================================================

/// Story: SmartStore keys land in the versioned secret and indexes.conf is rendered
#[tokio::test]
async fn story_smartstore_is_wired_into_the_workload() {
    let h = smartstore_harness();
    h.apply().await.unwrap();

    let secret: Secret = h
        .store()
        .get_stored(NAMESPACE, &naming::versioned_secret_name(NAME, 1))
        .unwrap();
    let data = secret.data.unwrap();
    assert_eq!(data["msos_s2s3_vol_s3_access_key"].0, b"AKIA".to_vec());

    let config: ConfigMap = h
        .store()
        .get_stored(NAMESPACE, &naming::smartstore_config_name(NAME))
        .unwrap();
    let indexes = &config.data.unwrap()[INDEXES_CONF_KEY];
    assert!(indexes.contains("[volume:msos_s2s3_vol]"));
    assert!(indexes.contains("[salesdata1]"));

    let rev_map = h.latest().status.unwrap().resource_rev_map;
    assert!(rev_map.contains_key(SMARTSTORE_SECRET));
}

/// Story: A credential secret without its secret key stops the pass
#[tokio::test]
async fn story_missing_secret_key_fails_before_any_workload() {
    let h = smartstore_harness();
    h.store()
        .insert(&credential_secret(NAMESPACE, SMARTSTORE_SECRET, Some("AKIA"), None))
        .unwrap();

    let err = h.apply().await.unwrap_err();
    assert!(matches!(err, Error::Credentials { .. }));
    assert!(h
        .store()
        .get_stored::<StatefulSet>(NAMESPACE, &naming::standalone_name(NAME))
        .is_none());

    let status = h.latest().status.unwrap();
    assert_eq!(status.phase, Phase::Error);
    assert!(status.message.unwrap().contains(SMARTSTORE_SECRET));
    assert!(h.events.reasons().contains(&reasons::VALIDATION_FAILED.to_string()));

    let action = error_policy(Arc::new(h.latest()), &err, Arc::new(h.ctx));
    assert_eq!(action, Action::requeue(Duration::from_secs(60)));
}

// =============================================================================
// Story Tests: Rotation
// =============================================================================

/// Story: New keys mint the next secret version and roll the workload onto it
#[tokio::test]
async fn story_rotated_keys_mint_next_version() {
    let h = smartstore_harness();
    h.apply().await.unwrap();
    h.mark_ready();
    h.apply().await.unwrap();

    rewrite_secret(&h, |s| {
        s.data
            .get_or_insert_with(BTreeMap::new)
            .insert(S3_ACCESS_KEY.to_string(), ByteString(b"AKIA-2".to_vec()));
    })
    .await;
    let rotated_rv = h
        .store()
        .get_stored::<Secret>(NAMESPACE, SMARTSTORE_SECRET)
        .unwrap()
        .metadata
        .resource_version;
    h.apply().await.unwrap();

    assert_eq!(
        mounted_secret(&h.stateful_set()),
        naming::versioned_secret_name(NAME, 2)
    );
    let status = h.latest().status.unwrap();
    assert_eq!(status.phase, Phase::Updating);
    assert_eq!(status.resource_rev_map.get(SMARTSTORE_SECRET), rotated_rv.as_ref());
    assert!(h.events.reasons().contains(&reasons::SECRET_ROTATED.to_string()));
}

/// Story: A Ready instance keeps rechecking, so keys edited out of band are picked up
#[tokio::test]
async fn story_ready_recheck_notices_rotated_keys() {
    let h = smartstore_harness();
    h.apply().await.unwrap();
    h.mark_ready();
    let recheck = h.apply().await.unwrap();
    assert_eq!(h.latest().phase(), Phase::Ready);
    assert_eq!(recheck, Some(h.ctx.config.ready_requeue));

    // The credential secret is not owned, so no watch event follows this edit
    rewrite_secret(&h, |s| {
        s.data
            .get_or_insert_with(BTreeMap::new)
            .insert(S3_ACCESS_KEY.to_string(), ByteString(b"AKIA-2".to_vec()));
    })
    .await;
    h.clock.advance(chrono::Duration::from_std(recheck.unwrap()).unwrap());
    h.apply().await.unwrap();

    assert_eq!(
        mounted_secret(&h.stateful_set()),
        naming::versioned_secret_name(NAME, 2)
    );
    assert_eq!(h.latest().phase(), Phase::Updating);
}

/// Story: A touched credential secret rolls the workload even with equal keys
#[tokio::test]
async fn story_touched_secret_forces_new_version_once() {
    let h = smartstore_harness();
    h.apply().await.unwrap();

    rewrite_secret(&h, |s| {
        s.metadata
            .labels
            .get_or_insert_with(BTreeMap::new)
            .insert("rotated-by".to_string(), "vault".to_string());
    })
    .await;
    h.apply().await.unwrap();
    h.apply().await.unwrap();

    assert_eq!(
        secret_versions(&h),
        vec![
            naming::versioned_secret_name(NAME, 1),
            naming::versioned_secret_name(NAME, 2),
        ]
    );
}

/// Story: Only the newest versioned secrets are kept
#[tokio::test]
async fn story_old_secret_versions_are_pruned() {
    let h = smartstore_harness();
    h.apply().await.unwrap();
    for round in 2..=5 {
        let key = format!("AKIA-{}", round);
        rewrite_secret(&h, |s| {
            s.data
                .get_or_insert_with(BTreeMap::new)
                .insert(S3_ACCESS_KEY.to_string(), ByteString(key.into_bytes()));
        })
        .await;
        h.apply().await.unwrap();
    }

    assert_eq!(
        secret_versions(&h),
        vec![
            naming::versioned_secret_name(NAME, 3),
            naming::versioned_secret_name(NAME, 4),
            naming::versioned_secret_name(NAME, 5),
        ]
    );
    assert_eq!(
        mounted_secret(&h.stateful_set()),
        naming::versioned_secret_name(NAME, 5)
    );
}
