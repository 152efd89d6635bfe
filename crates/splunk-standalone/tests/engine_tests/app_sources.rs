//! App framework listing through a full reconcile pass

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use k8s_openapi::ByteString;
use serde_json::Value;

use splunk_appframework::testing::{fixture_objects, remote_object};
use splunk_common::crd::{Phase, StandaloneSpec};
use splunk_common::events::reasons;
use splunk_common::{naming, ObjectStore, S3_ACCESS_KEY};
use splunk_standalone::builder::APP_LIST_KEY;

use super::helpers::*;

fn app_list(h: &Harness) -> Value {
    let config: ConfigMap = h
        .store()
        .get_stored(NAMESPACE, &naming::app_list_config_name(NAME))
        .unwrap();
    serde_json::from_str(&config.data.unwrap()[APP_LIST_KEY]).unwrap()
}

async fn rotate_apps_secret(h: &Harness, access_key: &str) -> Option<String> {
    let mut secret: Secret = h.store().get_stored(NAMESPACE, APPS_SECRET).unwrap();
    secret.data.get_or_insert_with(BTreeMap::new).insert(
        S3_ACCESS_KEY.to_string(),
        ByteString(access_key.as_bytes().to_vec()),
    );
    h.store().update(&secret).await.unwrap().metadata.resource_version
}

fn recorded_revision(h: &Harness) -> Option<String> {
    h.latest()
        .status
        .unwrap()
        .resource_rev_map
        .get(APPS_SECRET)
        .cloned()
}

// =============================================================================
// Story Tests: App Sources
// =============================================================================

/// Story: Listed packages reach the pods through the app list ConfigMap
#[tokio::test]
async fn story_listing_is_published_to_the_workload() {
    let mut spec = StandaloneSpec::default();
    spec.app_framework = app_framework_spec(600);
    let h = Harness::new(spec);

    h.apply().await.unwrap();

    let listing = app_list(&h);
    let keys: Vec<&str> = listing["adminApps"]
        .as_array()
        .unwrap()
        .iter()
        .map(|o| o["key"].as_str().unwrap())
        .collect();
    assert_eq!(
        keys,
        vec!["admin_app.tgz", "security_app.tgz", "authentication_app.tgz"]
    );
    assert_eq!(
        h.client.listings(),
        vec![("bucket".to_string(), "splunk-apps/adminAppsRepo/".to_string())]
    );
}

/// Story: One broken source never hides another source's packages
#[tokio::test]
async fn story_sources_fail_independently() {
    let mut spec = StandaloneSpec::default();
    spec.app_framework = app_framework_spec(600);
    spec.app_framework
        .volumes
        .push(app_volume("broken", "no-such-secret"));
    spec.app_framework
        .app_sources
        .push(app_source("securityApps", "securityAppsRepo", Some("broken")));
    let h = Harness::new(spec);

    h.apply().await.unwrap();

    let status = h.latest().status.unwrap();
    assert_ne!(status.phase, Phase::Error);
    let good = &status.app_context.sources["adminApps"];
    assert_eq!(good.objects.len(), 3);
    assert!(good.error.is_none());
    let bad = &status.app_context.sources["securityApps"];
    assert!(bad.objects.is_empty());
    assert!(bad.error.as_deref().unwrap().contains("no-such-secret"));

    // The broken source was never sent to remote storage
    assert_eq!(h.client.listings().len(), 1);
    assert!(h
        .events
        .reasons()
        .contains(&reasons::APP_LISTING_FAILED.to_string()));
}

/// Story: A flaky bucket keeps serving the last good listing
#[tokio::test]
async fn story_failed_relisting_keeps_last_good_objects() {
    let mut spec = StandaloneSpec::default();
    spec.app_framework = app_framework_spec(60);
    let h = Harness::new(spec);
    h.apply().await.unwrap();

    h.client.set_error(Some("connection reset"));
    h.clock.advance(chrono::Duration::seconds(61));
    h.apply().await.unwrap();

    let state = &h.latest().status.unwrap().app_context.sources["adminApps"];
    assert_eq!(state.objects.len(), 3);
    assert!(state.error.as_deref().unwrap().contains("connection reset"));
}

/// Story: New packages show up once the poll interval elapses
#[tokio::test]
async fn story_poll_picks_up_new_packages() {
    let mut spec = StandaloneSpec::default();
    spec.app_framework = app_framework_spec(600);
    let h = Harness::new(spec);
    h.apply().await.unwrap();

    let mut objects = fixture_objects();
    objects.push(remote_object("new_app.tgz", "f00d", 40));
    h.client.set_objects(objects);

    h.clock.advance(chrono::Duration::seconds(300));
    h.apply().await.unwrap();
    assert_eq!(app_list(&h)["adminApps"].as_array().unwrap().len(), 3);

    h.clock.advance(chrono::Duration::seconds(300));
    h.apply().await.unwrap();
    assert_eq!(app_list(&h)["adminApps"].as_array().unwrap().len(), 4);
    assert_eq!(
        h.latest().status.unwrap().app_context.last_check_time.as_deref(),
        Some("2021-05-01T23:33:00Z")
    );
}

/// Story: Editing the app sources relists right away
#[tokio::test]
async fn story_config_change_relists_immediately() {
    let mut spec = StandaloneSpec::default();
    spec.app_framework = app_framework_spec(0);
    let h = Harness::new(spec);
    h.apply().await.unwrap();

    h.edit(|cr| cr.spec.app_framework.app_sources[0].location = "adminAppsV2".to_string())
        .await;
    h.apply().await.unwrap();

    let prefixes: Vec<String> = h.client.listings().into_iter().map(|(_, p)| p).collect();
    assert_eq!(
        prefixes,
        vec!["splunk-apps/adminAppsRepo/", "splunk-apps/adminAppsV2/"]
    );
}

// =============================================================================
// Story Tests: Credential Rotation
// =============================================================================

/// Story: New bucket keys trigger a relisting even with polling disabled
#[tokio::test]
async fn story_rotated_app_keys_relist() {
    let mut spec = StandaloneSpec::default();
    spec.app_framework = app_framework_spec(0);
    let h = Harness::new(spec);
    h.apply().await.unwrap();
    assert_eq!(h.client.listings().len(), 1);

    let rotated = rotate_apps_secret(&h, "AKIA-APPS-2").await;
    h.apply().await.unwrap();
    assert_eq!(h.client.listings().len(), 2);
    assert_eq!(recorded_revision(&h), rotated);

    // Committed, so the next pass leaves the bucket alone
    h.apply().await.unwrap();
    assert_eq!(h.client.listings().len(), 2);
}

/// Story: A relisting that fails after rotation is retried until it succeeds
#[tokio::test]
async fn story_failed_relisting_after_rotation_is_retried() {
    let mut spec = StandaloneSpec::default();
    spec.app_framework = app_framework_spec(0);
    let h = Harness::new(spec);
    h.apply().await.unwrap();
    let before = recorded_revision(&h);

    let rotated = rotate_apps_secret(&h, "AKIA-APPS-2").await;
    h.client.set_error(Some("403 AccessDenied"));
    h.apply().await.unwrap();
    assert_eq!(h.client.listings().len(), 2);
    assert_eq!(recorded_revision(&h), before);
    let state = &h.latest().status.unwrap().app_context.sources["adminApps"];
    assert!(state.error.as_deref().unwrap().contains("403"));

    h.client.set_error(None);
    h.apply().await.unwrap();
    assert_eq!(h.client.listings().len(), 3);
    assert_eq!(recorded_revision(&h), rotated);
    let state = &h.latest().status.unwrap().app_context.sources["adminApps"];
    assert!(state.error.is_none());
    assert_eq!(state.objects.len(), 3);

    h.apply().await.unwrap();
    assert_eq!(h.client.listings().len(), 3);
}
