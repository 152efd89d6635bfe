//! Objects the descriptor finds already in place

use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;

use splunk_common::crd::{Phase, StandaloneSpec};
use splunk_common::events::reasons;
use splunk_common::testing::Verb;
use splunk_common::{naming, Error};
use splunk_standalone::builder::{DefaultBuilder, ResourceBuilder, WorkloadInputs, DEFAULT_IMAGE};

use super::helpers::*;

fn prebuilt_stateful_set(h: &Harness) -> StatefulSet {
    let secret = naming::versioned_secret_name(NAME, 1);
    DefaultBuilder
        .stateful_set(
            &h.latest(),
            &WorkloadInputs {
                secret_name: &secret,
                default_image: DEFAULT_IMAGE,
                smartstore: false,
                app_list: false,
            },
        )
        .unwrap()
}

// =============================================================================
// Story Tests: Ownership
// =============================================================================

/// Story: A StatefulSet controlled by someone else is never touched
#[tokio::test]
async fn story_foreign_controller_is_an_invariant_violation() {
    let h = Harness::new(StandaloneSpec::default());
    let mut sts = prebuilt_stateful_set(&h);
    sts.metadata.owner_references = Some(vec![OwnerReference {
        api_version: "apps/v1".to_string(),
        kind: "Deployment".to_string(),
        name: "someone-else".to_string(),
        uid: "uid-someone-else".to_string(),
        controller: Some(true),
        ..Default::default()
    }]);
    h.store().insert(&sts).unwrap();

    let err = h.apply().await.unwrap_err();

    assert!(matches!(err, Error::FatalInvariant { .. }));
    assert_eq!(h.store().count(Verb::Update, "StatefulSet"), 0);
    let status = h.latest().status.unwrap();
    assert_eq!(status.phase, Phase::Error);
    assert!(status.message.unwrap().contains("someone-else"));
    assert!(h
        .events
        .reasons()
        .contains(&reasons::OWNERSHIP_CONFLICT.to_string()));
}

/// Story: An uncontrolled StatefulSet of the right name is adopted
#[tokio::test]
async fn story_orphan_is_adopted() {
    let h = Harness::new(StandaloneSpec::default());
    let mut sts = prebuilt_stateful_set(&h);
    sts.metadata.owner_references = None;
    h.store().insert(&sts).unwrap();

    h.apply().await.unwrap();

    let adopted = h.stateful_set();
    let owner = adopted
        .metadata
        .owner_references
        .unwrap_or_default()
        .into_iter()
        .find(|r| r.controller == Some(true))
        .unwrap();
    assert_eq!(Some(owner.uid), h.latest().metadata.uid);
    assert_eq!(h.store().count(Verb::Create, "StatefulSet"), 0);
}
