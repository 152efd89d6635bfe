//! Shared fixtures for engine scenarios

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use k8s_openapi::api::apps::v1::StatefulSet;
use serde_json::json;

use splunk_appframework::testing::{
    credential_secret, fixture_objects, static_registry, StaticClient, StaticFactory,
    STATIC_PROVIDER,
};
use splunk_common::crd::{
    AppFrameworkSpec, AppSourceDefaultSpec, AppSourceSpec, IndexSpec, SmartStoreSpec, Standalone,
    StandaloneSpec, VolumeSpec,
};
use splunk_common::testing::{MemoryStore, RecordingEventPublisher};
use splunk_common::{naming, ObjectStore, Result};
use splunk_standalone::{apply, Context, ManualClock};

pub const NAMESPACE: &str = "test";
pub const NAME: &str = "stack1";
pub const SMARTSTORE_SECRET: &str = "smartstore-keys";
pub const APPS_SECRET: &str = "s3-secret";

pub fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2021, 5, 1, 23, 23, 0).unwrap()
}

pub fn smartstore_spec() -> SmartStoreSpec {
    SmartStoreSpec {
        volumes: vec![VolumeSpec {
            name: "msos_s2s3_vol".to_string(),
            endpoint: "https://s3-eu-west-2.amazonaws.com".to_string(),
            path: "testbucket-rs-london".to_string(),
            secret_ref: Some(SMARTSTORE_SECRET.to_string()),
            ..Default::default()
        }],
        indexes: vec![IndexSpec {
            name: "salesdata1".to_string(),
            remote_path: Some("remotepath1".to_string()),
            volume_name: Some("msos_s2s3_vol".to_string()),
        }],
        ..Default::default()
    }
}

pub fn app_volume(name: &str, secret: &str) -> VolumeSpec {
    VolumeSpec {
        name: name.to_string(),
        endpoint: "https://s3-us-west-2.amazonaws.com".to_string(),
        path: "bucket/splunk-apps".to_string(),
        provider: Some(STATIC_PROVIDER.to_string()),
        secret_ref: Some(secret.to_string()),
        ..Default::default()
    }
}

pub fn app_source(name: &str, location: &str, volume: Option<&str>) -> AppSourceSpec {
    AppSourceSpec {
        name: name.to_string(),
        location: location.to_string(),
        volume_name: volume.map(str::to_string),
        ..Default::default()
    }
}

pub fn app_framework_spec(poll_secs: i64) -> AppFrameworkSpec {
    AppFrameworkSpec {
        defaults: AppSourceDefaultSpec {
            volume_name: Some("apps".to_string()),
            scope: Some("local".to_string()),
        },
        volumes: vec![app_volume("apps", APPS_SECRET)],
        app_sources: vec![app_source("adminApps", "adminAppsRepo", None)],
        apps_repo_poll_interval_seconds: poll_secs,
    }
}

/// Engine wired to an in-memory cluster and a static bucket
pub struct Harness {
    pub ctx: Context<MemoryStore>,
    pub events: RecordingEventPublisher,
    pub clock: ManualClock,
    pub client: StaticClient,
}

impl Harness {
    /// Seed `spec` as `test/stack1` along with both credential secrets
    pub fn new(spec: StandaloneSpec) -> Self {
        Self::with_client(spec, StaticClient::with_objects(fixture_objects()))
    }

    pub fn with_client(spec: StandaloneSpec, client: StaticClient) -> Self {
        let store = MemoryStore::new();
        let mut cr = Standalone::new(NAME, spec);
        cr.metadata.namespace = Some(NAMESPACE.to_string());
        store.insert(&cr).unwrap();
        store
            .insert(&credential_secret(NAMESPACE, SMARTSTORE_SECRET, Some("AKIA"), Some("shh")))
            .unwrap();
        store
            .insert(&credential_secret(NAMESPACE, APPS_SECRET, Some("AKIA-APPS"), Some("shh")))
            .unwrap();

        let events = RecordingEventPublisher::new();
        let clock = ManualClock::new(start());
        let ctx = Context::builder(store)
            .registry(Arc::new(static_registry(StaticFactory::new(client.clone()))))
            .events(Arc::new(events.clone()))
            .clock(Arc::new(clock.clone()))
            .build();
        Self {
            ctx,
            events,
            clock,
            client,
        }
    }

    pub fn store(&self) -> &MemoryStore {
        &self.ctx.store
    }

    /// The descriptor as currently stored
    pub fn latest(&self) -> Standalone {
        self.store().get_stored(NAMESPACE, NAME).unwrap()
    }

    /// One reconcile pass over the stored descriptor
    pub async fn apply(&self) -> Result<Option<Duration>> {
        apply(&self.latest(), &self.ctx).await
    }

    /// Edit the stored descriptor and forget the calls that took
    pub async fn edit(&self, f: impl FnOnce(&mut Standalone)) {
        let mut cr = self.latest();
        f(&mut cr);
        self.store().update(&cr).await.unwrap();
        self.store().clear_calls();
    }

    pub fn stateful_set(&self) -> StatefulSet {
        self.store()
            .get_stored(NAMESPACE, &naming::standalone_name(NAME))
            .unwrap()
    }

    /// Report every replica ready on the current StatefulSet generation
    pub fn mark_ready(&self) {
        let sts = self.stateful_set();
        let replicas = sts.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
        self.store()
            .set_status::<StatefulSet>(
                NAMESPACE,
                &naming::standalone_name(NAME),
                json!({
                    "observedGeneration": sts.metadata.generation,
                    "replicas": replicas,
                    "readyReplicas": replicas,
                    "currentRevision": "rev-1",
                    "updateRevision": "rev-1",
                }),
            )
            .unwrap();
    }
}

/// Name of the secret mounted by the workload
pub fn mounted_secret(sts: &StatefulSet) -> String {
    sts.spec
        .as_ref()
        .and_then(|s| s.template.spec.as_ref())
        .and_then(|p| p.volumes.as_ref())
        .and_then(|vols| vols.iter().find_map(|v| v.secret.as_ref()))
        .and_then(|s| s.secret_name.clone())
        .unwrap_or_default()
}

pub fn image(sts: &StatefulSet) -> String {
    sts.spec
        .as_ref()
        .and_then(|s| s.template.spec.as_ref())
        .and_then(|p| p.containers.first())
        .and_then(|c| c.image.clone())
        .unwrap_or_default()
}
