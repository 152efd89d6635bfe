//! Static remote storage and secret fixtures for tests

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use parking_lot::Mutex;

use splunk_common::{Error, Result, S3_ACCESS_KEY, S3_SECRET_KEY};

use crate::registry::{ClientFactory, ClientParams, ProviderRegistry};
use crate::remote::{RemoteObject, RemoteStorageClient};

/// Provider id the static factory is registered under by [`static_registry`]
pub const STATIC_PROVIDER: &str = "static";

/// A listed object with fixed timestamp and storage class
pub fn remote_object(key: &str, etag: &str, size: i64) -> RemoteObject {
    RemoteObject {
        key: key.to_string(),
        etag: etag.to_string(),
        last_modified: Utc
            .with_ymd_and_hms(2021, 5, 1, 23, 23, 0)
            .single()
            .unwrap_or_default(),
        size,
        storage_class: "STANDARD".to_string(),
    }
}

/// Three app packages as a typical bucket returns them
pub fn fixture_objects() -> Vec<RemoteObject> {
    vec![
        remote_object("admin_app.tgz", "cc707187b036405f095a8ebb43a782c1", 10),
        remote_object("security_app.tgz", "5055a61b3d1b667a4c3279a381a2e7ae", 20),
        remote_object("authentication_app.tgz", "19779168370b97d8654424e6c9446dd8", 30),
    ]
}

/// Credential secret carrying whichever keys are given
///
/// With neither key the secret has no data at all.
pub fn credential_secret(
    namespace: &str,
    name: &str,
    access_key: Option<&str>,
    secret_key: Option<&str>,
) -> Secret {
    let mut data = BTreeMap::new();
    if let Some(access) = access_key {
        data.insert(S3_ACCESS_KEY.to_string(), ByteString(access.as_bytes().to_vec()));
    }
    if let Some(secret) = secret_key {
        data.insert(S3_SECRET_KEY.to_string(), ByteString(secret.as_bytes().to_vec()));
    }
    Secret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        data: (!data.is_empty()).then_some(data),
        ..Default::default()
    }
}

#[derive(Default)]
struct ClientState {
    objects: Vec<RemoteObject>,
    by_prefix: BTreeMap<String, Vec<RemoteObject>>,
    error: Option<String>,
    delay: Option<Duration>,
    listings: Vec<(String, String)>,
}

/// Remote client returning canned listings and recording requests
#[derive(Clone, Default)]
pub struct StaticClient {
    state: Arc<Mutex<ClientState>>,
}

impl StaticClient {
    /// Client returning `objects` for every prefix
    pub fn with_objects(objects: Vec<RemoteObject>) -> Self {
        let client = Self::default();
        client.state.lock().objects = objects;
        client
    }

    /// Client whose every listing fails with a transient error
    pub fn failing(message: &str) -> Self {
        let client = Self::default();
        client.state.lock().error = Some(message.to_string());
        client
    }

    /// Return `objects` for one prefix instead of the default listing
    pub fn for_prefix(self, prefix: &str, objects: Vec<RemoteObject>) -> Self {
        self.state.lock().by_prefix.insert(prefix.to_string(), objects);
        self
    }

    /// Sleep before answering
    pub fn delayed(self, delay: Duration) -> Self {
        self.state.lock().delay = Some(delay);
        self
    }

    /// Replace the default listing
    pub fn set_objects(&self, objects: Vec<RemoteObject>) {
        self.state.lock().objects = objects;
    }

    /// Make later listings fail, or succeed again with `None`
    pub fn set_error(&self, message: Option<&str>) {
        self.state.lock().error = message.map(str::to_string);
    }

    /// Every (bucket, prefix) listed so far
    pub fn listings(&self) -> Vec<(String, String)> {
        self.state.lock().listings.clone()
    }
}

#[async_trait]
impl RemoteStorageClient for StaticClient {
    async fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<RemoteObject>> {
        let delay = {
            let mut state = self.state.lock();
            state.listings.push((bucket.to_string(), prefix.to_string()));
            state.delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let state = self.state.lock();
        if let Some(message) = &state.error {
            return Err(Error::remote(STATIC_PROVIDER, message.clone()));
        }
        Ok(state
            .by_prefix
            .get(prefix)
            .unwrap_or(&state.objects)
            .clone())
    }
}

/// Factory handing out one shared [`StaticClient`]
#[derive(Clone, Default)]
pub struct StaticFactory {
    client: Option<StaticClient>,
    built: Arc<Mutex<Vec<ClientParams>>>,
}

impl StaticFactory {
    /// Factory returning `client` for any parameters
    pub fn new(client: StaticClient) -> Self {
        Self {
            client: Some(client),
            built: Arc::default(),
        }
    }

    /// Factory that never produces a client
    pub fn failing() -> Self {
        Self::default()
    }

    /// Parameters of every build request so far
    pub fn built(&self) -> Vec<ClientParams> {
        self.built.lock().clone()
    }
}

impl ClientFactory for StaticFactory {
    fn build(&self, params: &ClientParams) -> Option<Arc<dyn RemoteStorageClient>> {
        self.built.lock().push(params.clone());
        self.client
            .clone()
            .map(|c| Arc::new(c) as Arc<dyn RemoteStorageClient>)
    }
}

/// Registry with `factory` registered as the `static` provider
pub fn static_registry(factory: StaticFactory) -> ProviderRegistry {
    let mut registry = ProviderRegistry::new();
    registry.register(STATIC_PROVIDER, Arc::new(factory));
    registry
}
