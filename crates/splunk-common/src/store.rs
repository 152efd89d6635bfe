//! Object store abstraction over namespaced cluster objects
//!
//! The reconciliation engine only ever talks to the cluster through
//! [`ObjectStore`]. Production uses [`KubeStore`], which wraps `kube::Api`;
//! tests use the in-memory store from [`crate::testing`]. Both honour the
//! same optimistic-concurrency contract: updates carry the observed
//! `resourceVersion` and a stale write fails with 409.

use std::collections::BTreeMap;
use std::fmt::Debug;

use async_trait::async_trait;
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use kube::core::NamespaceResourceScope;
use kube::{Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::{Error, Result};

/// Any namespaced Kubernetes object the store can persist
pub trait StoredObject:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
}

impl<K> StoredObject for K where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static
{
}

/// Get/list/create/update/delete over cluster objects
///
/// Implementations must be safe for concurrent use across descriptors.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch an object by name; `None` if it does not exist
    async fn get<K: StoredObject>(&self, namespace: &str, name: &str) -> Result<Option<K>>;

    /// List objects in a namespace whose labels contain every selector entry
    async fn list<K: StoredObject>(
        &self,
        namespace: &str,
        selector: &BTreeMap<String, String>,
    ) -> Result<Vec<K>>;

    /// Create an object; fails with 409 if it already exists
    async fn create<K: StoredObject>(&self, obj: &K) -> Result<K>;

    /// Replace an object; fails with 409 if its resourceVersion is stale
    async fn update<K: StoredObject>(&self, obj: &K) -> Result<K>;

    /// Delete an object; an absent object counts as success
    async fn delete<K: StoredObject>(&self, namespace: &str, name: &str) -> Result<()>;

    /// Replace only the status of an object
    async fn update_status<K: StoredObject>(&self, obj: &K) -> Result<K>;
}

/// Render a label map as a Kubernetes label selector string
pub fn selector_string(selector: &BTreeMap<String, String>) -> String {
    selector
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",")
}

/// Namespace and name of an object about to be written
pub(crate) fn object_key<K: StoredObject>(obj: &K) -> Result<(String, String)> {
    let namespace = obj.namespace().ok_or_else(|| {
        Error::internal_with_context("store", format!("{} has no namespace", K::kind(&())))
    })?;
    let name = obj.meta().name.clone().ok_or_else(|| {
        Error::internal_with_context("store", format!("{} has no name", K::kind(&())))
    })?;
    Ok((namespace, name))
}

/// [`ObjectStore`] backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    /// Create a new store wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api<K: StoredObject>(&self, namespace: &str) -> Api<K> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl ObjectStore for KubeStore {
    async fn get<K: StoredObject>(&self, namespace: &str, name: &str) -> Result<Option<K>> {
        Ok(self.api::<K>(namespace).get_opt(name).await?)
    }

    async fn list<K: StoredObject>(
        &self,
        namespace: &str,
        selector: &BTreeMap<String, String>,
    ) -> Result<Vec<K>> {
        let mut params = ListParams::default();
        if !selector.is_empty() {
            params = params.labels(&selector_string(selector));
        }
        Ok(self.api::<K>(namespace).list(&params).await?.items)
    }

    async fn create<K: StoredObject>(&self, obj: &K) -> Result<K> {
        let (namespace, name) = object_key(obj)?;
        debug!(kind = %K::kind(&()), %namespace, %name, "creating object");
        Ok(self
            .api::<K>(&namespace)
            .create(&PostParams::default(), obj)
            .await?)
    }

    async fn update<K: StoredObject>(&self, obj: &K) -> Result<K> {
        let (namespace, name) = object_key(obj)?;
        debug!(kind = %K::kind(&()), %namespace, %name, "replacing object");
        Ok(self
            .api::<K>(&namespace)
            .replace(&name, &PostParams::default(), obj)
            .await?)
    }

    async fn delete<K: StoredObject>(&self, namespace: &str, name: &str) -> Result<()> {
        match self
            .api::<K>(namespace)
            .delete(name, &DeleteParams::background())
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => {
                debug!(kind = %K::kind(&()), %namespace, %name, "object already deleted");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn update_status<K: StoredObject>(&self, obj: &K) -> Result<K> {
        let (namespace, name) = object_key(obj)?;
        let body = serde_json::to_vec(obj)?;
        Ok(self
            .api::<K>(&namespace)
            .replace_subresource("status", &name, &PostParams::default(), body)
            .await?)
    }
}
