//! Remote storage client contract

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
#[cfg(test)]
use mockall::automock;

use splunk_common::crd::AppEntry;
use splunk_common::Result;

/// One object listed from remote storage
///
/// Fields pass through from the provider unmodified.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteObject {
    /// Object key
    pub key: String,
    /// Entity tag as returned by the provider (quotes included)
    pub etag: String,
    /// Last modification time
    pub last_modified: DateTime<Utc>,
    /// Size in bytes
    pub size: i64,
    /// Storage class
    pub storage_class: String,
}

impl RemoteObject {
    /// Status representation of the object
    pub fn to_app_entry(&self) -> AppEntry {
        AppEntry {
            key: self.key.clone(),
            etag: self.etag.clone(),
            last_modified: self.last_modified.to_rfc3339_opts(SecondsFormat::AutoSi, true),
            size: self.size,
            storage_class: self.storage_class.clone(),
        }
    }
}

/// Lists objects from one remote storage provider
#[cfg_attr(test, automock)]
#[async_trait]
pub trait RemoteStorageClient: Send + Sync {
    /// List every object under `prefix` in `bucket`, in provider order
    ///
    /// An empty listing is success. Network and provider failures are
    /// `Error::TransientRemote`.
    async fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<RemoteObject>>;
}

/// Split a volume path and app source location into bucket and prefix
///
/// The first segment of the volume path is the bucket; the rest of the
/// path and the location form a directory prefix ending in `/`.
pub fn split_path(volume_path: &str, location: &str) -> (String, String) {
    let mut segments = volume_path
        .split('/')
        .chain(location.split('/'))
        .filter(|s| !s.is_empty());
    let bucket = segments.next().unwrap_or_default().to_string();
    let prefix = segments.collect::<Vec<_>>().join("/");
    if prefix.is_empty() {
        (bucket, prefix)
    } else {
        (bucket, format!("{}/", prefix))
    }
}
