//! Descriptor validation before anything is written

use kube::ResourceExt;
use tracing::warn;

use splunk_appframework::{resolve_credentials, RemoteCredentials};
use splunk_common::crd::Standalone;
use splunk_common::{ObjectStore, Result};

/// Keys resolved for one SmartStore volume
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VolumeKeys {
    /// Volume name
    pub volume: String,
    /// Keys read from the volume's credential secret
    pub credentials: RemoteCredentials,
}

/// Structural checks plus SmartStore credential resolution
///
/// SmartStore keys end up inside the versioned secret, so an instance with
/// unreadable keys cannot start and fails here. App framework credentials are
/// resolved per source during listing instead.
pub async fn validate_standalone<S: ObjectStore>(
    store: &S,
    cr: &Standalone,
    namespace: &str,
) -> Result<Vec<VolumeKeys>> {
    let name = cr.name_any();
    cr.spec.validate(&name)?;

    let mut keys = Vec::with_capacity(cr.spec.smartstore.volumes.len());
    for volume in &cr.spec.smartstore.volumes {
        let secret = volume.effective_secret(namespace);
        let credentials = resolve_credentials(store, namespace, &secret)
            .await
            .inspect_err(|e| warn!(volume = %volume.name, error = %e, "smartstore keys unusable"))?;
        keys.push(VolumeKeys {
            volume: volume.name.clone(),
            credentials,
        });
    }
    Ok(keys)
}
