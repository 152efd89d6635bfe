//! Credential rotation detection
//!
//! A credential secret has rotated when its resourceVersion no longer
//! matches the one recorded in the descriptor's revision map. Detection is
//! read-only; the engine commits new revisions itself once the workload has
//! picked them up.

use std::collections::BTreeSet;

use k8s_openapi::api::core::v1::Secret;
use tracing::info;

use splunk_common::crd::{ResourceRevisionMap, VolumeSpec};
use splunk_common::{CredentialError, Error, ObjectStore, Result};

/// Credential secret names referenced by a set of volumes, deduplicated
pub fn tracked_secrets(namespace: &str, volumes: &[VolumeSpec]) -> Vec<String> {
    volumes
        .iter()
        .map(|v| v.effective_secret(namespace))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

async fn secret_revision<S: ObjectStore>(
    store: &S,
    namespace: &str,
    name: &str,
) -> Result<Option<String>> {
    let secret: Secret = store
        .get(namespace, name)
        .await?
        .ok_or_else(|| Error::credentials(name, CredentialError::SecretNotFound))?;
    Ok(secret.metadata.resource_version)
}

/// True if any volume's credential secret changed since it was recorded
///
/// A secret with no entry in `rev_map` counts as changed. An absent secret
/// is a configuration error. `rev_map` is never modified.
pub async fn are_remote_volume_keys_changed<S: ObjectStore>(
    store: &S,
    namespace: &str,
    volumes: &[VolumeSpec],
    rev_map: &ResourceRevisionMap,
) -> Result<bool> {
    for name in tracked_secrets(namespace, volumes) {
        let current = secret_revision(store, namespace, &name).await?;
        let recorded = rev_map.get(&name);
        if recorded != current.as_ref() {
            info!(
                secret = %name,
                recorded = recorded.map(String::as_str).unwrap_or("<none>"),
                current = current.as_deref().unwrap_or("<none>"),
                "credential secret revision changed"
            );
            return Ok(true);
        }
    }
    Ok(false)
}

/// Current resourceVersion of every tracked credential secret
///
/// Secrets that do not exist are left out.
pub async fn observed_revisions<S: ObjectStore>(
    store: &S,
    namespace: &str,
    volumes: &[VolumeSpec],
) -> Result<ResourceRevisionMap> {
    let mut revisions = ResourceRevisionMap::new();
    for name in tracked_secrets(namespace, volumes) {
        let secret: Option<Secret> = store.get(namespace, &name).await?;
        if let Some(rv) = secret.and_then(|s| s.metadata.resource_version) {
            revisions.insert(name, rv);
        }
    }
    Ok(revisions)
}
