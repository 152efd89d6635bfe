//! Namespace admin secret and per-instance versioned secrets
//!
//! The admin secret is generated once per namespace and never rewritten.
//! Pods mount a versioned copy of it (plus SmartStore keys and a rendered
//! `default.yml`); any change to that content mints the next version so
//! the pod template changes and running pods are never edited in place.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use kube::ResourceExt;
use serde_json::json;
use tracing::{debug, info};

use splunk_common::crd::Standalone;
use splunk_common::{naming, Error, ObjectStore, Result};

use crate::builder::{versioned_secret_labels, ResourceBuilder};
use crate::converge::check_ownership;
use crate::validate::VolumeKeys;

/// Key of the rendered defaults file inside a versioned secret
pub const DEFAULT_YML_KEY: &str = "default.yml";

/// The versioned secret mounted by the workload
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SecretVersion {
    /// Secret name
    pub name: String,
    /// Version number
    pub version: u32,
    /// True if this pass created it
    pub minted: bool,
}

/// Fetch the namespace admin secret, generating it on first use
pub async fn ensure_admin_secret<S: ObjectStore>(
    store: &S,
    builder: &dyn ResourceBuilder,
    namespace: &str,
) -> Result<Secret> {
    let name = naming::namespace_secret_name(namespace);
    if let Some(existing) = store.get::<Secret>(namespace, &name).await? {
        return Ok(existing);
    }
    match store.create(&builder.admin_secret(namespace)).await {
        Ok(created) => {
            info!(secret = %name, "generated namespace admin secret");
            Ok(created)
        }
        // Another instance in the namespace won the race
        Err(e) if e.is_conflict() => store
            .get::<Secret>(namespace, &name)
            .await?
            .ok_or_else(|| Error::internal_with_context("secrets", format!("{} vanished", name))),
        Err(e) => Err(e),
    }
}

fn value(data: &BTreeMap<String, ByteString>, key: &str) -> String {
    data.get(key)
        .map(|v| String::from_utf8_lossy(&v.0).into_owned())
        .unwrap_or_default()
}

/// Render the `default.yml` the container image reads its credentials from
pub fn render_default_yml(admin: &Secret) -> Result<String> {
    let data = admin.data.clone().unwrap_or_default();
    let doc = json!({
        "splunk": {
            "hec_token": value(&data, "hec_token"),
            "password": value(&data, "password"),
            "pass4SymmKey": value(&data, "pass4SymmKey"),
            "idxc": { "secret": value(&data, "idxc_secret") },
            "shc": { "secret": value(&data, "shc_secret") },
        }
    });
    serde_yaml::to_string(&doc).map_err(|e| Error::serialization_for_kind("Secret", e.to_string()))
}

/// Content every pod of the instance should see
///
/// Admin credentials, the rendered defaults file, and one key pair per
/// SmartStore volume as `<volume>_s3_access_key` / `<volume>_s3_secret_key`.
pub fn desired_secret_data(
    admin: &Secret,
    volume_keys: &[VolumeKeys],
) -> Result<BTreeMap<String, ByteString>> {
    let mut data = admin.data.clone().unwrap_or_default();
    data.insert(
        DEFAULT_YML_KEY.to_string(),
        ByteString(render_default_yml(admin)?.into_bytes()),
    );
    for keys in volume_keys {
        data.insert(
            format!("{}_s3_access_key", keys.volume),
            ByteString(keys.credentials.access_key.clone().into_bytes()),
        );
        data.insert(
            format!("{}_s3_secret_key", keys.volume),
            ByteString(keys.credentials.secret_key.clone().into_bytes()),
        );
    }
    Ok(data)
}

/// Versioned secrets of an instance, oldest first
async fn list_versions<S: ObjectStore>(
    store: &S,
    cr: &Standalone,
    namespace: &str,
) -> Result<Vec<(u32, Secret)>> {
    let name = cr.name_any();
    let secrets: Vec<Secret> = store
        .list(namespace, &versioned_secret_labels(&name))
        .await?;
    let mut versions: Vec<(u32, Secret)> = secrets
        .into_iter()
        .filter_map(|s| naming::parse_secret_version(&name, &s.name_any()).map(|v| (v, s)))
        .collect();
    versions.sort_by_key(|(v, _)| *v);
    Ok(versions)
}

/// Reuse the latest versioned secret if it carries `data`, else mint the next
///
/// `rotated` forces a new version even when the content matches, so a
/// credential change always reaches the pods through a template change.
pub async fn ensure_versioned_secret<S: ObjectStore>(
    store: &S,
    builder: &dyn ResourceBuilder,
    cr: &Standalone,
    namespace: &str,
    data: BTreeMap<String, ByteString>,
    rotated: bool,
) -> Result<SecretVersion> {
    let versions = list_versions(store, cr, namespace).await?;
    let next = match versions.last() {
        Some((version, latest)) => {
            check_ownership(&latest.metadata, "Secret", cr)?;
            if !rotated && latest.data.as_ref() == Some(&data) {
                debug!(secret = %latest.name_any(), "versioned secret current");
                return Ok(SecretVersion {
                    name: latest.name_any(),
                    version: *version,
                    minted: false,
                });
            }
            info!(secret = %latest.name_any(), rotated, "versioned secret out of date");
            version + 1
        }
        None => 1,
    };

    let secret = store
        .create(&builder.versioned_secret(cr, next, data))
        .await?;
    info!(secret = %secret.name_any(), version = next, "minted versioned secret");
    Ok(SecretVersion {
        name: secret.name_any(),
        version: next,
        minted: true,
    })
}

/// Delete all but the `retain` newest versioned secrets
pub async fn prune_versioned_secrets<S: ObjectStore>(
    store: &S,
    cr: &Standalone,
    namespace: &str,
    retain: usize,
) -> Result<Vec<String>> {
    let versions = list_versions(store, cr, namespace).await?;
    let excess = versions.len().saturating_sub(retain.max(1));
    let mut pruned = Vec::with_capacity(excess);
    for (_, secret) in versions.into_iter().take(excess) {
        let name = secret.name_any();
        store.delete::<Secret>(namespace, &name).await?;
        debug!(secret = %name, "pruned versioned secret");
        pruned.push(name);
    }
    Ok(pruned)
}
