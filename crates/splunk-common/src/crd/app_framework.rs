//! App framework configuration: remote volumes and the app sources bound to them
//!
//! Example:
//! ```yaml
//! appRepo:
//!   appsRepoPollIntervalSeconds: 600
//!   defaults:
//!     volumeName: apps-vol
//!     scope: local
//!   volumes:
//!     - name: apps-vol
//!       storageType: s3
//!       provider: aws
//!       path: bucket/splunk-apps
//!       endpoint: https://s3-us-west-2.amazonaws.com
//!       region: us-west-2
//!       secretRef: s3-secret
//!   appSources:
//!     - name: adminApps
//!       location: adminAppsRepo
//! ```

use std::collections::BTreeSet;
use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{deterministic_hash, naming, Error};

/// Provider used when a volume does not name one
pub const DEFAULT_PROVIDER: &str = "aws";

/// Poll intervals below this are raised to it
pub const MIN_POLL_INTERVAL_SECS: i64 = 60;

/// Poll intervals above this are clamped to it
pub const MAX_POLL_INTERVAL_SECS: i64 = 86_400;

/// Remote storage volume bound by app sources or SmartStore indexes
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSpec {
    /// Unique volume name
    pub name: String,

    /// Remote storage endpoint URL
    #[serde(default)]
    pub endpoint: String,

    /// Bucket and optional prefix (`bucket/prefix`)
    #[serde(default)]
    pub path: String,

    /// Secret holding `s3_access_key` / `s3_secret_key`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_ref: Option<String>,

    /// Storage type (only `s3` is supported)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_type: Option<String>,

    /// Provider identifier looked up in the provider registry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,

    /// Region of the bucket
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
}

impl VolumeSpec {
    /// Provider identifier, defaulting to `aws`
    pub fn provider_id(&self) -> &str {
        self.provider
            .as_deref()
            .filter(|p| !p.is_empty())
            .unwrap_or(DEFAULT_PROVIDER)
    }

    /// Credential secret name; an empty reference means the namespace secret
    pub fn effective_secret(&self, namespace: &str) -> String {
        match self.secret_ref.as_deref() {
            Some(s) if !s.is_empty() => s.to_string(),
            _ => naming::namespace_secret_name(namespace),
        }
    }

    /// Region, empty when unset
    pub fn region_or_default(&self) -> &str {
        self.region.as_deref().unwrap_or_default()
    }
}

/// Deployment scope of an app source
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AppScope {
    /// Installed on the instance itself
    Local,
    /// Pushed through a cluster manager
    Cluster,
    /// Cluster scope with pre-configuration
    ClusterWithPreConfig,
    /// Premium apps (ES, ITSI)
    PremiumApps,
}

impl AppScope {
    /// Wire value of the scope
    pub fn as_str(&self) -> &'static str {
        match self {
            AppScope::Local => "local",
            AppScope::Cluster => "cluster",
            AppScope::ClusterWithPreConfig => "clusterWithPreConfig",
            AppScope::PremiumApps => "premiumApps",
        }
    }

    /// Scopes a standalone instance can install
    pub fn allowed_for_standalone(&self) -> bool {
        matches!(self, AppScope::Local | AppScope::PremiumApps)
    }
}

impl std::str::FromStr for AppScope {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" => Ok(AppScope::Local),
            "cluster" => Ok(AppScope::Cluster),
            "clusterWithPreConfig" => Ok(AppScope::ClusterWithPreConfig),
            "premiumApps" => Ok(AppScope::PremiumApps),
            other => Err(Error::validation(format!("unknown app scope '{}'", other))),
        }
    }
}

impl std::fmt::Display for AppScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Volume binding and scope shared by app sources that don't set their own
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AppSourceDefaultSpec {
    /// Default volume name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_name: Option<String>,

    /// Default scope
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

/// A named remote location holding app packages
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AppSourceSpec {
    /// Unique app source name
    pub name: String,

    /// Location relative to the volume path
    #[serde(default)]
    pub location: String,

    /// Volume binding overriding the defaults
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_name: Option<String>,

    /// Scope overriding the defaults
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

/// App framework configuration
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AppFrameworkSpec {
    /// Defaults applied to app sources
    #[serde(default)]
    pub defaults: AppSourceDefaultSpec,

    /// Remote volumes, names unique
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<VolumeSpec>,

    /// App sources, names unique
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub app_sources: Vec<AppSourceSpec>,

    /// Seconds between remote listings; 0 disables polling
    #[serde(default)]
    pub apps_repo_poll_interval_seconds: i64,
}

impl AppFrameworkSpec {
    /// True when at least one app source is declared
    pub fn is_configured(&self) -> bool {
        !self.app_sources.is_empty()
    }

    /// Normalized poll interval; `None` disables time-based refresh
    pub fn poll_interval(&self) -> Result<Option<Duration>, Error> {
        let secs = self.apps_repo_poll_interval_seconds;
        if secs < 0 {
            return Err(Error::validation(format!(
                "appsRepoPollIntervalSeconds must not be negative, got {}",
                secs
            )));
        }
        if secs == 0 {
            return Ok(None);
        }
        let clamped = secs.clamp(MIN_POLL_INTERVAL_SECS, MAX_POLL_INTERVAL_SECS);
        Ok(Some(Duration::from_secs(clamped as u64)))
    }

    /// Resolve the volume an app source lists from
    ///
    /// The source's own binding wins over the defaults. Failing to resolve is
    /// a configuration error for this source only.
    pub fn effective_volume(&self, source: &AppSourceSpec) -> Result<&VolumeSpec, Error> {
        let vol_name = source
            .volume_name
            .as_deref()
            .filter(|v| !v.is_empty())
            .or_else(|| {
                self.defaults
                    .volume_name
                    .as_deref()
                    .filter(|v| !v.is_empty())
            })
            .ok_or_else(|| {
                Error::configuration(
                    source.name.clone(),
                    "app source has no volume binding and no default volume is set",
                )
            })?;

        self.volumes
            .iter()
            .find(|v| v.name == vol_name)
            .ok_or_else(|| {
                Error::configuration(
                    source.name.clone(),
                    format!("volume '{}' is not declared", vol_name),
                )
            })
    }

    /// Resolve the scope of an app source, defaulting to `local`
    pub fn effective_scope(&self, source: &AppSourceSpec) -> Result<AppScope, Error> {
        source
            .scope
            .as_deref()
            .filter(|s| !s.is_empty())
            .or_else(|| self.defaults.scope.as_deref().filter(|s| !s.is_empty()))
            .map(str::parse)
            .unwrap_or(Ok(AppScope::Local))
    }

    /// Hash of the whole configuration, used to spot spec changes
    pub fn config_hash(&self) -> String {
        deterministic_hash(&serde_json::to_string(self).unwrap_or_default())
    }

    /// Structural checks for a standalone instance
    pub fn validate(&self, resource: &str) -> Result<(), Error> {
        self.poll_interval()
            .map_err(|e| Error::validation_for_field(resource, "spec.appRepo", e.to_string()))?;

        let mut volumes = BTreeSet::new();
        for vol in &self.volumes {
            if vol.name.is_empty() {
                return Err(Error::validation_for_field(
                    resource,
                    "spec.appRepo.volumes",
                    "volume name cannot be empty",
                ));
            }
            if !volumes.insert(vol.name.as_str()) {
                return Err(Error::validation_for_field(
                    resource,
                    "spec.appRepo.volumes",
                    format!("duplicate volume name '{}'", vol.name),
                ));
            }
            if let Some(t) = vol.storage_type.as_deref() {
                if !t.is_empty() && t != "s3" {
                    return Err(Error::validation_for_field(
                        resource,
                        "spec.appRepo.volumes",
                        format!("volume '{}' has unsupported storage type '{}'", vol.name, t),
                    ));
                }
            }
        }

        let mut sources = BTreeSet::new();
        for source in &self.app_sources {
            if source.name.is_empty() {
                return Err(Error::validation_for_field(
                    resource,
                    "spec.appRepo.appSources",
                    "app source name cannot be empty",
                ));
            }
            if !sources.insert(source.name.as_str()) {
                return Err(Error::validation_for_field(
                    resource,
                    "spec.appRepo.appSources",
                    format!("duplicate app source name '{}'", source.name),
                ));
            }
            let scope = self.effective_scope(source).map_err(|e| {
                Error::validation_for_field(resource, "spec.appRepo.appSources", e.to_string())
            })?;
            if !scope.allowed_for_standalone() {
                return Err(Error::validation_for_field(
                    resource,
                    "spec.appRepo.appSources",
                    format!(
                        "app source '{}' uses scope '{}', a standalone only supports local and premiumApps",
                        source.name, scope
                    ),
                ));
            }
        }

        Ok(())
    }
}
