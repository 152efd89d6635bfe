//! SmartStore configuration: remote volumes backing indexes

use std::collections::BTreeSet;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::app_framework::VolumeSpec;
use crate::Error;

/// Defaults applied to SmartStore indexes
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SmartStoreDefaults {
    /// Volume used by indexes that don't name one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_name: Option<String>,
}

/// An index whose buckets live on a remote volume
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IndexSpec {
    /// Index name
    pub name: String,

    /// Path under the volume; defaults to the index name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_path: Option<String>,

    /// Volume holding the index
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_name: Option<String>,
}

impl IndexSpec {
    /// Remote path, defaulting to the index name
    pub fn effective_remote_path(&self) -> &str {
        self.remote_path
            .as_deref()
            .filter(|p| !p.is_empty())
            .unwrap_or(&self.name)
    }
}

/// SmartStore configuration
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SmartStoreSpec {
    /// Defaults for indexes
    #[serde(default)]
    pub defaults: SmartStoreDefaults,

    /// Remote volumes, names unique
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<VolumeSpec>,

    /// Indexes stored remotely
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub indexes: Vec<IndexSpec>,
}

impl SmartStoreSpec {
    /// True when any volume or index is declared
    pub fn is_configured(&self) -> bool {
        !self.volumes.is_empty() || !self.indexes.is_empty()
    }

    /// Volume an index is stored on, if resolvable
    pub fn volume_for(&self, index: &IndexSpec) -> Option<&VolumeSpec> {
        let name = index
            .volume_name
            .as_deref()
            .filter(|v| !v.is_empty())
            .or(self.defaults.volume_name.as_deref())?;
        self.volumes.iter().find(|v| v.name == name)
    }

    /// Structural checks: unique names and resolvable index volumes
    pub fn validate(&self, resource: &str) -> Result<(), Error> {
        let mut volumes = BTreeSet::new();
        for vol in &self.volumes {
            if vol.name.is_empty() {
                return Err(Error::validation_for_field(
                    resource,
                    "spec.smartstore.volumes",
                    "volume name cannot be empty",
                ));
            }
            if !volumes.insert(vol.name.as_str()) {
                return Err(Error::validation_for_field(
                    resource,
                    "spec.smartstore.volumes",
                    format!("duplicate volume name '{}'", vol.name),
                ));
            }
            if vol.path.is_empty() {
                return Err(Error::validation_for_field(
                    resource,
                    "spec.smartstore.volumes",
                    format!("volume '{}' has no remote path", vol.name),
                ));
            }
        }

        let mut indexes = BTreeSet::new();
        for index in &self.indexes {
            if index.name.is_empty() {
                return Err(Error::validation_for_field(
                    resource,
                    "spec.smartstore.indexes",
                    "index name cannot be empty",
                ));
            }
            if !indexes.insert(index.name.as_str()) {
                return Err(Error::validation_for_field(
                    resource,
                    "spec.smartstore.indexes",
                    format!("duplicate index name '{}'", index.name),
                ));
            }
            if self.volume_for(index).is_none() {
                return Err(Error::validation_for_field(
                    resource,
                    "spec.smartstore.indexes",
                    format!("index '{}' does not resolve to a declared volume", index.name),
                ));
            }
        }

        Ok(())
    }
}
