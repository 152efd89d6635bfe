//! Supporting types shared by the Standalone CRD

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Storage settings for one of the instance's persistent volumes
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StorageConfig {
    /// Storage class for the volume claim (cluster default when unset)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class_name: Option<String>,

    /// Requested capacity (e.g. "100Gi")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_capacity: Option<String>,

    /// Use an emptyDir instead of a persistent volume claim
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub ephemeral_storage: bool,
}

impl StorageConfig {
    /// Capacity to request, falling back to the given default
    pub fn capacity_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.storage_capacity
            .as_deref()
            .filter(|c| !c.is_empty())
            .unwrap_or(default)
    }
}

/// Overrides applied to the client-facing Service
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServiceTemplate {
    /// Service type (ClusterIP, NodePort, LoadBalancer)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_type: Option<String>,

    /// Extra labels for the Service
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    /// Extra annotations for the Service
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

/// Extra environment variable passed to the Splunk container
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct EnvVarSpec {
    /// Variable name
    pub name: String,
    /// Variable value
    #[serde(default)]
    pub value: String,
}
