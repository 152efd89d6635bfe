//! Standalone CRD: a single Splunk Enterprise instance
//!
//! Example:
//! ```yaml
//! apiVersion: enterprise.splunk.com/v4
//! kind: Standalone
//! metadata:
//!   name: stack1
//!   namespace: test
//!   finalizers:
//!     - enterprise.splunk.com/delete-pvc
//! spec:
//!   replicas: 1
//!   image: splunk/splunk:9.1.2
//!   smartstore:
//!     volumes:
//!       - name: msos_s2s3_vol
//!         endpoint: https://s3-eu-west-2.amazonaws.com
//!         path: testbucket-rs-london
//!         secretRef: splunk-test-secret
//!     indexes:
//!       - name: salesdata1
//!         remotePath: remotepath1
//!         volumeName: msos_s2s3_vol
//! ```

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ResourceRequirements;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::app_framework::AppFrameworkSpec;
use super::smartstore::SmartStoreSpec;
use super::types::{EnvVarSpec, ServiceTemplate, StorageConfig};
use crate::{Error, FINALIZER_DELETE_PVC};

/// Last observed resourceVersion per tracked secret name
pub type ResourceRevisionMap = BTreeMap<String, String>;

/// Desired state of a standalone Splunk instance
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "enterprise.splunk.com",
    version = "v4",
    kind = "Standalone",
    namespaced,
    status = "StandaloneStatus",
    shortname = "stdaln",
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Desired","type":"integer","jsonPath":".status.replicas"}"#,
    printcolumn = r#"{"name":"Ready","type":"integer","jsonPath":".status.readyReplicas"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#,
    scale = r#"{"specReplicasPath":".spec.replicas","statusReplicasPath":".status.replicas","labelSelectorPath":".status.selector"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct StandaloneSpec {
    /// Number of instances
    #[serde(default = "default_replicas")]
    pub replicas: i32,

    /// Container image; the operator default is used when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    /// Image pull policy (Always or IfNotPresent)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_pull_policy: Option<String>,

    /// Storage for /opt/splunk/etc
    #[serde(default)]
    pub etc_volume_storage_config: StorageConfig,

    /// Storage for /opt/splunk/var
    #[serde(default)]
    pub var_volume_storage_config: StorageConfig,

    /// App framework configuration
    #[serde(default, rename = "appRepo")]
    pub app_framework: AppFrameworkSpec,

    /// SmartStore configuration
    #[serde(default)]
    pub smartstore: SmartStoreSpec,

    /// Overrides for the client Service
    #[serde(default)]
    pub service_template: ServiceTemplate,

    /// Extra environment variables for the Splunk container
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra_env: Vec<EnvVarSpec>,

    /// Service account for the pods
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account: Option<String>,

    /// Scheduler for the pods
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduler_name: Option<String>,

    /// Extra defaults file location
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub defaults_url: Option<String>,

    /// Defaults file location for apps
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub defaults_url_apps: Option<String>,

    /// Compute resources for the Splunk container
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceRequirements>,
}

fn default_replicas() -> i32 {
    1
}

impl Default for StandaloneSpec {
    fn default() -> Self {
        Self {
            replicas: default_replicas(),
            image: None,
            image_pull_policy: None,
            etc_volume_storage_config: StorageConfig::default(),
            var_volume_storage_config: StorageConfig::default(),
            app_framework: AppFrameworkSpec::default(),
            smartstore: SmartStoreSpec::default(),
            service_template: ServiceTemplate::default(),
            extra_env: Vec::new(),
            service_account: None,
            scheduler_name: None,
            defaults_url: None,
            defaults_url_apps: None,
            resources: None,
        }
    }
}

impl StandaloneSpec {
    /// Structural validation; no cluster lookups
    pub fn validate(&self, resource: &str) -> Result<(), Error> {
        if self.replicas < 0 {
            return Err(Error::validation_for_field(
                resource,
                "spec.replicas",
                format!("replicas must not be negative, got {}", self.replicas),
            ));
        }
        if let Some(policy) = self.image_pull_policy.as_deref() {
            if !matches!(policy, "" | "Always" | "IfNotPresent" | "Never") {
                return Err(Error::validation_for_field(
                    resource,
                    "spec.imagePullPolicy",
                    format!("unsupported image pull policy '{}'", policy),
                ));
            }
        }
        if let Some(svc_type) = self.service_template.service_type.as_deref() {
            if !matches!(svc_type, "" | "ClusterIP" | "NodePort" | "LoadBalancer") {
                return Err(Error::validation_for_field(
                    resource,
                    "spec.serviceTemplate.serviceType",
                    format!("unsupported service type '{}'", svc_type),
                ));
            }
        }
        self.app_framework.validate(resource)?;
        self.smartstore.validate(resource)?;
        Ok(())
    }
}

/// Lifecycle phase, derived on every reconcile pass
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum Phase {
    /// Observed but nothing converged yet
    #[default]
    Pending,
    /// Pod template or revision is rolling out
    Updating,
    /// Fewer ready replicas than desired
    ScalingUp,
    /// More ready replicas than desired
    ScalingDown,
    /// Converged
    Ready,
    /// Validation, configuration or invariant failure
    Error,
    /// Deletion observed; terminal
    Terminating,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::Updating => write!(f, "Updating"),
            Self::ScalingUp => write!(f, "ScalingUp"),
            Self::ScalingDown => write!(f, "ScalingDown"),
            Self::Ready => write!(f, "Ready"),
            Self::Error => write!(f, "Error"),
            Self::Terminating => write!(f, "Terminating"),
        }
    }
}

/// One app package observed in remote storage
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AppEntry {
    /// Object key
    pub key: String,
    /// Entity tag
    pub etag: String,
    /// Last modification time (RFC 3339)
    pub last_modified: String,
    /// Size in bytes
    pub size: i64,
    /// Storage class
    #[serde(default)]
    pub storage_class: String,
}

/// Listing state of one app source
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AppSourceState {
    /// Packages seen in the last successful listing
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub objects: Vec<AppEntry>,

    /// Error of the last listing attempt, if it failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// App framework bookkeeping
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AppDeploymentContext {
    /// When remote storage was last listed (RFC 3339)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_check_time: Option<String>,

    /// Hash of the app framework spec used for the last listing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_hash: Option<String>,

    /// Per app source listing state
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub sources: BTreeMap<String, AppSourceState>,
}

/// Observed state of a standalone instance
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StandaloneStatus {
    /// Current phase
    #[serde(default)]
    pub phase: Phase,

    /// Desired replicas
    #[serde(default)]
    pub replicas: i32,

    /// Ready replicas
    #[serde(default)]
    pub ready_replicas: i32,

    /// Label selector for the scale subresource
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub selector: String,

    /// Last observed resourceVersion per tracked secret
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub resource_rev_map: ResourceRevisionMap,

    /// App framework bookkeeping
    #[serde(default)]
    pub app_context: AppDeploymentContext,

    /// Generation of the spec that was last processed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Human-readable message about the current state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Standalone {
    /// True if the descriptor is being deleted
    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    /// True if the delete-pvc finalizer is present
    pub fn has_delete_pvc_finalizer(&self) -> bool {
        self.metadata
            .finalizers
            .as_ref()
            .is_some_and(|f| f.iter().any(|x| x == FINALIZER_DELETE_PVC))
    }

    /// Current phase, Pending when no status has been written
    pub fn phase(&self) -> Phase {
        self.status.as_ref().map(|s| s.phase).unwrap_or_default()
    }

    /// Stored revision map, empty when no status has been written
    pub fn revision_map(&self) -> ResourceRevisionMap {
        self.status
            .as_ref()
            .map(|s| s.resource_rev_map.clone())
            .unwrap_or_default()
    }
}
