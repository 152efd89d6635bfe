//! Custom Resource Definitions for the Splunk operator
//!
//! The `Standalone` descriptor plus the app framework and SmartStore
//! configuration it embeds.

mod app_framework;
mod smartstore;
mod standalone;
mod types;

pub use app_framework::{
    AppFrameworkSpec, AppScope, AppSourceDefaultSpec, AppSourceSpec, VolumeSpec,
    DEFAULT_PROVIDER, MAX_POLL_INTERVAL_SECS, MIN_POLL_INTERVAL_SECS,
};
pub use smartstore::{IndexSpec, SmartStoreDefaults, SmartStoreSpec};
pub use standalone::{
    AppDeploymentContext, AppEntry, AppSourceState, Phase, ResourceRevisionMap, Standalone,
    StandaloneSpec, StandaloneStatus,
};
pub use types::{EnvVarSpec, ServiceTemplate, StorageConfig};
