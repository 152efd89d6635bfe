//! Deterministic object names
//!
//! Every object the operator owns is named `splunk-<name>-standalone[-<kind>]`
//! so that the engine and any multi-tier orchestrator can find them without
//! a lookup table. The admin secret is shared per namespace.

use crate::PRODUCT_PREFIX;

/// Instance type segment used in object names
pub const INSTANCE_TYPE: &str = "standalone";

/// Base name of the instance; also the StatefulSet name
pub fn standalone_name(name: &str) -> String {
    format!("{}-{}-{}", PRODUCT_PREFIX, name, INSTANCE_TYPE)
}

/// Headless Service used as the StatefulSet's governing service
pub fn headless_service_name(name: &str) -> String {
    format!("{}-headless", standalone_name(name))
}

/// Client-facing Service
pub fn service_name(name: &str) -> String {
    format!("{}-service", standalone_name(name))
}

/// Prefix shared by every versioned secret of an instance
pub fn versioned_secret_prefix(name: &str) -> String {
    format!("{}-secret-v", standalone_name(name))
}

/// Versioned secret `splunk-<name>-standalone-secret-v<N>`
pub fn versioned_secret_name(name: &str, version: u32) -> String {
    format!("{}{}", versioned_secret_prefix(name), version)
}

/// Parse the version out of a versioned secret name
pub fn parse_secret_version(name: &str, secret_name: &str) -> Option<u32> {
    secret_name
        .strip_prefix(&versioned_secret_prefix(name))
        .and_then(|v| v.parse().ok())
}

/// Namespace-scoped admin secret `splunk-<namespace>-secret`
pub fn namespace_secret_name(namespace: &str) -> String {
    format!("{}-{}-secret", PRODUCT_PREFIX, namespace)
}

/// ConfigMap carrying SmartStore `indexes.conf`
pub fn smartstore_config_name(name: &str) -> String {
    format!("{}-smartstore", standalone_name(name))
}

/// ConfigMap carrying the remote app listing
pub fn app_list_config_name(name: &str) -> String {
    format!("{}-app-list", standalone_name(name))
}

/// Name of a PVC created from a volume claim template for one pod
pub fn pvc_name(volume: &str, name: &str, ordinal: u32) -> String {
    format!("pvc-{}-{}-{}", volume, standalone_name(name), ordinal)
}
