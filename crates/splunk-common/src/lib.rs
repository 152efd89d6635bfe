//! Common types for the Splunk operator: CRDs, errors, object store and utilities

#![deny(missing_docs)]

pub mod crd;
pub mod error;
pub mod events;
pub mod naming;
pub mod store;
pub mod telemetry;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use error::{CredentialError, Error};
pub use store::{KubeStore, ObjectStore, StoredObject};

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Prefix shared by every object the operator creates
pub const PRODUCT_PREFIX: &str = "splunk";

/// Field manager / reporting component name
pub const OPERATOR_NAME: &str = "splunk-operator";

/// Finalizer that requests PVC cleanup before the descriptor is released
pub const FINALIZER_DELETE_PVC: &str = "enterprise.splunk.com/delete-pvc";

/// Annotation carrying the hash of the last applied pod template
pub const TEMPLATE_HASH_ANNOTATION: &str = "enterprise.splunk.com/template-hash";

/// Standard `app.kubernetes.io/name` label key
pub const LABEL_NAME: &str = "app.kubernetes.io/name";

/// Standard `app.kubernetes.io/component` label key
pub const LABEL_COMPONENT: &str = "app.kubernetes.io/component";

/// Standard `app.kubernetes.io/instance` label key
pub const LABEL_INSTANCE: &str = "app.kubernetes.io/instance";

/// Standard `app.kubernetes.io/part-of` label key
pub const LABEL_PART_OF: &str = "app.kubernetes.io/part-of";

/// Standard `app.kubernetes.io/managed-by` label key
pub const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";

/// Component label value for versioned secrets
pub const COMPONENT_VERSIONED_SECRETS: &str = "versionedSecrets";

/// Secret key holding the remote storage access key
pub const S3_ACCESS_KEY: &str = "s3_access_key";

/// Secret key holding the remote storage secret key
pub const S3_SECRET_KEY: &str = "s3_secret_key";

/// Requeue interval after a converged pass with nothing to poll
pub const REQUEUE_SUCCESS_SECS: u64 = 300;

/// Requeue interval while the workload is still converging
pub const REQUEUE_NOT_READY_SECS: u64 = 5;

/// Requeue interval for retryable errors
pub const REQUEUE_ERROR_SECS: u64 = 30;

/// Requeue interval for configuration errors awaiting external correction
pub const REQUEUE_CONFIG_ERROR_SECS: u64 = 60;

/// Compute a deterministic hash of the input string, returning a 16-char hex digest.
///
/// Truncated SHA-256, stable across toolchains, so it is safe to persist in
/// annotations and status.
pub fn deterministic_hash(input: &str) -> String {
    use aws_lc_rs::digest;
    let hash = digest::digest(&digest::SHA256, input.as_bytes());
    hash.as_ref()[..8]
        .iter()
        .fold(String::with_capacity(16), |mut s, b| {
            use std::fmt::Write;
            let _ = write!(s, "{:02x}", b);
            s
        })
}
