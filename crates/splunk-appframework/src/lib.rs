//! App framework remote content engine
//!
//! Resolves per-app-source remote storage credentials, lists app packages
//! from object storage and detects credential rotation that must invalidate
//! cached state. Providers are pluggable through [`ProviderRegistry`].

#![deny(missing_docs)]

pub mod credentials;
pub mod listing;
pub mod registry;
pub mod remote;
pub mod rotation;
pub mod s3;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use credentials::{resolve_credentials, RemoteCredentials};
pub use listing::{get_apps_list, list_all_sources, AppSourceContext, SourceListing};
pub use registry::{ClientFactory, ClientParams, ProviderRegistry};
pub use remote::{split_path, RemoteObject, RemoteStorageClient};
pub use rotation::{are_remote_volume_keys_changed, observed_revisions, tracked_secrets};
