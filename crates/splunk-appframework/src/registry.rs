//! Provider registry: provider id to client factory
//!
//! Built once at startup and shared by `Arc`. Tests register their own
//! factories on a fresh registry.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

#[cfg(test)]
use mockall::automock;

use splunk_common::{Error, Result};

use crate::remote::RemoteStorageClient;
use crate::s3::S3ClientFactory;

/// Everything a factory needs to build a client for one volume
#[derive(Clone, PartialEq, Eq)]
pub struct ClientParams {
    /// Provider identifier
    pub provider: String,
    /// Bucket region, empty when unknown
    pub region: String,
    /// Endpoint URL
    pub endpoint: String,
    /// Access key
    pub access_key: String,
    /// Secret key
    pub secret_key: String,
}

impl fmt::Debug for ClientParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientParams")
            .field("provider", &self.provider)
            .field("region", &self.region)
            .field("endpoint", &self.endpoint)
            .field("access_key", &"<redacted>")
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

/// Builds remote storage clients for one provider
#[cfg_attr(test, automock)]
pub trait ClientFactory: Send + Sync {
    /// Build a client, or `None` if the parameters cannot produce one
    fn build(&self, params: &ClientParams) -> Option<Arc<dyn RemoteStorageClient>>;
}

/// Maps provider identifiers to client factories
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    factories: BTreeMap<String, Arc<dyn ClientFactory>>,
}

impl ProviderRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in `aws` and `minio` providers
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("aws", Arc::new(S3ClientFactory::aws()));
        registry.register("minio", Arc::new(S3ClientFactory::minio()));
        registry
    }

    /// Register or replace the factory for a provider
    pub fn register(&mut self, provider: impl Into<String>, factory: Arc<dyn ClientFactory>) {
        self.factories.insert(provider.into(), factory);
    }

    /// Look up the factory for a provider
    pub fn resolve(&self, provider: &str) -> Result<Arc<dyn ClientFactory>> {
        self.factories.get(provider).cloned().ok_or_else(|| {
            Error::configuration(
                provider,
                format!(
                    "unknown remote storage provider '{}', known providers: {}",
                    provider,
                    self.providers().join(", ")
                ),
            )
        })
    }

    /// Registered provider identifiers, sorted
    pub fn providers(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.providers())
            .finish()
    }
}
