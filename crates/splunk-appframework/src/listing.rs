//! App source listing
//!
//! Each app source is listed independently: a failure in one source never
//! affects the others. [`list_all_sources`] fans out over every source and
//! returns one outcome per source name.

use std::collections::BTreeMap;
use std::time::Duration;

use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use splunk_common::crd::{AppFrameworkSpec, AppSourceSpec};
use splunk_common::{Error, ObjectStore, Result};

use crate::credentials::resolve_credentials;
use crate::registry::{ClientParams, ProviderRegistry};
use crate::remote::{split_path, RemoteObject};

/// Outcome of listing one app source
pub type SourceListing = Result<Vec<RemoteObject>>;

/// One app source to list, with the configuration it is resolved against
#[derive(Clone, Copy, Debug)]
pub struct AppSourceContext<'a> {
    /// Namespace of the descriptor; credential secrets live here
    pub namespace: &'a str,
    /// The whole app framework configuration
    pub framework: &'a AppFrameworkSpec,
    /// The source being listed
    pub source: &'a AppSourceSpec,
}

/// List the app packages of one app source
///
/// Resolution order: volume binding, provider, credentials, client. Any
/// failure before the listing itself is a configuration error and no
/// request is sent to remote storage.
pub async fn get_apps_list<S: ObjectStore>(
    store: &S,
    registry: &ProviderRegistry,
    ctx: &AppSourceContext<'_>,
) -> SourceListing {
    let volume = ctx.framework.effective_volume(ctx.source)?;
    let provider = volume.provider_id();
    let factory = registry.resolve(provider)?;
    let credentials =
        resolve_credentials(store, ctx.namespace, &volume.effective_secret(ctx.namespace)).await?;

    let params = ClientParams {
        provider: provider.to_string(),
        region: volume.region_or_default().to_string(),
        endpoint: volume.endpoint.clone(),
        access_key: credentials.access_key,
        secret_key: credentials.secret_key,
    };
    let client = factory.build(&params).ok_or_else(|| {
        Error::configuration(
            ctx.source.name.clone(),
            format!(
                "provider '{}' could not build a client for volume '{}'",
                provider, volume.name
            ),
        )
    })?;

    let (bucket, prefix) = split_path(&volume.path, &ctx.source.location);
    let objects = client.list_objects(&bucket, &prefix).await?;
    debug!(
        source = %ctx.source.name,
        volume = %volume.name,
        %bucket,
        %prefix,
        count = objects.len(),
        "listed app source"
    );
    Ok(objects)
}

/// List every app source concurrently
///
/// Each listing races `cancel`; a cancelled source yields
/// `Error::Cancelled` and whatever it had fetched is discarded. With a
/// `timeout`, a slow source fails with a transient remote error.
pub async fn list_all_sources<S: ObjectStore>(
    store: &S,
    registry: &ProviderRegistry,
    namespace: &str,
    framework: &AppFrameworkSpec,
    cancel: &CancellationToken,
    timeout: Option<Duration>,
) -> BTreeMap<String, SourceListing> {
    let listings = framework.app_sources.iter().map(|source| async move {
        let ctx = AppSourceContext {
            namespace,
            framework,
            source,
        };
        let listing = async {
            match timeout {
                Some(limit) => tokio::time::timeout(limit, get_apps_list(store, registry, &ctx))
                    .await
                    .unwrap_or_else(|_| {
                        let provider = framework
                            .effective_volume(source)
                            .map(|v| v.provider_id().to_string())
                            .unwrap_or_default();
                        Err(Error::remote(
                            provider,
                            format!("listing '{}' timed out after {:?}", source.name, limit),
                        ))
                    }),
                None => get_apps_list(store, registry, &ctx).await,
            }
        };

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::cancelled(source.name.clone())),
            result = listing => result,
        };
        if let Err(e) = &outcome {
            warn!(source = %source.name, error = %e, "app source listing failed");
        }
        (source.name.clone(), outcome)
    });

    join_all(listings).await.into_iter().collect()
}
