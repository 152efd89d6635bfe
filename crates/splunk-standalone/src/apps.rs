//! App framework refresh: when to list remote storage and how to record it

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, SecondsFormat, Utc};
use kube::runtime::events::EventType;
use kube::Resource;
use tracing::{debug, info, warn};

use splunk_appframework::{are_remote_volume_keys_changed, list_all_sources};
use splunk_common::crd::{AppDeploymentContext, AppSourceState, Standalone, VolumeSpec};
use splunk_common::events::{actions, reasons};
use splunk_common::{ObjectStore, Result};

use crate::controller::Context;

/// Why a listing is due, if it is
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefreshReason {
    /// Nothing has been listed yet
    FirstListing,
    /// The app framework configuration changed
    ConfigChanged,
    /// A volume credential secret changed
    CredentialsRotated,
    /// The poll interval elapsed
    PollIntervalElapsed,
}

fn parse_time(value: Option<&str>) -> Option<DateTime<Utc>> {
    value
        .and_then(|v| DateTime::parse_from_rfc3339(v).ok())
        .map(|t| t.with_timezone(&Utc))
}

/// Decide whether remote storage should be listed on this pass
pub async fn refresh_due<S: ObjectStore>(
    ctx: &Context<S>,
    cr: &Standalone,
    namespace: &str,
    previous: &AppDeploymentContext,
) -> Result<Option<RefreshReason>> {
    let framework = &cr.spec.app_framework;
    let Some(last_check) = parse_time(previous.last_check_time.as_deref()) else {
        return Ok(Some(RefreshReason::FirstListing));
    };
    if previous.config_hash.as_deref() != Some(framework.config_hash().as_str()) {
        return Ok(Some(RefreshReason::ConfigChanged));
    }

    let rev_map = cr.revision_map();
    if !rev_map.is_empty() {
        match are_remote_volume_keys_changed(&*ctx.store, namespace, &framework.volumes, &rev_map)
            .await
        {
            Ok(true) => return Ok(Some(RefreshReason::CredentialsRotated)),
            Ok(false) => {}
            // The listing itself reports unusable secrets per source
            Err(e) => warn!(error = %e, "could not check app volume credentials"),
        }
    }

    if let Some(interval) = framework.poll_interval()? {
        let elapsed = ctx.clock.now().signed_duration_since(last_check);
        if elapsed.to_std().is_ok_and(|e| e >= interval) {
            return Ok(Some(RefreshReason::PollIntervalElapsed));
        }
    }
    Ok(None)
}

/// Time left until the next scheduled listing
///
/// `None` when the app framework is not configured or polling is disabled.
pub fn next_poll_in(
    cr: &Standalone,
    apps: &AppDeploymentContext,
    now: DateTime<Utc>,
) -> Option<std::time::Duration> {
    let framework = &cr.spec.app_framework;
    if !framework.is_configured() {
        return None;
    }
    let interval = framework.poll_interval().ok().flatten()?;
    let elapsed = parse_time(apps.last_check_time.as_deref())
        .and_then(|last| now.signed_duration_since(last).to_std().ok())
        .unwrap_or_default();
    Some(
        interval
            .saturating_sub(elapsed)
            .max(std::time::Duration::from_secs(1)),
    )
}

/// Credential secrets whose revisions must not be committed yet
///
/// A source whose last listing failed has not consumed its volume's current
/// credentials, so the old revision stays recorded and the next pass relists
/// it as a rotation. Secrets also mounted for SmartStore or the namespace
/// admin are never held back; the versioned secret already picked them up.
pub fn unlisted_secrets(
    cr: &Standalone,
    namespace: &str,
    apps: &AppDeploymentContext,
) -> BTreeSet<String> {
    let framework = &cr.spec.app_framework;
    let mounted: BTreeSet<String> = cr
        .spec
        .smartstore
        .volumes
        .iter()
        .chain(std::iter::once(&VolumeSpec::default()))
        .map(|v| v.effective_secret(namespace))
        .collect();
    framework
        .app_sources
        .iter()
        .filter(|source| {
            apps.sources
                .get(&source.name)
                .is_some_and(|state| state.error.is_some())
        })
        .filter_map(|source| framework.effective_volume(source).ok())
        .map(|volume| volume.effective_secret(namespace))
        .filter(|secret| !mounted.contains(secret))
        .collect()
}

/// App framework state after this pass
///
/// Lists every app source when a refresh is due. A source whose listing
/// failed records the error and keeps the objects it had before, so one bad
/// bucket never blanks out the others or its own last good listing.
pub async fn refresh_app_context<S: ObjectStore>(
    ctx: &Context<S>,
    cr: &Standalone,
    namespace: &str,
) -> Result<AppDeploymentContext> {
    let framework = &cr.spec.app_framework;
    if !framework.is_configured() {
        return Ok(AppDeploymentContext::default());
    }
    let previous = cr
        .status
        .as_ref()
        .map(|s| s.app_context.clone())
        .unwrap_or_default();

    let Some(reason) = refresh_due(ctx, cr, namespace, &previous).await? else {
        debug!("app listing not due");
        return Ok(previous);
    };
    info!(?reason, sources = framework.app_sources.len(), "listing app sources");

    let mut listings = list_all_sources(
        &*ctx.store,
        &ctx.registry,
        namespace,
        framework,
        &ctx.cancel,
        ctx.config.listing_timeout,
    )
    .await;

    let mut sources = BTreeMap::new();
    for source in &framework.app_sources {
        let kept = previous
            .sources
            .get(&source.name)
            .map(|s| s.objects.clone())
            .unwrap_or_default();
        let state = match listings.remove(&source.name) {
            Some(Ok(objects)) => AppSourceState {
                objects: objects.iter().map(|o| o.to_app_entry()).collect(),
                error: None,
            },
            Some(Err(e)) => {
                ctx.events
                    .publish(
                        &cr.object_ref(&()),
                        EventType::Warning,
                        reasons::APP_LISTING_FAILED,
                        actions::LIST_APPS,
                        Some(format!("App source '{}': {}", source.name, e)),
                    )
                    .await;
                AppSourceState {
                    objects: kept,
                    error: Some(e.to_string()),
                }
            }
            None => AppSourceState {
                objects: kept,
                error: None,
            },
        };
        sources.insert(source.name.clone(), state);
    }

    Ok(AppDeploymentContext {
        last_check_time: Some(ctx.clock.now().to_rfc3339_opts(SecondsFormat::Secs, true)),
        config_hash: Some(framework.config_hash()),
        sources,
    })
}
