//! Standalone reconciliation
//!
//! One pass takes a descriptor from whatever state the cluster is in to the
//! desired state, writes the status it observed, and tells the caller when
//! to look again. Every step is get-or-create with selective updates, so a
//! pass over a converged instance performs no writes at all.

use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::{Resource, ResourceExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use splunk_appframework::{are_remote_volume_keys_changed, observed_revisions, ProviderRegistry};
use splunk_common::crd::{Phase, Standalone, StandaloneStatus, VolumeSpec};
use splunk_common::events::{actions, reasons, EventPublisher, NoopEventPublisher};
use splunk_common::store::selector_string;
use splunk_common::{Error, ObjectStore, Result, REQUEUE_NOT_READY_SECS, REQUEUE_SUCCESS_SECS};

use crate::apps::{next_poll_in, refresh_app_context, unlisted_secrets};
use crate::builder::{
    selector_labels, template_hash, DefaultBuilder, ResourceBuilder, WorkloadInputs, DEFAULT_IMAGE,
};
use crate::clock::{Clock, SystemClock};
use crate::converge::{ensure, Applied};
use crate::deletion::finalize;
use crate::rollout::recycle_stale_pod;
use crate::secrets::{
    desired_secret_data, ensure_admin_secret, ensure_versioned_secret, prune_versioned_secrets,
};
use crate::status::{compute_status, Observed};
use crate::validate::validate_standalone;

/// Versioned secrets kept per instance, newest first
pub const DEFAULT_SECRET_RETENTION: usize = 3;

/// Upper bound on one pass's remote listing
pub const DEFAULT_LISTING_TIMEOUT: Duration = Duration::from_secs(60);

/// Tunables of the engine
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Image used when a descriptor does not name one
    pub default_image: String,
    /// Requeue delay while an instance is not Ready
    pub not_ready_requeue: Duration,
    /// Recheck interval of a Ready instance; unowned credential secrets are
    /// only noticed on these passes
    pub ready_requeue: Duration,
    /// Versioned secrets kept per instance
    pub secret_retention: usize,
    /// Deadline for listing all app sources; `None` waits indefinitely
    pub listing_timeout: Option<Duration>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_image: DEFAULT_IMAGE.to_string(),
            not_ready_requeue: Duration::from_secs(REQUEUE_NOT_READY_SECS),
            ready_requeue: Duration::from_secs(REQUEUE_SUCCESS_SECS),
            secret_retention: DEFAULT_SECRET_RETENTION,
            listing_timeout: Some(DEFAULT_LISTING_TIMEOUT),
        }
    }
}

/// Shared state of the reconciler
pub struct Context<S: ObjectStore> {
    /// Cluster object store
    pub store: Arc<S>,
    /// Remote storage clients by provider
    pub registry: Arc<ProviderRegistry>,
    /// Desired object layouts
    pub resources: Arc<dyn ResourceBuilder>,
    /// Kubernetes Events sink
    pub events: Arc<dyn EventPublisher>,
    /// Time source for poll scheduling
    pub clock: Arc<dyn Clock>,
    /// Cancels in-flight remote listings on shutdown
    pub cancel: CancellationToken,
    /// Tunables
    pub config: EngineConfig,
}

impl<S: ObjectStore> Context<S> {
    /// Create a builder around an object store
    pub fn builder(store: S) -> ContextBuilder<S> {
        ContextBuilder::new(store)
    }
}

/// Builder for [`Context`]
///
/// ```text
/// let ctx = Context::builder(KubeStore::new(client.clone()))
///     .events(Arc::new(KubeEventPublisher::new(client, OPERATOR_NAME)))
///     .build();
/// ```
pub struct ContextBuilder<S: ObjectStore> {
    store: S,
    registry: Option<Arc<ProviderRegistry>>,
    resources: Option<Arc<dyn ResourceBuilder>>,
    events: Option<Arc<dyn EventPublisher>>,
    clock: Option<Arc<dyn Clock>>,
    cancel: Option<CancellationToken>,
    config: EngineConfig,
}

impl<S: ObjectStore> ContextBuilder<S> {
    fn new(store: S) -> Self {
        Self {
            store,
            registry: None,
            resources: None,
            events: None,
            clock: None,
            cancel: None,
            config: EngineConfig::default(),
        }
    }

    /// Override the provider registry
    pub fn registry(mut self, registry: Arc<ProviderRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Override the resource builder
    pub fn resources(mut self, resources: Arc<dyn ResourceBuilder>) -> Self {
        self.resources = Some(resources);
        self
    }

    /// Publish Events through `events` instead of dropping them
    pub fn events(mut self, events: Arc<dyn EventPublisher>) -> Self {
        self.events = Some(events);
        self
    }

    /// Override the clock (primarily for testing)
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Share a cancellation token with the caller
    pub fn cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Replace the engine tunables
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the Context
    pub fn build(self) -> Context<S> {
        Context {
            store: Arc::new(self.store),
            registry: self
                .registry
                .unwrap_or_else(|| Arc::new(ProviderRegistry::with_defaults())),
            resources: self.resources.unwrap_or_else(|| Arc::new(DefaultBuilder)),
            events: self
                .events
                .unwrap_or_else(|| Arc::new(NoopEventPublisher)),
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            cancel: self.cancel.unwrap_or_default(),
            config: self.config,
        }
    }
}

/// Converge one descriptor and record what was observed
///
/// Returns the delay after which the descriptor should be looked at again,
/// or `None` once it is being deleted. A failed pass still writes status
/// before the error is returned.
#[instrument(skip(cr, ctx), fields(standalone = %cr.name_any()))]
pub async fn apply<S: ObjectStore>(
    cr: &Standalone,
    ctx: &Context<S>,
) -> Result<Option<Duration>> {
    let name = cr.name_any();
    let namespace = cr
        .namespace()
        .ok_or_else(|| Error::validation_for(&name, "descriptor has no namespace"))?;

    let previous = cr.status.clone().unwrap_or_default();
    let selector = selector_string(&selector_labels(&name));

    if cr.is_deleting() {
        info!("descriptor is being deleted");
        let observed = Observed {
            deleting: true,
            ..Default::default()
        };
        let status = compute_status(
            &previous,
            cr.metadata.generation,
            cr.spec.replicas,
            selector,
            &observed,
            None,
        );
        if let Err(e) = write_status(cr, ctx, status).await {
            warn!(error = %e, "could not record Terminating phase");
        }
        finalize(&*ctx.store, &*ctx.events, cr).await?;
        return Ok(None);
    }

    let mut observed = Observed::default();
    let outcome = converge(cr, ctx, &namespace, &mut observed).await;
    if let Err(e) = &outcome {
        report_failure(cr, ctx, e).await;
    }

    let status = compute_status(
        &previous,
        cr.metadata.generation,
        cr.spec.replicas,
        selector,
        &observed,
        outcome.as_ref().err(),
    );
    let phase = status.phase;
    let written = write_status(cr, ctx, status.clone()).await;

    if written.is_ok() && phase == Phase::Ready && previous.phase != Phase::Ready {
        ctx.events
            .publish(
                &cr.object_ref(&()),
                EventType::Normal,
                reasons::READY,
                actions::RECONCILE,
                Some(format!(
                    "{} of {} replicas ready",
                    status.ready_replicas, status.replicas
                )),
            )
            .await;
    }

    match (outcome, written) {
        (Err(e), Err(status_err)) => {
            warn!(error = %status_err, "could not record failed pass");
            Err(e)
        }
        (Err(e), Ok(())) | (Ok(()), Err(e)) => Err(e),
        (Ok(()), Ok(())) => Ok(requeue_hint(cr, ctx, &status)),
    }
}

/// Every convergence step, in dependency order
async fn converge<S: ObjectStore>(
    cr: &Standalone,
    ctx: &Context<S>,
    namespace: &str,
    observed: &mut Observed,
) -> Result<()> {
    let store = &*ctx.store;
    let resources = &*ctx.resources;

    let volume_keys = validate_standalone(store, cr, namespace).await?;
    let apps = refresh_app_context(ctx, cr, namespace).await?;
    observed.app_context = Some(apps.clone());

    let admin = ensure_admin_secret(store, resources, namespace).await?;

    let headless = ensure(store, cr, resources.headless_service(cr)).await?;
    record_created(cr, ctx, &headless).await;
    let service = ensure(store, cr, resources.service(cr)).await?;
    record_created(cr, ctx, &service).await;

    let rotated = credentials_rotated(cr, ctx, namespace).await;
    let data = desired_secret_data(&admin, &volume_keys)?;
    let version = ensure_versioned_secret(store, resources, cr, namespace, data, rotated).await?;
    if version.minted && version.version > 1 {
        ctx.events
            .publish(
                &cr.object_ref(&()),
                EventType::Normal,
                reasons::SECRET_ROTATED,
                actions::ROTATE,
                Some(format!("Pods now mount {}", version.name)),
            )
            .await;
    }

    let smartstore = cr.spec.smartstore.is_configured();
    if smartstore {
        let config = ensure(store, cr, resources.smartstore_config(cr)).await?;
        record_created(cr, ctx, &config).await;
    }
    let app_list = cr.spec.app_framework.is_configured();
    if app_list {
        let config = ensure(store, cr, resources.app_list_config(cr, &apps)?).await?;
        record_created(cr, ctx, &config).await;
    }

    let desired = resources.stateful_set(
        cr,
        &WorkloadInputs {
            secret_name: &version.name,
            default_image: &ctx.config.default_image,
            smartstore,
            app_list,
        },
    )?;
    let applied = ensure(store, cr, desired).await?;
    record_created(cr, ctx, &applied).await;
    observed.template_updated = match &applied {
        Applied::Updated { previous, current } => template_hash(previous) != template_hash(current),
        _ => false,
    };
    let sts = applied.into_inner();
    if let Some(pod) = recycle_stale_pod(store, &sts).await? {
        ctx.events
            .publish(
                &cr.object_ref(&()),
                EventType::Normal,
                reasons::POD_RECYCLED,
                actions::ROLL_OUT,
                Some(format!("Deleted {} to roll it onto the current revision", pod)),
            )
            .await;
    }
    observed.stateful_set = Some(sts);

    // The workload now mounts the current credentials
    let held = unlisted_secrets(cr, namespace, &apps);
    if !held.is_empty() {
        debug!(?held, "keeping recorded revisions of unlisted app volumes");
    }
    let mut revisions = cr.revision_map();
    revisions.extend(
        observed_revisions(store, namespace, &tracked_volumes(cr))
            .await?
            .into_iter()
            .filter(|(secret, _)| !held.contains(secret)),
    );
    observed.revisions = Some(revisions);

    let pruned =
        prune_versioned_secrets(store, cr, namespace, ctx.config.secret_retention).await?;
    if !pruned.is_empty() {
        debug!(?pruned, "pruned versioned secrets");
    }
    Ok(())
}

/// Volumes whose credential secrets are tracked in the revision map
///
/// The trailing default volume stands for the namespace admin secret.
fn tracked_volumes(cr: &Standalone) -> Vec<VolumeSpec> {
    cr.spec
        .smartstore
        .volumes
        .iter()
        .chain(&cr.spec.app_framework.volumes)
        .cloned()
        .chain(std::iter::once(VolumeSpec::default()))
        .collect()
}

/// True if a mounted credential secret changed since it was recorded
async fn credentials_rotated<S: ObjectStore>(
    cr: &Standalone,
    ctx: &Context<S>,
    namespace: &str,
) -> bool {
    let rev_map = cr.revision_map();
    if rev_map.is_empty() {
        return false;
    }
    let mut volumes = cr.spec.smartstore.volumes.clone();
    volumes.push(VolumeSpec::default());
    match are_remote_volume_keys_changed(&*ctx.store, namespace, &volumes, &rev_map).await {
        Ok(changed) => changed,
        Err(e) => {
            warn!(error = %e, "could not check mounted credentials");
            false
        }
    }
}

async fn record_created<S, K>(cr: &Standalone, ctx: &Context<S>, applied: &Applied<K>)
where
    S: ObjectStore,
    K: Resource<DynamicType = ()> + Debug,
{
    if let Applied::Created(obj) = applied {
        ctx.events
            .publish(
                &cr.object_ref(&()),
                EventType::Normal,
                reasons::RESOURCE_CREATED,
                actions::RECONCILE,
                Some(format!("Created {} {}", K::kind(&()), obj.name_any())),
            )
            .await;
    }
}

async fn report_failure<S: ObjectStore>(cr: &Standalone, ctx: &Context<S>, e: &Error) {
    let reason = match e {
        Error::FatalInvariant { .. } => reasons::OWNERSHIP_CONFLICT,
        _ if e.is_phase_error() => reasons::VALIDATION_FAILED,
        _ => return,
    };
    ctx.events
        .publish(
            &cr.object_ref(&()),
            EventType::Warning,
            reason,
            actions::RECONCILE,
            Some(e.to_string()),
        )
        .await;
}

/// Persist `status` unless the descriptor already carries it
async fn write_status<S: ObjectStore>(
    cr: &Standalone,
    ctx: &Context<S>,
    status: StandaloneStatus,
) -> Result<()> {
    if cr.status.as_ref() == Some(&status) {
        debug!("status unchanged");
        return Ok(());
    }
    let mut next = cr.clone();
    next.status = Some(status);
    ctx.store.update_status(&next).await?;
    Ok(())
}

fn requeue_hint<S: ObjectStore>(
    cr: &Standalone,
    ctx: &Context<S>,
    status: &StandaloneStatus,
) -> Option<Duration> {
    if status.phase != Phase::Ready {
        return Some(ctx.config.not_ready_requeue);
    }
    let recheck = ctx.config.ready_requeue;
    Some(match next_poll_in(cr, &status.app_context, ctx.clock.now()) {
        Some(poll) => poll.min(recheck),
        None => recheck,
    })
}

/// Controller entry point around [`apply`]
pub async fn reconcile<S: ObjectStore>(
    cr: Arc<Standalone>,
    ctx: Arc<Context<S>>,
) -> Result<Action> {
    Ok(match apply(&cr, &ctx).await? {
        Some(delay) => Action::requeue(delay),
        None => Action::await_change(),
    })
}

/// Requeue policy for a failed pass
pub fn error_policy<S: ObjectStore>(
    cr: Arc<Standalone>,
    error: &Error,
    _ctx: Arc<Context<S>>,
) -> Action {
    error!(
        ?error,
        standalone = %cr.name_any(),
        retryable = error.is_retryable(),
        "reconciliation failed"
    );
    match error.requeue_after() {
        Some(delay) => Action::requeue(delay),
        None => Action::await_change(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use k8s_openapi::api::apps::v1::StatefulSet;
    use k8s_openapi::api::core::v1::Secret;
    use splunk_common::crd::StandaloneSpec;
    use splunk_common::testing::{MemoryStore, RecordingEventPublisher, Verb};

    use crate::clock::ManualClock;

    fn stored(store: &MemoryStore) -> Standalone {
        let mut cr = Standalone::new("stack1", StandaloneSpec::default());
        cr.metadata.namespace = Some("test".to_string());
        store.insert(&cr).unwrap()
    }

    fn context(store: MemoryStore) -> Context<MemoryStore> {
        let start = Utc.with_ymd_and_hms(2021, 5, 1, 23, 23, 0).unwrap();
        Context::builder(store)
            .clock(Arc::new(ManualClock::new(start)))
            .build()
    }

    fn latest(ctx: &Context<MemoryStore>) -> Standalone {
        ctx.store.get_stored("test", "stack1").unwrap()
    }

    // ==========================================================================
    // Story Tests: Reconcile Pass
    // ==========================================================================

    /// Story: A fresh descriptor gets its whole object set and a status
    #[tokio::test]
    async fn story_first_pass_creates_everything() {
        let store = MemoryStore::new();
        let cr = stored(&store);
        let ctx = context(store);

        let requeue = apply(&cr, &ctx).await.unwrap();

        assert_eq!(requeue, Some(ctx.config.not_ready_requeue));
        assert!(ctx
            .store
            .get_stored::<StatefulSet>("test", "splunk-stack1-standalone")
            .is_some());
        assert!(ctx
            .store
            .get_stored::<Secret>("test", "splunk-stack1-standalone-secret-v1")
            .is_some());
        let status = latest(&ctx).status.unwrap();
        assert_eq!(status.phase, Phase::Updating);
        assert_eq!(status.replicas, 1);
        assert!(status.selector.contains("app.kubernetes.io/instance=splunk-stack1-standalone"));
        assert!(status.resource_rev_map.contains_key("splunk-test-secret"));
    }

    /// Story: The second pass over a converged instance writes nothing
    #[tokio::test]
    async fn story_second_pass_is_quiet() {
        let store = MemoryStore::new();
        let cr = stored(&store);
        let ctx = context(store);
        apply(&cr, &ctx).await.unwrap();

        ctx.store.clear_calls();
        apply(&latest(&ctx), &ctx).await.unwrap();
        assert!(ctx.store.mutations().is_empty(), "{:?}", ctx.store.mutations());
    }

    /// Story: A failed pass still records status and surfaces the error
    #[tokio::test]
    async fn story_validation_failure_writes_status_only() {
        let store = MemoryStore::new();
        let mut cr = Standalone::new("stack1", StandaloneSpec::default());
        cr.metadata.namespace = Some("test".to_string());
        cr.spec.replicas = -1;
        let cr = store.insert(&cr).unwrap();

        let events = RecordingEventPublisher::new();
        let ctx = Context::builder(store).events(Arc::new(events.clone())).build();

        let err = apply(&cr, &ctx).await.unwrap_err();
        assert!(err.is_phase_error());
        assert_eq!(events.reasons(), vec![reasons::VALIDATION_FAILED]);
        assert!(events.events()[0].warning);
        assert_eq!(
            ctx.store.mutations().iter().map(|c| c.verb).collect::<Vec<_>>(),
            vec![Verb::UpdateStatus]
        );
        let status = latest(&ctx).status.unwrap();
        assert_eq!(status.phase, Phase::Error);
        assert!(status.message.unwrap().contains("replicas"));
    }

    /// Story: A transient failure leaves the recorded phase alone
    #[tokio::test]
    async fn story_transient_failure_keeps_phase() {
        let store = MemoryStore::new();
        let cr = stored(&store);
        let ctx = context(store);
        apply(&cr, &ctx).await.unwrap();

        ctx.store.fail(Verb::Get, "StatefulSet", 500);
        let err = apply(&latest(&ctx), &ctx).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(latest(&ctx).phase(), Phase::Updating);
    }

    #[test]
    fn error_policy_follows_error_class() {
        let ctx = Arc::new(context(MemoryStore::new()));
        let cr = Arc::new(Standalone::new("stack1", StandaloneSpec::default()));
        let action = error_policy(cr.clone(), &Error::validation("bad"), ctx.clone());
        assert_eq!(action, Action::await_change());
        let action = error_policy(cr, &Error::remote("aws", "timeout"), ctx);
        assert_ne!(action, Action::await_change());
    }
}
