//! Splunk Operator - convergence of Standalone descriptors

use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use futures::StreamExt;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service};
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client, CustomResourceExt};
use tokio_util::sync::CancellationToken;

use splunk_appframework::ProviderRegistry;
use splunk_common::crd::Standalone;
use splunk_common::events::KubeEventPublisher;
use splunk_common::telemetry::{init_telemetry, LogFormat, TelemetryConfig};
use splunk_common::{KubeStore, OPERATOR_NAME, REQUEUE_SUCCESS_SECS};
use splunk_standalone::builder::DEFAULT_IMAGE;
use splunk_standalone::controller::DEFAULT_SECRET_RETENTION;
use splunk_standalone::{error_policy, reconcile, Context, EngineConfig, SystemClock};

/// Watcher timeout (seconds); must stay under the client read timeout
const WATCH_TIMEOUT_SECS: u32 = 25;

/// Splunk operator for Kubernetes
#[derive(Parser, Debug)]
#[command(name = "splunk-operator", version, about, long_about = None)]
struct Cli {
    /// Print the Standalone CRD manifest and exit
    #[arg(long)]
    crd: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the Standalone controller (default mode)
    Controller(ControllerArgs),
}

#[derive(Args, Debug, Clone)]
struct ControllerArgs {
    /// Only watch this namespace; all namespaces when unset
    #[arg(long, env = "WATCH_NAMESPACE")]
    namespace: Option<String>,

    /// Image used for descriptors that do not name one
    #[arg(long, env = "RELATED_IMAGE_SPLUNK_ENTERPRISE", default_value = DEFAULT_IMAGE)]
    default_image: String,

    /// Log format: json or text
    #[arg(long, env = "LOG_FORMAT", default_value = "json")]
    log_format: LogFormat,

    /// Seconds allowed for one pass's app source listing; 0 waits indefinitely
    #[arg(long, env = "APP_LISTING_TIMEOUT_SECS", default_value_t = 60)]
    listing_timeout_secs: u64,

    /// Versioned secrets kept per instance
    #[arg(long, env = "SECRET_RETENTION", default_value_t = DEFAULT_SECRET_RETENTION)]
    secret_retention: usize,

    /// Seconds between rechecks of a Ready instance
    #[arg(long, env = "READY_REQUEUE_SECS", default_value_t = REQUEUE_SUCCESS_SECS)]
    ready_requeue_secs: u64,

    /// Apply the Standalone CRD on startup
    #[arg(long, env = "INSTALL_CRDS")]
    install_crds: bool,
}

impl Default for ControllerArgs {
    fn default() -> Self {
        Self {
            namespace: None,
            default_image: DEFAULT_IMAGE.to_string(),
            log_format: LogFormat::Json,
            listing_timeout_secs: 60,
            secret_retention: DEFAULT_SECRET_RETENTION,
            ready_requeue_secs: REQUEUE_SUCCESS_SECS,
            install_crds: false,
        }
    }
}

impl ControllerArgs {
    fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            default_image: self.default_image.clone(),
            secret_retention: self.secret_retention,
            ready_requeue: Duration::from_secs(self.ready_requeue_secs.max(1)),
            listing_timeout: (self.listing_timeout_secs > 0)
                .then(|| Duration::from_secs(self.listing_timeout_secs)),
            ..EngineConfig::default()
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        eprintln!("CRITICAL: failed to install aws-lc-rs crypto provider: {:?}", e);
        std::process::exit(1);
    }

    let cli = Cli::parse();

    if cli.crd {
        let crd = serde_yaml::to_string(&Standalone::crd())
            .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
        println!("{crd}");
        return Ok(());
    }

    let args = match cli.command {
        Some(Commands::Controller(args)) => args,
        None => ControllerArgs::default(),
    };
    init_telemetry(TelemetryConfig {
        format: args.log_format,
        filter: None,
    })?;
    run_controller(args).await
}

/// Apply the Standalone CRD with server-side apply
async fn ensure_crd_installed(client: &Client) -> anyhow::Result<()> {
    use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
    use kube::api::{Patch, PatchParams};

    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(OPERATOR_NAME).force();

    tracing::info!("Installing Standalone CRD...");
    crds.patch(
        "standalones.enterprise.splunk.com",
        &params,
        &Patch::Apply(&Standalone::crd()),
    )
    .await
    .map_err(|e| anyhow::anyhow!("Failed to install Standalone CRD: {}", e))?;
    Ok(())
}

fn watched<K>(client: &Client, namespace: Option<&str>) -> Api<K>
where
    K: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope>,
    K::DynamicType: Default,
{
    match namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    }
}

async fn run_controller(args: ControllerArgs) -> anyhow::Result<()> {
    let client = Client::try_default().await?;
    if args.install_crds {
        ensure_crd_installed(&client).await?;
    }

    let cancel = CancellationToken::new();
    let ctx = Arc::new(
        Context::builder(KubeStore::new(client.clone()))
            .registry(Arc::new(ProviderRegistry::with_defaults()))
            .events(Arc::new(KubeEventPublisher::new(client.clone(), OPERATOR_NAME)))
            .clock(Arc::new(SystemClock))
            .cancel(cancel.clone())
            .config(args.engine_config())
            .build(),
    );

    // Abandon in-flight bucket listings as soon as shutdown starts
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    let namespace = args.namespace.as_deref();
    tracing::info!(
        namespace = namespace.unwrap_or("<all>"),
        default_image = %args.default_image,
        "Starting Standalone controller"
    );

    let watcher = || WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS);
    Controller::new(watched::<Standalone>(&client, namespace), watcher())
        .owns(watched::<StatefulSet>(&client, namespace), watcher())
        .owns(watched::<Service>(&client, namespace), watcher())
        .owns(watched::<Secret>(&client, namespace), watcher())
        .owns(watched::<ConfigMap>(&client, namespace), watcher())
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok((obj, action)) => {
                    tracing::debug!(standalone = %obj.name, ?action, "reconciliation completed")
                }
                Err(e) => tracing::warn!(error = %e, "reconciliation error"),
            }
        })
        .await;

    tracing::info!("Standalone controller stopped");
    Ok(())
}
