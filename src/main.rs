//! Composite application controller - deploys an EntandoCompositeApp's components in order

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use clap::Parser;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::{Api, Client, CustomResourceExt};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use composite_controller::config::{collect_passthrough, related_images, ControllerConfig};
use composite_controller::controller::{deploy_composite, Context, ImageOverride};
use composite_controller::crd::{
    CompositeStatus, DeploymentPhase, EntandoCompositeApp, ResourceAction,
};
use composite_controller::executor::{watch::run_unit_watch, CompletionWatcher};
use composite_controller::Error;

const WATCH_SYNC_TIMEOUT: Duration = Duration::from_secs(60);

/// Deploys the components of one EntandoCompositeApp through delegated controller pods
#[derive(Parser, Debug)]
#[command(name = "composite-controller", version, about, long_about = None)]
struct Cli {
    /// Generate the CRD manifest and exit
    #[arg(long)]
    crd: bool,

    #[command(flatten)]
    run: RunArgs,
}

/// Settings for a deployment run
#[derive(Parser, Debug)]
struct RunArgs {
    /// Namespace of the EntandoCompositeApp to deploy
    #[arg(long, env = "ENTANDO_RESOURCE_NAMESPACE")]
    resource_namespace: Option<String>,

    /// Name of the EntandoCompositeApp to deploy
    #[arg(long, env = "ENTANDO_RESOURCE_NAME")]
    resource_name: Option<String>,

    /// Action that triggered this run (ADDED, MODIFIED or DELETED)
    #[arg(long, env = "ENTANDO_RESOURCE_ACTION", default_value = "ADDED")]
    resource_action: String,

    /// Namespace execution units are created in; defaults to the composite's namespace
    #[arg(long, env = "ENTANDO_CONTROLLER_NAMESPACE")]
    controller_namespace: Option<String>,

    /// Service account execution units run as
    #[arg(long, env = "ENTANDO_K8S_OPERATOR_SERVICEACCOUNT", default_value = "default")]
    service_account: String,

    /// Remove succeeded execution units after each component
    #[arg(long, env = "ENTANDO_K8S_OPERATOR_GC_CONTROLLER_PODS")]
    gc_controller_pods: bool,

    /// Registry controller images are pulled from
    #[arg(long, env = "ENTANDO_DOCKER_REGISTRY_OVERRIDE")]
    registry: Option<String>,

    /// Organization controller images live under
    #[arg(long, env = "ENTANDO_DOCKER_IMAGE_ORG_OVERRIDE", default_value = "entando")]
    organization: String,

    /// Version used for images without a more specific one
    #[arg(long, env = "ENTANDO_DOCKER_IMAGE_VERSION_FALLBACK")]
    default_version: Option<String>,

    /// Controller image version for this run, ahead of every other version source
    #[arg(long)]
    image_version: Option<String>,

    /// ConfigMap holding per-image version/registry/organization settings
    #[arg(
        long,
        env = "ENTANDO_DOCKER_IMAGE_INFO_CONFIGMAP",
        default_value = "entando-docker-image-info"
    )]
    image_info_configmap: String,

    /// Namespace of the image info ConfigMap; defaults to the controller namespace
    #[arg(long, env = "ENTANDO_DOCKER_IMAGE_INFO_NAMESPACE")]
    image_info_namespace: Option<String>,

    /// Seconds to wait for stale execution units to disappear
    #[arg(long, default_value = "120")]
    removal_timeout_secs: u64,

    /// Seconds to wait for an execution unit to finish
    #[arg(long, default_value = "1800")]
    completion_timeout_secs: u64,

    /// Dotted property forwarded to execution units (e.g. entando.k8s.operator-compliance-mode=true)
    #[arg(long = "property", value_parser = parse_property)]
    properties: Vec<(String, String)>,
}

fn parse_property(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.trim().to_string(), v.to_string()))
        .filter(|(k, _)| !k.is_empty())
        .ok_or_else(|| format!("expected key=value, got '{raw}'"))
}

impl RunArgs {
    fn controller_config(&self, composite_namespace: &str) -> ControllerConfig {
        let mut config = ControllerConfig::new(
            self.controller_namespace
                .clone()
                .unwrap_or_else(|| composite_namespace.to_string()),
        );
        config.service_account = self.service_account.clone();
        config.garbage_collect_units = self.gc_controller_pods;
        config.images.registry = self.registry.clone();
        config.images.organization = self.organization.clone();
        config.images.default_version = self.default_version.clone();
        config.image_version = self.image_version.clone();
        config.removal_timeout = Duration::from_secs(self.removal_timeout_secs);
        config.completion_timeout = Duration::from_secs(self.completion_timeout_secs);
        config.passthrough = collect_passthrough(self.properties.clone(), std::env::vars());
        config.images.pinned = related_images(&config.passthrough);
        config
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install the aws-lc-rs crypto provider before any TLS connection is made
    if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        eprintln!("CRITICAL: failed to install the aws-lc-rs crypto provider: {e:?}");
        std::process::exit(1);
    }

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if cli.crd {
        let crd = serde_yaml::to_string(&EntandoCompositeApp::crd())
            .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
        println!("{crd}");
        return Ok(());
    }

    run(cli.run).await
}

/// Deploy the composite named by the resource coordinates
async fn run(args: RunArgs) -> anyhow::Result<()> {
    let namespace = args
        .resource_namespace
        .clone()
        .context("ENTANDO_RESOURCE_NAMESPACE is not set")?;
    let name = args
        .resource_name
        .clone()
        .context("ENTANDO_RESOURCE_NAME is not set")?;
    let action: ResourceAction = args.resource_action.parse()?;

    if action == ResourceAction::Deleted {
        info!(namespace = %namespace, name = %name, "Composite deleted; owned components are removed by garbage collection");
        return Ok(());
    }

    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;

    let mut config = args.controller_config(&namespace);
    let info_namespace = args
        .image_info_namespace
        .clone()
        .unwrap_or_else(|| config.controller_namespace.clone());
    config.images.overrides =
        load_image_overrides(&client, &info_namespace, &args.image_info_configmap).await?;

    let completion = Arc::new(CompletionWatcher::new());
    let cancel = CancellationToken::new();
    let (ready_tx, ready_rx) = oneshot::channel();
    let pump = tokio::spawn(run_unit_watch(
        client.clone(),
        config.controller_namespace.clone(),
        completion.clone(),
        cancel.clone(),
        ready_tx,
    ));

    // Units created before the watch has listed could finish unseen
    if let Err(e) = await_watch_sync(ready_rx, WATCH_SYNC_TIMEOUT).await {
        cancel.cancel();
        return Err(e);
    }

    let composites: Api<EntandoCompositeApp> = Api::namespaced(client.clone(), &namespace);
    let composite = composites
        .get(&name)
        .await
        .with_context(|| format!("Failed to load EntandoCompositeApp {namespace}/{name}"))?;

    info!(
        namespace = %namespace,
        name = %name,
        action = %action,
        components = composite.spec.components.len(),
        "Processing composite"
    );

    let ctx = Context::builder(client, config).completion(completion).build();
    let result = deploy_composite(&composite, &ctx).await;

    cancel.cancel();
    if let Err(e) = pump.await {
        warn!(error = %e, "Unit watch task ended abnormally");
    }

    match result {
        Ok(status) => {
            info!(phase = %status.phase, components = status.components.len(), "Composite processed");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Composite deployment failed");
            // Component failures are recorded by the orchestrator itself
            if !matches!(e, Error::Component { .. }) {
                let status = CompositeStatus::with_phase(DeploymentPhase::Failed)
                    .message(e.to_string())
                    .observed_generation(composite.metadata.generation);
                if let Err(patch) = ctx
                    .store
                    .patch_composite_status(&namespace, &name, &status)
                    .await
                {
                    warn!(error = %patch, "Failed to record composite failure");
                }
            }
            Err(e.into())
        }
    }
}

/// Wait for the unit watch to report its initial listing
async fn await_watch_sync(ready: oneshot::Receiver<()>, timeout: Duration) -> anyhow::Result<()> {
    match tokio::time::timeout(timeout, ready).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(_)) => anyhow::bail!("unit watch stopped before its initial listing"),
        Err(_) => anyhow::bail!(
            "unit watch did not finish its initial listing within {}s",
            timeout.as_secs()
        ),
    }
}

/// Read per-image settings from the image info ConfigMap, if it exists
async fn load_image_overrides(
    client: &Client,
    namespace: &str,
    name: &str,
) -> anyhow::Result<BTreeMap<String, ImageOverride>> {
    let api: Api<ConfigMap> = Api::namespaced(client.clone(), namespace);
    let Some(configmap) = api
        .get_opt(name)
        .await
        .with_context(|| format!("Failed to read ConfigMap {namespace}/{name}"))?
    else {
        info!(namespace, name, "No image info ConfigMap; using image defaults");
        return Ok(BTreeMap::new());
    };

    let mut overrides = BTreeMap::new();
    for (image, json) in configmap.data.unwrap_or_default() {
        let settings = ImageOverride::parse(&image, &json)?;
        overrides.insert(image, settings);
    }
    info!(count = overrides.len(), "Loaded image overrides");
    Ok(overrides)
}
