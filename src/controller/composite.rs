//! EntandoCompositeApp orchestrator
//!
//! Walks the composite's components in declaration order. For each one it
//! resolves the identity, writes (inline) or loads (reference) the resource,
//! runs the kind's controller in an execution unit and records the outcome.
//! The first failure stops the run; nothing is retried.

use std::sync::Arc;

use k8s_openapi::api::core::v1::ObjectReference;
use kube::api::DynamicObject;
use kube::{Client, Resource, ResourceExt};
use tracing::{debug, error, info, instrument, warn};

use super::identity::{self, ResolvedComponent};
use super::image::ImageResolver;
use super::overrides::apply_overrides;
use super::ownership::assign_ownership;
use super::status::StatusAggregator;
use super::store::{ComponentStore, KubeComponentStore};
use crate::config::ControllerConfig;
use crate::crd::{
    ComponentEntry, CompositeStatus, EntandoCompositeApp, ProcessingInstruction,
    ResourceAction,
};
use crate::events::{CompositeEvent, EventPublisher, KubeEventPublisher};
use crate::executor::{
    CompletionWatcher, DelegateSettings, ExecutionDelegate, ExecutionRequest, KubePodClient,
    PodClient,
};
use crate::retry::{retry_with_backoff, RetryConfig};
use crate::{Error, PROCESSING_INSTRUCTION_ANNOTATION};

/// Controller name reported on Kubernetes Events
pub const CONTROLLER_NAME: &str = "entando-composite-app-controller";

/// Shared dependencies of the orchestrator
pub struct Context {
    /// Resource store (trait object for testability)
    pub store: Arc<dyn ComponentStore>,
    /// Runs execution units and waits for them
    pub delegate: ExecutionDelegate,
    /// Controller image resolution
    pub images: ImageResolver,
    /// Event publisher for composite lifecycle events
    pub events: Arc<dyn EventPublisher>,
    /// Explicit controller image version for this run
    pub image_version: Option<String>,
    /// Remove succeeded units after each component
    pub garbage_collect_units: bool,
    /// Retry policy for store writes
    pub retry: RetryConfig,
}

impl Context {
    /// Create a builder for constructing a Context
    pub fn builder(client: Client, config: ControllerConfig) -> ContextBuilder {
        ContextBuilder::new(client, config)
    }

    /// Create a context for testing with injected collaborators
    #[cfg(test)]
    pub fn for_testing(
        store: Arc<dyn ComponentStore>,
        pods: Arc<dyn PodClient>,
        completion: Arc<CompletionWatcher>,
        events: Arc<dyn EventPublisher>,
        config: &ControllerConfig,
    ) -> Self {
        Self {
            store,
            delegate: ExecutionDelegate::new(pods, completion, DelegateSettings::from(config)),
            images: ImageResolver::new(config.images.clone()),
            events,
            image_version: config.image_version.clone(),
            garbage_collect_units: config.garbage_collect_units,
            retry: RetryConfig {
                initial_delay: std::time::Duration::from_millis(1),
                max_delay: std::time::Duration::from_millis(5),
                ..RetryConfig::default()
            },
        }
    }
}

/// Builder for constructing [`Context`] instances
pub struct ContextBuilder {
    client: Client,
    config: ControllerConfig,
    store: Option<Arc<dyn ComponentStore>>,
    pods: Option<Arc<dyn PodClient>>,
    events: Option<Arc<dyn EventPublisher>>,
    completion: Option<Arc<CompletionWatcher>>,
    retry: RetryConfig,
}

impl ContextBuilder {
    fn new(client: Client, config: ControllerConfig) -> Self {
        Self {
            client,
            config,
            store: None,
            pods: None,
            events: None,
            completion: None,
            retry: RetryConfig::default(),
        }
    }

    /// Override the resource store
    pub fn store(mut self, store: Arc<dyn ComponentStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Override the pod client
    pub fn pods(mut self, pods: Arc<dyn PodClient>) -> Self {
        self.pods = Some(pods);
        self
    }

    /// Override the event publisher
    pub fn events(mut self, events: Arc<dyn EventPublisher>) -> Self {
        self.events = Some(events);
        self
    }

    /// Share a completion watcher fed by a running watch pump
    pub fn completion(mut self, completion: Arc<CompletionWatcher>) -> Self {
        self.completion = Some(completion);
        self
    }

    /// Override the store write retry policy
    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Build the Context
    pub fn build(self) -> Context {
        let settings = DelegateSettings::from(&self.config);
        let pods = self
            .pods
            .unwrap_or_else(|| Arc::new(KubePodClient::new(self.client.clone())));
        let completion = self.completion.unwrap_or_default();

        Context {
            store: self
                .store
                .unwrap_or_else(|| Arc::new(KubeComponentStore::new(self.client.clone()))),
            delegate: ExecutionDelegate::new(pods, completion, settings),
            images: ImageResolver::new(self.config.images),
            events: self
                .events
                .unwrap_or_else(|| Arc::new(KubeEventPublisher::new(self.client, CONTROLLER_NAME))),
            image_version: self.config.image_version,
            garbage_collect_units: self.config.garbage_collect_units,
            retry: self.retry,
        }
    }
}

/// Where the orchestrator is in its run
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OrchestratorState {
    /// Not started
    Idle,
    /// Working on the component at this index
    Processing(usize),
    /// Every component succeeded
    Succeeded,
    /// A component failed; later components were skipped
    Failed,
}

/// Sequential driver for one composite
pub struct Orchestrator<'a> {
    ctx: &'a Context,
    composite: &'a EntandoCompositeApp,
    namespace: String,
    name: String,
    state: OrchestratorState,
    status: StatusAggregator,
}

impl<'a> Orchestrator<'a> {
    /// Prepare a run over `composite`
    pub fn new(ctx: &'a Context, composite: &'a EntandoCompositeApp) -> Result<Self, Error> {
        let name = composite
            .metadata
            .name
            .clone()
            .ok_or_else(|| Error::validation("EntandoCompositeApp has no name"))?;
        let namespace = composite
            .metadata
            .namespace
            .clone()
            .ok_or_else(|| Error::validation(format!("EntandoCompositeApp {name} has no namespace")))?;

        Ok(Self {
            ctx,
            composite,
            namespace,
            name,
            state: OrchestratorState::Idle,
            status: StatusAggregator::start(composite.status.as_ref(), composite.metadata.generation),
        })
    }

    /// Current state
    pub fn state(&self) -> OrchestratorState {
        self.state
    }

    /// Status as recorded so far
    pub fn status(&self) -> &CompositeStatus {
        self.status.status()
    }

    /// Deploy every component in order, stopping at the first failure
    #[instrument(skip(self), fields(composite = %format!("{}/{}", self.namespace, self.name)))]
    pub async fn run(&mut self) -> Result<CompositeStatus, Error> {
        info!(components = self.composite.spec.components.len(), "deploying composite");
        self.ctx.delegate.completion().clear();
        self.persist_status().await?;

        for (index, entry) in self.composite.spec.components.iter().enumerate() {
            self.state = OrchestratorState::Processing(index);
            if let Err(e) = self.process(entry).await {
                return Err(self.fail(e).await);
            }
        }

        self.state = OrchestratorState::Succeeded;
        self.status.succeed();
        self.persist_status().await?;
        self.publish(CompositeEvent::CompositeDeployed {
            components: self.composite.spec.components.len(),
        })
        .await;
        info!("composite deployed");
        Ok(self.status.status().clone())
    }

    async fn process(&mut self, entry: &ComponentEntry) -> Result<(), Error> {
        let fallback = format!(
            "{} {}/{}",
            entry.kind,
            entry.metadata.namespace.as_deref().unwrap_or(&self.namespace),
            entry.metadata.name.as_deref().unwrap_or("<unnamed>")
        );
        let resolved = entry
            .to_component()
            .and_then(|c| identity::resolve(&c, &self.namespace))
            .map_err(|e| Error::component(fallback, e))?;

        let id = resolved.identity.to_string();
        self.deploy(&resolved)
            .await
            .map_err(|e| Error::component(id, e))
    }

    async fn deploy(&mut self, resolved: &ResolvedComponent) -> Result<(), Error> {
        let identity = &resolved.identity;
        debug!(component = %identity, reference = resolved.is_reference(), "processing component");

        let deployed = self.prepare(resolved).await?;
        let instruction = ProcessingInstruction::from_annotations(deployed.metadata.annotations.as_ref());
        let image = self
            .ctx
            .images
            .resolve_kind(&identity.kind, self.ctx.image_version.as_deref())?;

        let outcome = self
            .ctx
            .delegate
            .execute(ExecutionRequest {
                identity: identity.clone(),
                action: ResourceAction::Added,
                image,
                owner: deployed.controller_owner_ref(&resolved.kind.api_resource()),
            })
            .await?;

        self.status.record(&identity.name, &outcome);
        self.persist_status().await?;

        if outcome.has_failed() {
            return Err(Error::execution_failed(identity.to_string(), outcome.unit));
        }

        info!(component = %identity, unit = %outcome.unit, "component deployed");
        self.publish(CompositeEvent::ComponentDeployed {
            component: identity.to_string(),
            unit: outcome.unit.clone(),
        })
        .await;

        if instruction == ProcessingInstruction::Defer {
            self.clear_deferral(resolved).await?;
        }

        if self.ctx.garbage_collect_units {
            match self.ctx.delegate.remove_succeeded(identity).await {
                Ok(removed) => debug!(component = %identity, removed, "removed succeeded units"),
                Err(e) => warn!(component = %identity, error = %e, "failed to remove succeeded units"),
            }
        }
        Ok(())
    }

    /// Load a reference, or write an inline component with overrides and
    /// ownership applied. Returns the resource as stored.
    async fn prepare(&self, resolved: &ResolvedComponent) -> Result<DynamicObject, Error> {
        let identity = &resolved.identity;
        let Some(inline) = resolved.inline() else {
            return self
                .ctx
                .store
                .load(resolved.kind, &identity.namespace, &identity.name)
                .await;
        };

        let mut typed = inline.decode(resolved.kind)?;
        typed.metadata.namespace = Some(identity.namespace.clone());
        let typed = apply_overrides(&self.composite.spec.overrides(), typed);
        let typed = assign_ownership(self.composite, typed)?;
        let object = typed.to_dynamic()?;
        self.ctx.store.create_or_patch(resolved.kind, &object).await
    }

    async fn clear_deferral(&self, resolved: &ResolvedComponent) -> Result<(), Error> {
        let identity = &resolved.identity;
        let kind = resolved.kind;
        let store = self.ctx.store.as_ref();
        retry_with_backoff(&self.ctx.retry, "remove_processing_instruction", Error::is_retryable, move || {
            store.remove_annotation(
                kind,
                &identity.namespace,
                &identity.name,
                PROCESSING_INSTRUCTION_ANNOTATION,
            )
        })
        .await?;
        debug!(component = %identity, "deferred processing instruction consumed");
        Ok(())
    }

    async fn fail(&mut self, e: Error) -> Error {
        self.state = OrchestratorState::Failed;
        error!(error = %e, "composite deployment failed");
        self.status.fail(e.to_string());

        if let Err(persist) = self.persist_status().await {
            error!(error = %persist, "failed to record composite failure");
        }

        self.publish(CompositeEvent::ComponentFailed {
            error: e.to_string(),
        })
        .await;
        self.publish(CompositeEvent::CompositeFailed {
            stopped_at: e
                .identity()
                .unwrap_or("an unidentified component")
                .to_string(),
        })
        .await;
        e
    }

    async fn persist_status(&self) -> Result<(), Error> {
        let status = self.status.status();
        let store = self.ctx.store.as_ref();
        let (namespace, name) = (self.namespace.as_str(), self.name.as_str());
        retry_with_backoff(&self.ctx.retry, "patch_composite_status", Error::is_retryable, move || {
            store.patch_composite_status(namespace, name, status)
        })
        .await
    }

    async fn publish(&self, event: CompositeEvent) {
        let reference: ObjectReference = self.composite.object_ref(&());
        self.ctx.events.publish(&reference, event).await;
    }
}

/// Run a composite deployment to completion
pub async fn deploy_composite(
    composite: &EntandoCompositeApp,
    ctx: &Context,
) -> Result<CompositeStatus, Error> {
    info!(composite = %composite.name_any(), "starting composite deployment");
    Orchestrator::new(ctx, composite)?.run().await
}
