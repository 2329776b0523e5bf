//! Delegated execution of components
//!
//! Each component is deployed by a short-lived pod (an *execution unit*)
//! running the kind-specific controller image. [`ExecutionDelegate`] removes
//! any stale unit for the component, creates a fresh one and blocks until the
//! [`CompletionWatcher`] reports it terminal.

pub mod unit;
pub mod watch;
pub mod watcher;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::{DeleteParams, ListParams, PostParams};
use kube::{Api, Client};
#[cfg(test)]
use mockall::automock;
use tracing::{debug, info, instrument, warn};

pub use unit::ExecutionUnit;
pub use watcher::{CompletionWatcher, DispatchError, UnitEvent, Waiter};

use crate::config::ControllerConfig;
use crate::crd::{ResourceAction, ResourceIdentity, UnitPhase};
use crate::Error;

/// Submission and removal of execution units
#[cfg_attr(test, automock)]
#[async_trait]
pub trait PodClient: Send + Sync {
    /// Names of pods in `namespace` matching `selector`
    async fn list_names(&self, namespace: &str, selector: &str) -> Result<Vec<String>, Error>;

    /// Delete every pod in `namespace` matching `selector`
    async fn delete_matching(&self, namespace: &str, selector: &str) -> Result<(), Error>;

    /// Create a pod
    async fn create(&self, pod: &Pod) -> Result<(), Error>;

    /// Delete succeeded pods matching `selector`, returning how many were removed
    async fn remove_succeeded(&self, namespace: &str, selector: &str) -> Result<usize, Error>;
}

/// [`PodClient`] over the Kubernetes API
pub struct KubePodClient {
    client: Client,
}

impl KubePodClient {
    /// Create a pod client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl PodClient for KubePodClient {
    async fn list_names(&self, namespace: &str, selector: &str) -> Result<Vec<String>, Error> {
        let pods = self
            .api(namespace)
            .list(&ListParams::default().labels(selector))
            .await?;
        Ok(pods.items.into_iter().filter_map(|p| p.metadata.name).collect())
    }

    async fn delete_matching(&self, namespace: &str, selector: &str) -> Result<(), Error> {
        self.api(namespace)
            .delete_collection(&DeleteParams::default(), &ListParams::default().labels(selector))
            .await?;
        Ok(())
    }

    async fn create(&self, pod: &Pod) -> Result<(), Error> {
        let namespace = pod.metadata.namespace.as_deref().ok_or_else(|| {
            Error::validation("execution unit has no namespace")
        })?;
        self.api(namespace).create(&PostParams::default(), pod).await?;
        Ok(())
    }

    async fn remove_succeeded(&self, namespace: &str, selector: &str) -> Result<usize, Error> {
        let params = ListParams::default()
            .labels(selector)
            .fields("status.phase=Succeeded");
        let api = self.api(namespace);
        let count = api.list(&params).await?.items.len();
        if count > 0 {
            api.delete_collection(&DeleteParams::default(), &params).await?;
        }
        Ok(count)
    }
}

/// Settings the delegate needs from the controller configuration
#[derive(Clone, Debug)]
pub struct DelegateSettings {
    /// Namespace units are created in
    pub namespace: String,
    /// Service account units run as
    pub service_account: String,
    /// Variables forwarded to every unit
    pub passthrough: BTreeMap<String, String>,
    /// Bound on waiting for stale units to be removed
    pub removal_timeout: Duration,
    /// Bound on waiting for a unit to finish
    pub completion_timeout: Duration,
}

impl From<&ControllerConfig> for DelegateSettings {
    fn from(config: &ControllerConfig) -> Self {
        Self {
            namespace: config.controller_namespace.clone(),
            service_account: config.service_account.clone(),
            passthrough: config.passthrough.clone(),
            removal_timeout: config.removal_timeout,
            completion_timeout: config.completion_timeout,
        }
    }
}

/// One component to run through a delegated controller
#[derive(Clone, Debug)]
pub struct ExecutionRequest {
    /// Resource to deploy
    pub identity: ResourceIdentity,
    /// Action the delegated controller performs
    pub action: ResourceAction,
    /// Controller image
    pub image: String,
    /// Owner reference to the resource, stamped on the unit
    pub owner: Option<OwnerReference>,
}

/// Terminal result of an execution unit
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExecutionOutcome {
    /// Name of the unit that ran
    pub unit: String,
    /// Terminal phase it reached
    pub phase: UnitPhase,
}

impl ExecutionOutcome {
    /// Returns true if the unit failed
    pub fn has_failed(&self) -> bool {
        self.phase.has_failed()
    }
}

/// Runs components through execution units and waits for them
pub struct ExecutionDelegate {
    pods: Arc<dyn PodClient>,
    completion: Arc<CompletionWatcher>,
    settings: DelegateSettings,
}

impl ExecutionDelegate {
    /// Create a delegate
    pub fn new(
        pods: Arc<dyn PodClient>,
        completion: Arc<CompletionWatcher>,
        settings: DelegateSettings,
    ) -> Self {
        Self {
            pods,
            completion,
            settings,
        }
    }

    /// Completion watcher the delegate waits on
    pub fn completion(&self) -> &Arc<CompletionWatcher> {
        &self.completion
    }

    /// Remove stale units for the identity, run a new one and wait for it.
    ///
    /// A unit that ends in `Failed` is returned as an outcome, not an error.
    #[instrument(skip(self, request), fields(identity = %request.identity))]
    pub async fn execute(&self, request: ExecutionRequest) -> Result<ExecutionOutcome, Error> {
        let identity = &request.identity;
        let selector = identity.unit_selector();
        let ns = &self.settings.namespace;

        // Attach before deleting so no deletion confirmation is missed
        let mut waiter = self.completion.register(identity)?;

        let stale = self.pods.list_names(ns, &selector).await?;
        if !stale.is_empty() {
            info!(count = stale.len(), "Removing stale execution units");
            self.pods.delete_matching(ns, &selector).await?;
            if let Err(e) = waiter
                .await_removal(&stale, self.settings.removal_timeout)
                .await
            {
                // A watch relist can swallow a deletion; trust the API server
                let remaining = self.pods.list_names(ns, &selector).await?;
                if remaining.iter().any(|name| stale.contains(name)) {
                    return Err(e);
                }
                warn!(error = %e, "Stale execution units are gone without a deletion event");
            }
        }

        let unit = ExecutionUnit {
            name: unit::unit_name(&identity.name),
            namespace: ns.clone(),
            identity: identity.clone(),
            image: request.image.clone(),
            service_account: self.settings.service_account.clone(),
            owner: request.owner.clone(),
            env: unit::environment(&self.settings.passthrough, request.action, identity),
        };
        debug!(unit = %unit.name, image = %unit.image, "Creating execution unit");
        self.pods.create(&unit.to_pod()).await?;

        let phase = waiter
            .await_completion(&unit.name, self.settings.completion_timeout)
            .await?;
        info!(unit = %unit.name, %phase, "Execution unit finished");

        Ok(ExecutionOutcome {
            unit: unit.name,
            phase,
        })
    }

    /// Delete succeeded units for the identity
    pub async fn remove_succeeded(&self, identity: &ResourceIdentity) -> Result<usize, Error> {
        self.pods
            .remove_succeeded(&self.settings.namespace, &identity.unit_selector())
            .await
    }
}
