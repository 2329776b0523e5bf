//! Progress events recorded on the composite
//!
//! Each component outcome and the final composite outcome becomes a
//! Kubernetes Event on the `EntandoCompositeApp`, so `kubectl describe`
//! shows which component ran and which one stopped the run. A failed
//! publish is logged and never fails the deployment.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::Client;
#[cfg(test)]
use mockall::automock;
use tracing::warn;

/// Something worth telling the composite's owner about
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CompositeEvent {
    /// A component's execution unit succeeded
    ComponentDeployed {
        /// Component identity, e.g. `EntandoPlugin apps/avatar`
        component: String,
        /// Unit that deployed it
        unit: String,
    },
    /// A component could not be deployed
    ComponentFailed {
        /// Error that stopped it
        error: String,
    },
    /// Every component was deployed
    CompositeDeployed {
        /// Number of components
        components: usize,
    },
    /// The run stopped at a failed component
    CompositeFailed {
        /// Identity of the component it stopped at
        stopped_at: String,
    },
}

impl CompositeEvent {
    /// Value of the REASON column
    pub fn reason(&self) -> &'static str {
        match self {
            Self::ComponentDeployed { .. } => reasons::COMPONENT_SUCCEEDED,
            Self::ComponentFailed { .. } => reasons::COMPONENT_FAILED,
            Self::CompositeDeployed { .. } => reasons::COMPOSITE_SUCCEEDED,
            Self::CompositeFailed { .. } => reasons::COMPOSITE_FAILED,
        }
    }

    /// Value of the ACTION column
    pub fn action(&self) -> &'static str {
        match self {
            Self::ComponentDeployed { .. } | Self::ComponentFailed { .. } => actions::DEPLOY,
            Self::CompositeDeployed { .. } | Self::CompositeFailed { .. } => actions::RECONCILE,
        }
    }

    /// Failures are warnings
    pub fn is_warning(&self) -> bool {
        matches!(self, Self::ComponentFailed { .. } | Self::CompositeFailed { .. })
    }

    /// Human readable message
    pub fn note(&self) -> String {
        match self {
            Self::ComponentDeployed { component, unit } => format!("{component} deployed by {unit}"),
            Self::ComponentFailed { error } => error.clone(),
            Self::CompositeDeployed { components } => format!("{components} components deployed"),
            Self::CompositeFailed { stopped_at } => format!("stopped at {stopped_at}"),
        }
    }
}

/// Sink for composite events
#[cfg_attr(test, automock)]
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Record `event` against the composite referenced by `composite`
    async fn publish(&self, composite: &ObjectReference, event: CompositeEvent);
}

/// Records events through the API server
pub struct KubeEventPublisher {
    recorder: Recorder,
}

impl KubeEventPublisher {
    /// Report as `controller_name`, with the pod's hostname as the instance
    pub fn new(client: Client, controller_name: &str) -> Self {
        let reporter = Reporter {
            controller: controller_name.to_string(),
            instance: std::env::var("HOSTNAME").ok(),
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventPublisher for KubeEventPublisher {
    async fn publish(&self, composite: &ObjectReference, event: CompositeEvent) {
        let recorded = Event {
            type_: if event.is_warning() {
                EventType::Warning
            } else {
                EventType::Normal
            },
            reason: event.reason().to_string(),
            note: Some(event.note()),
            action: event.action().to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&recorded, composite).await {
            warn!(reason = event.reason(), error = %e, "Failed to record composite event");
        }
    }
}

/// Event reasons
pub mod reasons {
    /// A component's unit succeeded
    pub const COMPONENT_SUCCEEDED: &str = "ComponentSucceeded";
    /// A component could not be deployed
    pub const COMPONENT_FAILED: &str = "ComponentFailed";
    /// Every component was deployed
    pub const COMPOSITE_SUCCEEDED: &str = "CompositeSucceeded";
    /// The composite stopped at a failed component
    pub const COMPOSITE_FAILED: &str = "CompositeFailed";
}

/// Event actions
pub mod actions {
    /// One component
    pub const DEPLOY: &str = "Deploy";
    /// The whole composite
    pub const RECONCILE: &str = "Reconcile";
}
