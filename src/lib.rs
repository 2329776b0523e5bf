//! Composite application controller
//!
//! Deploys an `EntandoCompositeApp` by walking its component list in order and
//! delegating each component to a short-lived controller pod. Every pod is
//! awaited until it reaches a terminal phase before the next component starts,
//! and the per-component outcome is written back to the composite's status.
//!
//! # Modules
//!
//! - [`crd`] - The `EntandoCompositeApp` CRD, component entries and typed component specs
//! - [`controller`] - Identity resolution, overrides, ownership, images, status and the orchestrator
//! - [`executor`] - Execution units (controller pods) and the completion watcher
//! - [`config`] - Explicit controller configuration
//! - [`events`] - Kubernetes Event publishing
//! - [`retry`] - Bounded retries with backoff for store writes
//! - [`error`] - Error types

#![deny(missing_docs)]

pub mod config;
pub mod controller;
pub mod crd;
pub mod error;
pub mod events;
pub mod executor;
pub mod retry;

#[cfg(test)]
pub(crate) mod testing;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Labels and annotations shared with the delegated controllers
// =============================================================================

/// Label carrying the kind of the resource an execution unit deploys
pub const RESOURCE_KIND_LABEL: &str = "EntandoResourceKind";

/// Label carrying the namespace of the resource an execution unit deploys
pub const RESOURCE_NAMESPACE_LABEL: &str = "EntandoResourceNamespace";

/// Annotation holding a one-shot processing instruction (e.g. `defer`)
pub const PROCESSING_INSTRUCTION_ANNOTATION: &str = "entando.org/processing-instruction";

/// Field manager used for server-side apply and status patches
pub const FIELD_MANAGER: &str = "entando-composite-app-controller";

/// Environment variable naming the action the delegated controller performs
pub const ENV_RESOURCE_ACTION: &str = "ENTANDO_RESOURCE_ACTION";

/// Environment variable naming the namespace of the resource to process
pub const ENV_RESOURCE_NAMESPACE: &str = "ENTANDO_RESOURCE_NAMESPACE";

/// Environment variable naming the resource to process
pub const ENV_RESOURCE_NAME: &str = "ENTANDO_RESOURCE_NAME";
