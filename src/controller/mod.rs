//! Composite reconciliation
//!
//! The orchestrator in [`composite`] drives one `EntandoCompositeApp` through
//! its components. The other modules are the steps it applies to each
//! component: identity resolution, overrides, ownership, image selection,
//! storage and status aggregation.

pub mod composite;
pub mod identity;
pub mod image;
pub mod overrides;
pub mod ownership;
pub mod status;
pub mod store;

pub use composite::{
    deploy_composite, Context, ContextBuilder, Orchestrator, OrchestratorState, CONTROLLER_NAME,
};
pub use identity::{resolve, ResolvedComponent};
pub use image::{related_image_variable, ImageConfig, ImageOverride, ImageResolver};
pub use overrides::apply_overrides;
pub use ownership::assign_ownership;
pub use status::StatusAggregator;
pub use store::{status_patch, ComponentStore, KubeComponentStore};
