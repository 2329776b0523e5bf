//! Custom Resource Definitions for the composite application controller
//!
//! The composite itself is the only CRD this controller serves. Component
//! kinds are served by other controllers and are only modelled as far as the
//! composite needs to deploy them.

mod component;
mod composite;
mod kind;
mod types;

pub use component::{
    AppPluginLinkSpec, AppSpec, Component, ComponentEntry, ComponentSpec, DatabaseServiceSpec,
    IngressingDeployment, InlineComponent, KeycloakServerSpec, PluginSpec, ReferenceComponent,
    ReferenceSpec, TypedComponent,
};
pub use composite::{
    ComponentStatus, CompositeOverrides, CompositeStatus, EntandoCompositeApp,
    EntandoCompositeAppSpec,
};
pub use kind::{ComponentKind, ENTANDO_GROUP, ENTANDO_VERSION, REFERENCE_KIND};
pub use types::{
    DbmsVendor, DeploymentPhase, ProcessingInstruction, ResourceAction, ResourceIdentity,
    UnitPhase,
};
