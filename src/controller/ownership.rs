//! Ownership of inline components
//!
//! Inline components belong to the composite: they get the composite's
//! namespace when they have none, and a single controller owner reference to
//! the composite so they are removed with it. Referenced resources are never
//! passed through here.

use kube::Resource;

use crate::crd::{EntandoCompositeApp, TypedComponent};
use crate::Error;

/// Stamp namespace and owner reference on an inline component
pub fn assign_ownership(
    composite: &EntandoCompositeApp,
    mut component: TypedComponent,
) -> Result<TypedComponent, Error> {
    let owner = composite.controller_owner_ref(&()).ok_or_else(|| {
        Error::validation(format!(
            "EntandoCompositeApp {} has no uid; it must be read from the cluster before deploying",
            composite.metadata.name.as_deref().unwrap_or("<unnamed>")
        ))
    })?;

    if component.metadata.namespace.is_none() {
        component.metadata.namespace = composite.metadata.namespace.clone();
    }
    component.metadata.owner_references = Some(vec![owner]);
    Ok(component)
}
