//! Component identity resolution
//!
//! Classifies each component as inline or reference and computes the
//! (kind, namespace, name) of the resource it ultimately deploys. Kinds are
//! checked against the static registry here, so an unsupported kind stops the
//! composite before anything is written.

use crate::crd::{
    Component, ComponentKind, InlineComponent, ReferenceComponent, ResourceIdentity,
};
use crate::Error;

/// A component together with its resolved kind and identity
#[derive(Clone, Debug, PartialEq)]
pub struct ResolvedComponent {
    /// The component as declared
    pub variant: Component,
    /// Registry kind of the deployed resource
    pub kind: ComponentKind,
    /// Identity of the deployed resource
    pub identity: ResourceIdentity,
}

impl ResolvedComponent {
    /// True for components that point at an existing resource
    pub fn is_reference(&self) -> bool {
        matches!(self.variant, Component::Reference(_))
    }

    /// The inline definition, if this is an inline component
    pub fn inline(&self) -> Option<&InlineComponent> {
        match &self.variant {
            Component::Inline(inline) => Some(inline),
            Component::Reference(_) => None,
        }
    }
}

/// Resolve a component against the registry.
///
/// Namespaces default to the composite's namespace for both variants.
pub fn resolve(component: &Component, composite_namespace: &str) -> Result<ResolvedComponent, Error> {
    let (kind, namespace, name) = match component {
        Component::Inline(inline) => {
            let name = inline
                .metadata
                .name
                .clone()
                .filter(|n| !n.is_empty())
                .ok_or_else(|| {
                    Error::validation(format!("inline {} component has no name", inline.kind))
                })?;
            let namespace = inline
                .metadata
                .namespace
                .clone()
                .unwrap_or_else(|| composite_namespace.to_string());
            (lookup(&inline.kind)?, namespace, name)
        }
        Component::Reference(ReferenceComponent {
            target_kind,
            target_namespace,
            target_name,
            ..
        }) => {
            if target_name.is_empty() {
                return Err(Error::validation(format!(
                    "reference to {target_kind} has an empty target name"
                )));
            }
            let namespace = target_namespace
                .clone()
                .filter(|n| !n.is_empty())
                .unwrap_or_else(|| composite_namespace.to_string());
            (lookup(target_kind)?, namespace, target_name.clone())
        }
    };

    Ok(ResolvedComponent {
        variant: component.clone(),
        kind,
        identity: ResourceIdentity::new(kind.kind_str(), namespace, name),
    })
}

fn lookup(kind: &str) -> Result<ComponentKind, Error> {
    ComponentKind::from_kind_str(kind).ok_or_else(|| Error::unsupported_kind(kind))
}
