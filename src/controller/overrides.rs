//! Composite-level override values
//!
//! Applies the composite's dbms, ingress hostname and TLS secret overrides to
//! inline components that expose [`IngressingDeployment`]. Values the
//! component already sets explicitly are never replaced.

use crate::crd::{CompositeOverrides, IngressingDeployment, TypedComponent};

/// Apply `overrides` to `component` where the component leaves a field unset
pub fn apply_overrides(overrides: &CompositeOverrides, mut component: TypedComponent) -> TypedComponent {
    if overrides.is_empty() {
        return component;
    }
    if let Some(deployment) = component.as_ingressing_mut() {
        merge(overrides, deployment);
    }
    component
}

fn merge(overrides: &CompositeOverrides, deployment: &mut dyn IngressingDeployment) {
    if let Some(dbms) = overrides.dbms.filter(|_| deployment.dbms().is_none()) {
        deployment.set_dbms(dbms);
    }
    if deployment.ingress_host_name().is_none() {
        if let Some(host) = &overrides.ingress_host_name {
            deployment.set_ingress_host_name(host.clone());
        }
    }
    if deployment.tls_secret_name().is_none() {
        if let Some(secret) = &overrides.tls_secret_name {
            deployment.set_tls_secret_name(secret.clone());
        }
    }
}
