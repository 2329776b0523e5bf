//! EntandoCompositeApp Custom Resource Definition
//!
//! An EntandoCompositeApp bundles an ordered list of components. Each one is
//! either declared inline (and owned by the composite) or references a
//! resource that already exists. Components are deployed one after another
//! and the outcome of every deployer pod is recorded in the status.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::component::ComponentEntry;
use super::types::{DbmsVendor, DeploymentPhase, UnitPhase};

/// Specification for an EntandoCompositeApp
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "entando.org",
    version = "v1",
    kind = "EntandoCompositeApp",
    plural = "entandocompositeapps",
    shortname = "ecapps",
    status = "CompositeStatus",
    namespaced,
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct EntandoCompositeAppSpec {
    /// Components in deployment order
    #[serde(default)]
    pub components: Vec<ComponentEntry>,

    /// Database vendor for components that do not set one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dbms_override: Option<DbmsVendor>,

    /// Ingress hostname for components that do not set one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingress_host_name_override: Option<String>,

    /// TLS secret for components that do not set one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_secret_name_override: Option<String>,
}

impl EntandoCompositeAppSpec {
    /// Composite-level override values
    pub fn overrides(&self) -> CompositeOverrides {
        CompositeOverrides {
            dbms: self.dbms_override,
            ingress_host_name: self.ingress_host_name_override.clone(),
            tls_secret_name: self.tls_secret_name_override.clone(),
        }
    }
}

/// Override values propagated to ingress-capable inline components
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CompositeOverrides {
    /// Database vendor
    pub dbms: Option<DbmsVendor>,
    /// Ingress hostname
    pub ingress_host_name: Option<String>,
    /// TLS secret name
    pub tls_secret_name: Option<String>,
}

impl CompositeOverrides {
    /// Returns true if no override is set
    pub fn is_empty(&self) -> bool {
        self.dbms.is_none() && self.ingress_host_name.is_none() && self.tls_secret_name.is_none()
    }
}

/// Outcome of one component's deployer pods
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ComponentStatus {
    /// Latest terminal phase observed for the component
    #[serde(default)]
    pub phase: UnitPhase,

    /// Terminal phase of every deployer pod, keyed by pod name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub unit_phases: BTreeMap<String, UnitPhase>,
}

/// Status for an EntandoCompositeApp
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CompositeStatus {
    /// Overall phase
    #[serde(default)]
    pub phase: DeploymentPhase,

    /// Per-component outcome, keyed by the deployed resource's name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub components: BTreeMap<String, ComponentStatus>,

    /// Generation this status was computed for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Human-readable message about the current state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl CompositeStatus {
    /// Create a new status with the given phase
    pub fn with_phase(phase: DeploymentPhase) -> Self {
        Self {
            phase,
            ..Default::default()
        }
    }

    /// Set the message and return self for chaining
    pub fn message(mut self, msg: impl Into<String>) -> Self {
        self.message = Some(msg.into());
        self
    }

    /// Set the observed generation and return self for chaining
    pub fn observed_generation(mut self, generation: Option<i64>) -> Self {
        self.observed_generation = generation;
        self
    }

    /// Status recorded for a component, by resource name
    pub fn component(&self, name: &str) -> Option<&ComponentStatus> {
        self.components.get(name)
    }
}
