//! Supporting types for the EntandoCompositeApp CRD

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Database vendor a deployment should use
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DbmsVendor {
    /// No database
    None,
    /// Embedded database inside the deployment
    Embedded,
    /// PostgreSQL
    Postgresql,
    /// MySQL
    Mysql,
    /// Oracle
    Oracle,
}

impl std::fmt::Display for DbmsVendor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Embedded => write!(f, "embedded"),
            Self::Postgresql => write!(f, "postgresql"),
            Self::Mysql => write!(f, "mysql"),
            Self::Oracle => write!(f, "oracle"),
        }
    }
}

/// Overall phase of a composite deployment
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentPhase {
    /// Components are still being processed
    #[default]
    Started,
    /// Every component's execution unit succeeded
    Successful,
    /// A component failed; remaining components were skipped
    Failed,
}

impl std::fmt::Display for DeploymentPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Started => write!(f, "started"),
            Self::Successful => write!(f, "successful"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Phase of an execution unit (pod), as reported by the kubelet
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum UnitPhase {
    /// Accepted but not yet running
    #[default]
    Pending,
    /// At least one container is running
    Running,
    /// All containers terminated successfully
    Succeeded,
    /// At least one container terminated in failure
    Failed,
    /// State could not be obtained
    Unknown,
}

impl UnitPhase {
    /// Parse a pod status phase; missing or unrecognised values are `Unknown`
    pub fn from_pod_phase(phase: Option<&str>) -> Self {
        match phase {
            Some("Pending") => Self::Pending,
            Some("Running") => Self::Running,
            Some("Succeeded") => Self::Succeeded,
            Some("Failed") => Self::Failed,
            _ => Self::Unknown,
        }
    }

    /// Succeeded and Failed never change once reached
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    /// Returns true for the Failed phase
    pub fn has_failed(&self) -> bool {
        matches!(self, Self::Failed)
    }
}

impl std::fmt::Display for UnitPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::Running => write!(f, "Running"),
            Self::Succeeded => write!(f, "Succeeded"),
            Self::Failed => write!(f, "Failed"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// One-shot instruction attached to a component as an annotation
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ProcessingInstruction {
    /// Process normally
    #[default]
    None,
    /// Leave the resource to the composite; the marker is consumed on success
    Defer,
}

impl ProcessingInstruction {
    /// Read the instruction from a resource's annotations
    pub fn from_annotations(annotations: Option<&BTreeMap<String, String>>) -> Self {
        annotations
            .and_then(|a| a.get(crate::PROCESSING_INSTRUCTION_ANNOTATION))
            .map(|v| {
                if v.trim().eq_ignore_ascii_case("defer") {
                    Self::Defer
                } else {
                    Self::None
                }
            })
            .unwrap_or_default()
    }
}

/// Action a delegated controller is asked to perform
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ResourceAction {
    /// Resource was created
    #[default]
    Added,
    /// Resource was updated
    Modified,
    /// Resource was removed
    Deleted,
}

impl ResourceAction {
    /// Upper-case wire name passed to delegated controllers
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Added => "ADDED",
            Self::Modified => "MODIFIED",
            Self::Deleted => "DELETED",
        }
    }
}

impl std::str::FromStr for ResourceAction {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "ADDED" => Ok(Self::Added),
            "MODIFIED" => Ok(Self::Modified),
            "DELETED" => Ok(Self::Deleted),
            _ => Err(crate::Error::validation(format!(
                "invalid resource action: {s}, expected one of: ADDED, MODIFIED, DELETED"
            ))),
        }
    }
}

impl std::fmt::Display for ResourceAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// (kind, namespace, name) identity of a deployable resource
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceIdentity {
    /// Resource kind (e.g. `EntandoPlugin`)
    pub kind: String,
    /// Resource namespace
    pub namespace: String,
    /// Resource name
    pub name: String,
}

impl ResourceIdentity {
    /// Create a new identity
    pub fn new(
        kind: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            kind: kind.into(),
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Labels stamped on every execution unit for this identity
    pub fn unit_labels(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (crate::RESOURCE_KIND_LABEL.to_string(), self.kind.clone()),
            (
                crate::RESOURCE_NAMESPACE_LABEL.to_string(),
                self.namespace.clone(),
            ),
            (self.kind.clone(), self.name.clone()),
        ])
    }

    /// Label selector matching every execution unit for this identity
    pub fn unit_selector(&self) -> String {
        self.unit_labels()
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Recover an identity from execution unit labels
    pub fn from_unit_labels(labels: &BTreeMap<String, String>) -> Option<Self> {
        let kind = labels.get(crate::RESOURCE_KIND_LABEL)?;
        let namespace = labels.get(crate::RESOURCE_NAMESPACE_LABEL)?;
        let name = labels.get(kind)?;
        Some(Self::new(kind, namespace, name))
    }
}

impl std::fmt::Display for ResourceIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}/{}", self.kind, self.namespace, self.name)
    }
}
