//! Error types for the composite application controller
//!
//! Errors carry the identity of the component they concern (rendered as
//! `Kind namespace/name`) so a failed reconciliation can be traced back to
//! the component that stopped it.

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for composite reconciliation
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// A component or reference names a kind missing from the kind registry
    #[error("unsupported component kind '{kind}'")]
    UnsupportedKind {
        /// The kind string that failed to resolve
        kind: String,
    },

    /// No controller image is registered for a kind
    #[error("no controller image registered for kind '{kind}'")]
    UnresolvedImage {
        /// The kind without an image mapping
        kind: String,
    },

    /// The execution unit for a component reached the Failed phase
    #[error("execution unit {unit} for {identity} failed")]
    ComponentExecutionFailed {
        /// Identity of the component (`Kind namespace/name`)
        identity: String,
        /// Name of the failed execution unit
        unit: String,
    },

    /// The completion rendezvous was violated or timed out
    #[error("synchronization fault for {identity}: {message}")]
    SynchronizationFault {
        /// Identity of the component whose waiter faulted
        identity: String,
        /// What went wrong
        message: String,
    },

    /// A referenced resource does not exist
    #[error("{identity} not found")]
    NotFound {
        /// Identity of the missing resource
        identity: String,
    },

    /// Invalid composite or component definition
    #[error("validation error: {message}")]
    Validation {
        /// Description of what's invalid
        message: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
    },

    /// A component failed; wraps the underlying cause with its identity
    #[error("unexpected failure while adding {identity}: {source}")]
    Component {
        /// Identity of the failing component (`Kind namespace/name`)
        identity: String,
        /// The underlying cause
        #[source]
        source: Box<Error>,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Where the error occurred (e.g. "watcher", "status")
        context: String,
    },
}

impl Error {
    /// Create an unsupported kind error
    pub fn unsupported_kind(kind: impl Into<String>) -> Self {
        Self::UnsupportedKind { kind: kind.into() }
    }

    /// Create an unresolved image error
    pub fn unresolved_image(kind: impl Into<String>) -> Self {
        Self::UnresolvedImage { kind: kind.into() }
    }

    /// Create an execution failure for a component's unit
    pub fn execution_failed(identity: impl Into<String>, unit: impl Into<String>) -> Self {
        Self::ComponentExecutionFailed {
            identity: identity.into(),
            unit: unit.into(),
        }
    }

    /// Create a synchronization fault for a component's waiter
    pub fn synchronization(identity: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::SynchronizationFault {
            identity: identity.into(),
            message: msg.into(),
        }
    }

    /// Create a not-found error for a resource identity
    pub fn not_found(identity: impl Into<String>) -> Self {
        Self::NotFound {
            identity: identity.into(),
        }
    }

    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Wrap an error with the identity of the component it stopped.
    ///
    /// Already-wrapped errors are returned unchanged so the identity is
    /// attached exactly once.
    pub fn component(identity: impl Into<String>, source: Error) -> Self {
        match source {
            already @ Self::Component { .. } => already,
            source => Self::Component {
                identity: identity.into(),
                source: Box::new(source),
            },
        }
    }

    /// Identity of the component this error concerns, if known
    pub fn identity(&self) -> Option<&str> {
        match self {
            Error::ComponentExecutionFailed { identity, .. } => Some(identity),
            Error::SynchronizationFault { identity, .. } => Some(identity),
            Error::NotFound { identity } => Some(identity),
            Error::Component { identity, .. } => Some(identity),
            _ => None,
        }
    }

    /// Returns true if the error means a delegated unit reported failure
    pub fn is_execution_failure(&self) -> bool {
        match self {
            Error::ComponentExecutionFailed { .. } => true,
            Error::Component { source, .. } => source.is_execution_failure(),
            _ => false,
        }
    }

    /// Check if this error is worth retrying at the store level
    ///
    /// Only transient Kubernetes errors qualify; 4xx responses and everything
    /// produced by this crate's own logic are final.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => !matches!(
                source,
                kube::Error::Api(ae) if (400..500).contains(&ae.code)
            ),
            Error::Internal { .. } => true,
            _ => false,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::serialization(e.to_string())
    }
}
