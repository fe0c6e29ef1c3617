//! Error types for the SR-IOV e2e harness
//!
//! Errors are structured with fields so a failed scenario names the resource,
//! the predicate and the deadline that was involved. Store errors carry a
//! [`StoreErrorKind`] so callers can tell transient API hiccups apart from
//! conditions that will never resolve by waiting.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Classification of a resource store failure
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StoreErrorKind {
    /// The referenced object does not exist
    NotFound,
    /// An object with the same identity already exists
    AlreadyExists,
    /// The API server does not serve this kind (CRD not installed, non-OpenShift cluster)
    KindNotRegistered,
    /// Retrying later may succeed (timeouts, throttling, 5xx)
    Transient,
    /// Retrying will not help (forbidden, invalid object)
    Terminal,
}

impl fmt::Display for StoreErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NotFound => "not found",
            Self::AlreadyExists => "already exists",
            Self::KindNotRegistered => "kind not registered",
            Self::Transient => "transient",
            Self::Terminal => "terminal",
        };
        f.write_str(s)
    }
}

/// Main error type for harness operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes client error outside of store operations (client construction, exec)
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Resource store operation failed
    #[error("store error ({kind}) on {resource}: {message}")]
    Store {
        /// Failure classification
        kind: StoreErrorKind,
        /// The resource the operation targeted (e.g. "Node worker-0")
        resource: String,
        /// Description of what failed
        message: String,
    },

    /// A readiness predicate never returned true before its deadline
    #[error("timed out after {timeout:?} waiting for {what}")]
    DeadlineExceeded {
        /// Description of the awaited state
        what: String,
        /// The deadline that elapsed
        timeout: Duration,
    },

    /// A wait was aborted through its cancellation token
    #[error("cancelled while waiting for {what}")]
    Cancelled {
        /// Description of the awaited state
        what: String,
    },

    /// A readiness predicate determined the state can never converge
    #[error("{what} cannot converge: {message}")]
    Predicate {
        /// Description of the awaited state
        what: String,
        /// Why waiting longer will not help
        message: String,
    },

    /// Invalid harness configuration
    #[error("configuration error: {message}")]
    Configuration {
        /// Description of what's invalid
        message: String,
        /// The environment variable or flag involved, if any
        variable: Option<String>,
    },

    /// The worker fleet was unstable before provisioning started
    #[error("worker fleet not ready: {message}")]
    FleetNotReady {
        /// Description of the unstable nodes
        message: String,
    },

    /// Every candidate worker target failed for a device
    #[error("no workable target for device {device}: {}", .attempts.join("; "))]
    NoWorkableTarget {
        /// Device name
        device: String,
        /// One reason per candidate tried, in order
        attempts: Vec<String>,
    },

    /// A resource could not be removed, even after a forced delete
    #[error("teardown of {resource} failed: {message}")]
    Teardown {
        /// The resource that is still present
        resource: String,
        /// Description of what failed
        message: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The resource kind being serialized (if known)
        kind: Option<String>,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g. "create_client", "runner")
        context: String,
    },
}

impl Error {
    /// Create a store error
    pub fn store(
        kind: StoreErrorKind,
        resource: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Store {
            kind,
            resource: resource.into(),
            message: msg.into(),
        }
    }

    /// Create a not-found store error
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::store(StoreErrorKind::NotFound, resource, "not found")
    }

    /// Create a deadline error for the described wait
    pub fn deadline(what: impl Into<String>, timeout: Duration) -> Self {
        Self::DeadlineExceeded {
            what: what.into(),
            timeout,
        }
    }

    /// Create a cancellation error for the described wait
    pub fn cancelled(what: impl Into<String>) -> Self {
        Self::Cancelled { what: what.into() }
    }

    /// Create a terminal predicate error
    pub fn predicate(what: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Predicate {
            what: what.into(),
            message: msg.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration {
            message: msg.into(),
            variable: None,
        }
    }

    /// Create a configuration error naming the offending variable
    pub fn configuration_for(variable: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Configuration {
            message: msg.into(),
            variable: Some(variable.into()),
        }
    }

    /// Create a fleet-not-ready error
    pub fn fleet_not_ready(msg: impl Into<String>) -> Self {
        Self::FleetNotReady {
            message: msg.into(),
        }
    }

    /// Create a teardown error
    pub fn teardown(resource: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Teardown {
            resource: resource.into(),
            message: msg.into(),
        }
    }

    /// Create a serialization error
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: None,
        }
    }

    /// Create a serialization error with the resource kind
    pub fn serialization_for(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Store classification, if this is a store error
    pub fn store_kind(&self) -> Option<StoreErrorKind> {
        match self {
            Self::Store { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Whether the store reported the object as missing
    pub fn is_not_found(&self) -> bool {
        self.store_kind() == Some(StoreErrorKind::NotFound)
    }

    /// Whether the store reported the kind as not served by the API server
    pub fn is_kind_not_registered(&self) -> bool {
        self.store_kind() == Some(StoreErrorKind::KindNotRegistered)
    }

    /// Whether the store reported a conflict on create
    pub fn is_already_exists(&self) -> bool {
        self.store_kind() == Some(StoreErrorKind::AlreadyExists)
    }

    /// Whether retrying the same call later may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Store { kind, .. } => *kind == StoreErrorKind::Transient,
            Self::Kube { source } => !matches!(source, kube::Error::Api(_)),
            _ => false,
        }
    }

    /// Whether a wait ran out of time
    pub fn is_deadline(&self) -> bool {
        matches!(self, Self::DeadlineExceeded { .. })
    }

    /// Whether a wait was cancelled
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// Whether this failure means "environment cannot run the scenario" rather than a defect
    pub fn is_skip(&self) -> bool {
        matches!(self, Self::NoWorkableTarget { .. })
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(err.to_string())
    }
}
