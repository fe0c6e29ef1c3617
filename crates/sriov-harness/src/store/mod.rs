//! Resource store abstraction
//!
//! Every component reads and writes cluster objects through [`ResourceStore`],
//! so scenarios run against a live API server ([`KubeStore`]) or an in-process
//! fake ([`MemoryStore`]) without change. Objects travel as kube
//! [`DynamicObject`]s and are decoded into typed resources at the edges with
//! [`sriov_common::kube_utils::from_dynamic`].

mod kube_store;
mod memory;

use std::fmt;

use async_trait::async_trait;
use k8s_openapi::api::admissionregistration::v1::{
    MutatingWebhookConfiguration, ValidatingWebhookConfiguration,
};
use k8s_openapi::api::apps::v1::DaemonSet;
use k8s_openapi::api::core::v1::{Namespace, Node, Pod};
use kube::api::{ApiResource, DynamicObject};
#[cfg(test)]
use mockall::automock;
use sriov_common::crd::{
    MachineConfigPool, NetworkAttachmentDefinition, SriovNetwork, SriovNetworkNodePolicy,
    SriovNetworkNodeState,
};
use sriov_common::Result;

pub use kube_store::KubeStore;
pub use memory::{Effect, MemoryStore, ObjectReactor, StoreOp};

/// Object kinds the harness touches
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    /// core/v1 Node
    Node,
    /// core/v1 Namespace
    Namespace,
    /// core/v1 Pod
    Pod,
    /// apps/v1 DaemonSet
    DaemonSet,
    /// admissionregistration/v1 MutatingWebhookConfiguration
    MutatingWebhook,
    /// admissionregistration/v1 ValidatingWebhookConfiguration
    ValidatingWebhook,
    /// SriovNetworkNodePolicy
    Policy,
    /// SriovNetwork
    Network,
    /// SriovNetworkNodeState
    NodeState,
    /// NetworkAttachmentDefinition
    Attachment,
    /// MachineConfigPool
    MachineConfigPool,
}

impl ResourceKind {
    /// API group/version/plural for dynamic API calls
    pub fn api_resource(self) -> ApiResource {
        match self {
            Self::Node => ApiResource::erase::<Node>(&()),
            Self::Namespace => ApiResource::erase::<Namespace>(&()),
            Self::Pod => ApiResource::erase::<Pod>(&()),
            Self::DaemonSet => ApiResource::erase::<DaemonSet>(&()),
            Self::MutatingWebhook => ApiResource::erase::<MutatingWebhookConfiguration>(&()),
            Self::ValidatingWebhook => ApiResource::erase::<ValidatingWebhookConfiguration>(&()),
            Self::Policy => ApiResource::erase::<SriovNetworkNodePolicy>(&()),
            Self::Network => ApiResource::erase::<SriovNetwork>(&()),
            Self::NodeState => ApiResource::erase::<SriovNetworkNodeState>(&()),
            Self::Attachment => ApiResource::erase::<NetworkAttachmentDefinition>(&()),
            Self::MachineConfigPool => ApiResource::erase::<MachineConfigPool>(&()),
        }
    }

    /// Whether objects of this kind live in a namespace
    pub fn is_namespaced(self) -> bool {
        !matches!(
            self,
            Self::Node
                | Self::Namespace
                | Self::MutatingWebhook
                | Self::ValidatingWebhook
                | Self::MachineConfigPool
        )
    }

    /// Kubernetes kind name
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Node => "Node",
            Self::Namespace => "Namespace",
            Self::Pod => "Pod",
            Self::DaemonSet => "DaemonSet",
            Self::MutatingWebhook => "MutatingWebhookConfiguration",
            Self::ValidatingWebhook => "ValidatingWebhookConfiguration",
            Self::Policy => "SriovNetworkNodePolicy",
            Self::Network => "SriovNetwork",
            Self::NodeState => "SriovNetworkNodeState",
            Self::Attachment => "NetworkAttachmentDefinition",
            Self::MachineConfigPool => "MachineConfigPool",
        }
    }

    /// Parse a kind name or common short name (case-insensitive)
    pub fn parse(name: &str) -> Option<Self> {
        let kind = match name.to_ascii_lowercase().as_str() {
            "node" | "nodes" => Self::Node,
            "namespace" | "namespaces" | "ns" => Self::Namespace,
            "pod" | "pods" => Self::Pod,
            "daemonset" | "daemonsets" | "ds" => Self::DaemonSet,
            "mutatingwebhookconfiguration" | "mutatingwebhook" => Self::MutatingWebhook,
            "validatingwebhookconfiguration" | "validatingwebhook" => Self::ValidatingWebhook,
            "sriovnetworknodepolicy" | "policy" => Self::Policy,
            "sriovnetwork" | "network" => Self::Network,
            "sriovnetworknodestate" | "nodestate" => Self::NodeState,
            "networkattachmentdefinition" | "net-attach-def" | "nad" => Self::Attachment,
            "machineconfigpool" | "mcp" => Self::MachineConfigPool,
            _ => return None,
        };
        Some(kind)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of one object; never cached, always fetched fresh
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ResourceRef {
    /// Object kind
    pub kind: ResourceKind,
    /// Object name
    pub name: String,
    /// Namespace, None for cluster-scoped kinds
    pub namespace: Option<String>,
}

impl ResourceRef {
    /// Reference to a namespaced object
    pub fn namespaced(
        kind: ResourceKind,
        name: impl Into<String>,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            name: name.into(),
            namespace: Some(namespace.into()),
        }
    }

    /// Reference to a cluster-scoped object
    pub fn cluster(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            namespace: None,
        }
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{} {}/{}", self.kind, ns, self.name),
            None => write!(f, "{} {}", self.kind, self.name),
        }
    }
}

/// Filters for a list call
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ListScope {
    /// Restrict to one namespace (ignored for cluster-scoped kinds)
    pub namespace: Option<String>,
    /// Equality-based label selector
    pub selector: Option<String>,
}

impl ListScope {
    /// All objects of the kind
    pub fn all() -> Self {
        Self::default()
    }

    /// Objects in one namespace
    pub fn namespace(ns: impl Into<String>) -> Self {
        Self {
            namespace: Some(ns.into()),
            selector: None,
        }
    }

    /// Restrict to objects matching a label selector
    pub fn with_selector(mut self, selector: impl Into<String>) -> Self {
        let selector = selector.into();
        self.selector = (!selector.is_empty()).then_some(selector);
        self
    }
}

/// How a delete is issued
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DeleteMode {
    /// Default grace period and propagation
    #[default]
    Normal,
    /// Zero grace period with foreground propagation
    ///
    /// The object stays visible (with a deletion timestamp) until its
    /// dependents are collected, so callers must keep polling for absence.
    Force,
}

/// Generic access to cluster objects
///
/// Errors are [`sriov_common::Error::Store`] values classified by
/// [`sriov_common::StoreErrorKind`].
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// List objects of a kind
    async fn list(&self, kind: ResourceKind, scope: &ListScope) -> Result<Vec<DynamicObject>>;

    /// Fetch one object
    async fn get(&self, reference: &ResourceRef) -> Result<DynamicObject>;

    /// Create an object; the namespace is taken from its metadata
    async fn create(&self, kind: ResourceKind, object: &DynamicObject) -> Result<DynamicObject>;

    /// Replace an existing object
    async fn update(&self, kind: ResourceKind, object: &DynamicObject) -> Result<DynamicObject>;

    /// Delete an object
    async fn delete(&self, reference: &ResourceRef, mode: DeleteMode) -> Result<()>;
}

/// Fetch an object, mapping NotFound to `None`
pub async fn get_opt(
    store: &dyn ResourceStore,
    reference: &ResourceRef,
) -> Result<Option<DynamicObject>> {
    match store.get(reference).await {
        Ok(obj) => Ok(Some(obj)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}
