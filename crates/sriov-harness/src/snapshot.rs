//! Cluster state snapshots and their diffs
//!
//! A snapshot records which policies and networks exist in the operator
//! namespace and the sync status of every node state. Two snapshots taken
//! around an operator removal and reinstall are diffed to prove the
//! reinstall preserved the configuration.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use kube::ResourceExt;
use serde::{Deserialize, Serialize};
use sriov_common::crd::{SriovNetworkNodeState, SYNC_STATUS_IN_PROGRESS, SYNC_STATUS_SUCCEEDED};
use sriov_common::kube_utils::from_dynamic;
use sriov_common::Result;
use tracing::info;

use crate::store::{ListScope, ResourceKind, ResourceStore};

/// Point-in-time view of SR-IOV configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    /// Node policy names
    pub policy_names: BTreeSet<String>,
    /// SriovNetwork names
    pub network_names: BTreeSet<String>,
    /// Sync status per node (empty when the node state has no status yet)
    pub node_sync_status: BTreeMap<String, String>,
    /// When the capture finished
    pub captured_at: DateTime<Utc>,
}

impl Snapshot {
    /// Snapshot from already collected parts, stamped now
    pub fn new(
        policy_names: impl IntoIterator<Item = String>,
        network_names: impl IntoIterator<Item = String>,
        node_sync_status: impl IntoIterator<Item = (String, String)>,
    ) -> Self {
        Self {
            policy_names: policy_names.into_iter().collect(),
            network_names: network_names.into_iter().collect(),
            node_sync_status: node_sync_status.into_iter().collect(),
            captured_at: Utc::now(),
        }
    }

    /// Every node state reports `Succeeded`; false when there are none
    pub fn all_nodes_succeeded(&self) -> bool {
        !self.node_sync_status.is_empty()
            && self
                .node_sync_status
                .values()
                .all(|s| s == SYNC_STATUS_SUCCEEDED)
    }

    /// Nodes that went from `Succeeded` in `before` to `InProgress` now
    ///
    /// With the operator removed nothing should be reconciling, so any node
    /// listed here points at a config daemon acting on its own.
    pub fn unexpected_reconciliation(&self, before: &Snapshot) -> Vec<String> {
        self.node_sync_status
            .iter()
            .filter(|(node, status)| {
                status.as_str() == SYNC_STATUS_IN_PROGRESS
                    && before
                        .node_sync_status
                        .get(*node)
                        .is_some_and(|s| s == SYNC_STATUS_SUCCEEDED)
            })
            .map(|(node, _)| node.clone())
            .collect()
    }

    /// Pretty JSON, for handing snapshots between processes
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse a snapshot written by [`Snapshot::to_json`]
    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}

/// One difference between two snapshots
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Change {
    /// Policy present only after
    PolicyAdded(String),
    /// Policy present only before
    PolicyRemoved(String),
    /// Network present only after
    NetworkAdded(String),
    /// Network present only before
    NetworkRemoved(String),
    /// Node state present only after
    NodeAdded {
        /// Node name
        node: String,
        /// Its sync status
        status: String,
    },
    /// Node state present only before
    NodeRemoved {
        /// Node name
        node: String,
        /// Its last sync status
        status: String,
    },
    /// Node present in both with a different sync status
    NodeStatusChanged {
        /// Node name
        node: String,
        /// Status before
        from: String,
        /// Status after
        to: String,
    },
}

impl Change {
    /// The change seen when the two snapshots are swapped
    pub fn inverse(&self) -> Change {
        match self {
            Self::PolicyAdded(n) => Self::PolicyRemoved(n.clone()),
            Self::PolicyRemoved(n) => Self::PolicyAdded(n.clone()),
            Self::NetworkAdded(n) => Self::NetworkRemoved(n.clone()),
            Self::NetworkRemoved(n) => Self::NetworkAdded(n.clone()),
            Self::NodeAdded { node, status } => Self::NodeRemoved {
                node: node.clone(),
                status: status.clone(),
            },
            Self::NodeRemoved { node, status } => Self::NodeAdded {
                node: node.clone(),
                status: status.clone(),
            },
            Self::NodeStatusChanged { node, from, to } => Self::NodeStatusChanged {
                node: node.clone(),
                from: to.clone(),
                to: from.clone(),
            },
        }
    }
}

impl fmt::Display for Change {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PolicyAdded(n) => write!(f, "Policy added: {n}"),
            Self::PolicyRemoved(n) => write!(f, "Policy removed: {n}"),
            Self::NetworkAdded(n) => write!(f, "Network added: {n}"),
            Self::NetworkRemoved(n) => write!(f, "Network removed: {n}"),
            Self::NodeAdded { node, status } => write!(f, "Node added: {node} ({status})"),
            Self::NodeRemoved { node, status } => write!(f, "Node removed: {node} ({status})"),
            Self::NodeStatusChanged { node, from, to } => {
                write!(f, "Node {node} status changed {from} -> {to}")
            }
        }
    }
}

/// Capture policies, networks and node states from `namespace`
///
/// Store errors fail the capture; a partial snapshot is never returned.
pub async fn capture(store: &dyn ResourceStore, namespace: &str) -> Result<Snapshot> {
    let scope = ListScope::namespace(namespace);
    let policies = store.list(ResourceKind::Policy, &scope).await?;
    let networks = store.list(ResourceKind::Network, &scope).await?;
    let states = store.list(ResourceKind::NodeState, &scope).await?;

    let mut node_sync_status = BTreeMap::new();
    for obj in &states {
        let state: SriovNetworkNodeState = from_dynamic(obj)?;
        let status = state.sync_status().unwrap_or_default().to_string();
        node_sync_status.insert(state.name_any(), status);
    }

    let snapshot = Snapshot::new(
        policies.iter().map(|o| o.name_any()),
        networks.iter().map(|o| o.name_any()),
        node_sync_status,
    );
    info!(
        namespace,
        policies = snapshot.policy_names.len(),
        networks = snapshot.network_names.len(),
        nodes = snapshot.node_sync_status.len(),
        "Captured snapshot"
    );
    Ok(snapshot)
}

fn set_changes(
    before: &BTreeSet<String>,
    after: &BTreeSet<String>,
    added: fn(String) -> Change,
    removed: fn(String) -> Change,
    out: &mut Vec<Change>,
) {
    for name in before.union(after) {
        match (before.contains(name), after.contains(name)) {
            (false, true) => out.push(added(name.clone())),
            (true, false) => out.push(removed(name.clone())),
            _ => {}
        }
    }
}

/// Differences from `before` to `after`: policies, then networks, then nodes, names sorted
pub fn diff(before: &Snapshot, after: &Snapshot) -> Vec<Change> {
    let mut changes = Vec::new();
    set_changes(
        &before.policy_names,
        &after.policy_names,
        Change::PolicyAdded,
        Change::PolicyRemoved,
        &mut changes,
    );
    set_changes(
        &before.network_names,
        &after.network_names,
        Change::NetworkAdded,
        Change::NetworkRemoved,
        &mut changes,
    );

    let nodes: BTreeSet<&String> = before
        .node_sync_status
        .keys()
        .chain(after.node_sync_status.keys())
        .collect();
    for node in nodes {
        match (before.node_sync_status.get(node), after.node_sync_status.get(node)) {
            (None, Some(status)) => changes.push(Change::NodeAdded {
                node: node.clone(),
                status: status.clone(),
            }),
            (Some(status), None) => changes.push(Change::NodeRemoved {
                node: node.clone(),
                status: status.clone(),
            }),
            (Some(from), Some(to)) if from != to => changes.push(Change::NodeStatusChanged {
                node: node.clone(),
                from: from.clone(),
                to: to.clone(),
            }),
            _ => {}
        }
    }
    changes
}
