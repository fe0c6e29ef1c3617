//! Readiness predicates
//!
//! Boolean checks over cluster state, meant to be driven by
//! [`crate::poll::poll_until`]. Each predicate reads fresh state from the
//! store and returns:
//!
//! - `Ok(true)` when the state has converged
//! - `Ok(false)` when it has not yet, including when the store hiccuped
//! - `Err` only when waiting longer cannot help

use k8s_openapi::api::core::v1::{Node, Pod};
use kube::api::DynamicObject;
use kube::ResourceExt;
use sriov_common::crd::{
    MachineConfigPool, SriovNetworkNodeState, CONDITION_DEGRADED, CONDITION_UPDATED,
};
use sriov_common::kube_utils::{
    from_dynamic, has_condition, parse_quantity, HasConditionFields, LabelSelector,
    CONDITION_DISK_PRESSURE, CONDITION_MEMORY_PRESSURE, CONDITION_READY, STATUS_TRUE,
    STATUS_UNKNOWN,
};
use sriov_common::{Error, HarnessConfig, Result};
use tracing::{debug, info};

use crate::store::{ListScope, ResourceKind, ResourceRef, ResourceStore};

/// Condition reasons that mark a node as unstable whatever the condition status
pub const UNSTABLE_REASONS: [&str; 3] = ["NodeNotReady", "Rebooting", "KernelDeadlock"];

/// DaemonSets deployed by the operator
pub const OPERATOR_DAEMONSETS: [&str; 2] = ["sriov-network-config-daemon", "sriov-device-plugin"];
/// Mutating webhook configurations installed by the operator
pub const OPERATOR_MUTATING_WEBHOOKS: [&str; 2] = [
    "network-resources-injector-config",
    "sriov-operator-webhook-config",
];
/// Validating webhook configurations installed by the operator
pub const OPERATOR_VALIDATING_WEBHOOKS: [&str; 1] = ["sriov-operator-webhook-config"];

/// Turn a transient store failure into "not yet"
fn tolerate<T>(what: &str, result: Result<T>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_transient() => {
            debug!(what, error = %e, "Transient store error, will retry");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

fn decode_all<K>(objects: &[DynamicObject]) -> Result<Vec<K>>
where
    K: kube::Resource<DynamicType = ()> + serde::de::DeserializeOwned,
{
    objects.iter().map(from_dynamic).collect()
}

/// Why a node is unstable, or `None` when it is healthy
pub fn node_instability(node: &Node) -> Option<String> {
    let conditions = node
        .status
        .as_ref()
        .and_then(|s| s.conditions.as_deref())
        .unwrap_or_default();

    let mut ready = false;
    for c in conditions {
        let reason = c.reason_field();
        if let Some(r) = UNSTABLE_REASONS.iter().find(|r| reason.contains(*r)) {
            return Some(format!("{} condition reports {}", c.type_, r));
        }
        match (c.type_.as_str(), c.status.as_str()) {
            (CONDITION_READY, STATUS_TRUE) => ready = true,
            (CONDITION_READY, STATUS_UNKNOWN) => {
                return Some("Ready is Unknown (unschedulable)".to_string())
            }
            (CONDITION_MEMORY_PRESSURE | CONDITION_DISK_PRESSURE, STATUS_TRUE) => {
                return Some(format!("{} is True", c.type_))
            }
            _ => {}
        }
    }
    (!ready).then(|| "not Ready".to_string())
}

/// Health of the worker fleet at one instant
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FleetReport {
    /// Workers matching the selector
    pub total: usize,
    /// `(node, reason)` for every unstable worker
    pub unstable: Vec<(String, String)>,
}

impl FleetReport {
    /// All-or-nothing readiness; an empty fleet is not ready
    pub fn is_ready(&self) -> bool {
        self.total > 0 && self.unstable.is_empty()
    }

    /// Human-readable summary of what is wrong
    pub fn summary(&self) -> String {
        if self.total == 0 {
            return "no worker nodes match the worker selector".to_string();
        }
        self.unstable
            .iter()
            .map(|(node, reason)| format!("{node}: {reason}"))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Evaluate every worker matching `worker_selector`
pub async fn fleet_report(
    store: &dyn ResourceStore,
    worker_selector: &str,
) -> Result<FleetReport> {
    let objects = store
        .list(ResourceKind::Node, &ListScope::all().with_selector(worker_selector))
        .await?;
    let nodes: Vec<Node> = decode_all(&objects)?;
    let unstable = nodes
        .iter()
        .filter_map(|n| node_instability(n).map(|reason| (n.name_any(), reason)))
        .collect();
    Ok(FleetReport {
        total: nodes.len(),
        unstable,
    })
}

/// Every worker is Ready and free of pressure or instability
pub async fn node_fleet_ready(store: &dyn ResourceStore, worker_selector: &str) -> Result<bool> {
    let Some(report) = tolerate("worker nodes", fleet_report(store, worker_selector).await)? else {
        return Ok(false);
    };
    if !report.is_ready() {
        debug!(problems = %report.summary(), "Worker fleet not ready");
    }
    Ok(report.is_ready())
}

/// Every node-state in the operator namespace reports `Succeeded`
pub async fn policy_sync_converged(
    store: &dyn ResourceStore,
    operator_namespace: &str,
) -> Result<bool> {
    let listed = store
        .list(ResourceKind::NodeState, &ListScope::namespace(operator_namespace))
        .await;
    let Some(objects) = tolerate("node states", listed)? else {
        return Ok(false);
    };
    if objects.is_empty() {
        debug!(namespace = operator_namespace, "No node states reported yet");
        return Ok(false);
    }
    let states: Vec<SriovNetworkNodeState> = decode_all(&objects)?;
    let pending: Vec<String> = states
        .iter()
        .filter(|s| !s.is_synced())
        .map(|s| format!("{}={}", s.name_any(), s.sync_status().unwrap_or("<none>")))
        .collect();
    if !pending.is_empty() {
        debug!(pending = %pending.join(", "), "Node states still syncing");
    }
    Ok(pending.is_empty())
}

/// Every matching MachineConfigPool is Updated and not Degraded
///
/// Clusters without MachineConfigPools (non-OpenShift) skip the check.
pub async fn pool_update_converged(
    store: &dyn ResourceStore,
    pool_selector: Option<&str>,
) -> Result<bool> {
    let objects = match store.list(ResourceKind::MachineConfigPool, &ListScope::all()).await {
        Ok(objects) => objects,
        Err(e) if e.is_kind_not_registered() => {
            info!("MachineConfigPool kind not served, skipping pool check");
            return Ok(true);
        }
        Err(e) if e.is_transient() => {
            debug!(error = %e, "Transient store error listing pools, will retry");
            return Ok(false);
        }
        Err(e) => return Err(e),
    };
    let selector = LabelSelector::parse(pool_selector.unwrap_or_default())?;
    let pools: Vec<MachineConfigPool> = decode_all(&objects)?;
    for pool in pools.iter().filter(|p| selector.matches(p.labels())) {
        let conditions = Some(pool.conditions());
        if has_condition(conditions, CONDITION_DEGRADED) {
            debug!(pool = %pool.name_any(), "Pool degraded");
            return Ok(false);
        }
        if !has_condition(conditions, CONDITION_UPDATED) {
            debug!(pool = %pool.name_any(), "Pool still updating");
            return Ok(false);
        }
    }
    Ok(true)
}

/// Policy sync, pool update and fleet readiness, evaluated in that order
pub async fn cluster_converged(store: &dyn ResourceStore, config: &HarnessConfig) -> Result<bool> {
    if !policy_sync_converged(store, &config.operator_namespace).await? {
        return Ok(false);
    }
    if !pool_update_converged(store, config.pool_selector.as_deref()).await? {
        return Ok(false);
    }
    node_fleet_ready(store, &config.worker_selector).await
}

/// Some worker advertises a positive allocatable amount of `resource_key`
///
/// Capacity without allocatable does not count. No workers at all is a
/// terminal error.
pub async fn capacity_available(
    store: &dyn ResourceStore,
    worker_selector: &str,
    resource_key: &str,
) -> Result<bool> {
    let listed = store
        .list(ResourceKind::Node, &ListScope::all().with_selector(worker_selector))
        .await;
    let Some(objects) = tolerate("worker nodes", listed)? else {
        return Ok(false);
    };
    if objects.is_empty() {
        return Err(Error::predicate(
            format!("allocatable {resource_key}"),
            format!("no worker nodes match {worker_selector}"),
        ));
    }
    let nodes: Vec<Node> = decode_all(&objects)?;
    let found = nodes.iter().find(|n| {
        n.status
            .as_ref()
            .and_then(|s| s.allocatable.as_ref())
            .and_then(|a| a.get(resource_key))
            .and_then(|q| parse_quantity(&q.0))
            .is_some_and(|count| count > 0)
    });
    if let Some(node) = found {
        debug!(node = %node.name_any(), resource = resource_key, "Allocatable VFs found");
    }
    Ok(found.is_some())
}

/// The referenced object exists
pub async fn resource_present(store: &dyn ResourceStore, reference: &ResourceRef) -> Result<bool> {
    match store.get(reference).await {
        Ok(_) => Ok(true),
        Err(e) if e.is_not_found() => Ok(false),
        Err(e) => tolerate::<()>(&reference.to_string(), Err(e)).map(|_| false),
    }
}

/// The referenced object is gone
pub async fn resource_absent(store: &dyn ResourceStore, reference: &ResourceRef) -> Result<bool> {
    match store.get(reference).await {
        Ok(_) => Ok(false),
        Err(e) if e.is_not_found() => Ok(true),
        Err(e) => tolerate::<()>(&reference.to_string(), Err(e)).map(|_| false),
    }
}

/// The named policy exists in the operator namespace
pub async fn policy_exists(store: &dyn ResourceStore, name: &str, namespace: &str) -> Result<bool> {
    let reference = ResourceRef::namespaced(ResourceKind::Policy, name, namespace);
    resource_present(store, &reference).await
}

/// The named attachment definition exists
pub async fn attachment_exists(
    store: &dyn ResourceStore,
    name: &str,
    namespace: &str,
) -> Result<bool> {
    let reference = ResourceRef::namespaced(ResourceKind::Attachment, name, namespace);
    resource_present(store, &reference).await
}

/// The named attachment definition is gone
pub async fn attachment_absent(
    store: &dyn ResourceStore,
    name: &str,
    namespace: &str,
) -> Result<bool> {
    let reference = ResourceRef::namespaced(ResourceKind::Attachment, name, namespace);
    resource_absent(store, &reference).await
}

async fn pod_phases(store: &dyn ResourceStore, namespace: &str) -> Result<Option<Vec<String>>> {
    let listed = store.list(ResourceKind::Pod, &ListScope::namespace(namespace)).await;
    let Some(objects) = tolerate("operator pods", listed)? else {
        return Ok(None);
    };
    let pods: Vec<Pod> = decode_all(&objects)?;
    Ok(Some(
        pods.iter()
            .map(|p| {
                p.status
                    .as_ref()
                    .and_then(|s| s.phase.clone())
                    .unwrap_or_default()
            })
            .collect(),
    ))
}

/// At least one operator pod is Running
pub async fn operator_pods_running(store: &dyn ResourceStore, namespace: &str) -> Result<bool> {
    Ok(pod_phases(store, namespace)
        .await?
        .is_some_and(|phases| phases.iter().any(|p| p == "Running")))
}

/// No operator pod is Running or Pending
pub async fn operator_pods_gone(store: &dyn ResourceStore, namespace: &str) -> Result<bool> {
    Ok(pod_phases(store, namespace)
        .await?
        .is_some_and(|phases| !phases.iter().any(|p| p == "Running" || p == "Pending")))
}

/// None of the named DaemonSets exist
pub async fn daemonsets_absent(
    store: &dyn ResourceStore,
    namespace: &str,
    names: &[&str],
) -> Result<bool> {
    for name in names {
        let reference = ResourceRef::namespaced(ResourceKind::DaemonSet, *name, namespace);
        if !resource_absent(store, &reference).await? {
            debug!(daemonset = name, "DaemonSet still present");
            return Ok(false);
        }
    }
    Ok(true)
}

/// None of the named webhook configurations exist
pub async fn webhooks_absent(
    store: &dyn ResourceStore,
    mutating: &[&str],
    validating: &[&str],
) -> Result<bool> {
    let refs = mutating
        .iter()
        .map(|n| ResourceRef::cluster(ResourceKind::MutatingWebhook, *n))
        .chain(
            validating
                .iter()
                .map(|n| ResourceRef::cluster(ResourceKind::ValidatingWebhook, *n)),
        );
    for reference in refs {
        if !resource_absent(store, &reference).await? {
            debug!(webhook = %reference, "Webhook configuration still present");
            return Ok(false);
        }
    }
    Ok(true)
}

/// Operator pods, DaemonSets and webhooks are all gone
pub async fn control_plane_removed(store: &dyn ResourceStore, namespace: &str) -> Result<bool> {
    Ok(operator_pods_gone(store, namespace).await?
        && daemonsets_absent(store, namespace, &OPERATOR_DAEMONSETS).await?
        && webhooks_absent(
            store,
            &OPERATOR_MUTATING_WEBHOOKS,
            &OPERATOR_VALIDATING_WEBHOOKS,
        )
        .await?)
}
