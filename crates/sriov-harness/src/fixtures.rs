//! Object builders shared by unit tests

use std::collections::BTreeMap;
use std::sync::Arc;

use k8s_openapi::api::apps::v1::DaemonSet;
use k8s_openapi::api::core::v1::{
    Namespace, Node, NodeCondition, NodeStatus, Pod, PodStatus,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::api::{DynamicObject, ObjectMeta};
use kube::ResourceExt;
use sriov_common::crd::{
    InterfaceStatus, MachineConfigPool, MachineConfigPoolStatus, NetworkAttachmentDefinition,
    PoolCondition, SriovNetwork, SriovNetworkNodePolicy, SriovNetworkNodeState,
    SriovNetworkNodeStateStatus,
};
use sriov_common::kube_utils::{from_dynamic, to_dynamic, HOSTNAME_LABEL};
use sriov_common::HarnessConfig;

use crate::store::{Effect, MemoryStore, ResourceKind, ResourceRef};

pub const WORKER_LABEL: &str = "node-role.kubernetes.io/worker";

pub fn meta(name: &str, namespace: Option<&str>) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: namespace.map(str::to_string),
        ..Default::default()
    }
}

pub fn node(name: &str, conditions: &[(&str, &str)]) -> Node {
    let mut labels = BTreeMap::new();
    labels.insert(WORKER_LABEL.to_string(), String::new());
    labels.insert(HOSTNAME_LABEL.to_string(), name.to_string());
    Node {
        metadata: ObjectMeta {
            labels: Some(labels),
            ..meta(name, None)
        },
        status: Some(NodeStatus {
            conditions: Some(
                conditions
                    .iter()
                    .map(|(t, s)| NodeCondition {
                        type_: t.to_string(),
                        status: s.to_string(),
                        ..Default::default()
                    })
                    .collect(),
            ),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn ready_node(name: &str) -> Node {
    node(
        name,
        &[
            ("Ready", "True"),
            ("MemoryPressure", "False"),
            ("DiskPressure", "False"),
        ],
    )
}

pub fn with_allocatable(mut node: Node, key: &str, qty: &str) -> Node {
    let status = node.status.get_or_insert_with(Default::default);
    status
        .allocatable
        .get_or_insert_with(Default::default)
        .insert(key.to_string(), Quantity(qty.to_string()));
    node
}

pub fn with_capacity(mut node: Node, key: &str, qty: &str) -> Node {
    let status = node.status.get_or_insert_with(Default::default);
    status
        .capacity
        .get_or_insert_with(Default::default)
        .insert(key.to_string(), Quantity(qty.to_string()));
    node
}

pub fn node_state(name: &str, ns: &str, sync: &str) -> SriovNetworkNodeState {
    let mut state = SriovNetworkNodeState::new(name, Default::default());
    state.metadata.namespace = Some(ns.to_string());
    state.status = Some(SriovNetworkNodeStateStatus {
        interfaces: vec![
            InterfaceStatus {
                name: "ens2f2".to_string(),
                vendor: Some("8086".to_string()),
                device_id: Some("1593".to_string()),
                ..Default::default()
            },
            InterfaceStatus {
                name: "ens5f0".to_string(),
                vendor: Some("8086".to_string()),
                device_id: Some("1572".to_string()),
                ..Default::default()
            },
        ],
        sync_status: Some(sync.to_string()),
        last_sync_error: None,
    });
    state
}

pub fn pool(name: &str, role: &str, conditions: &[(&str, &str)]) -> MachineConfigPool {
    let mut pool = MachineConfigPool::new(name, Default::default());
    pool.metadata.labels = Some(BTreeMap::from([(
        "machineconfiguration.openshift.io/role".to_string(),
        role.to_string(),
    )]));
    pool.status = Some(MachineConfigPoolStatus {
        conditions: conditions
            .iter()
            .map(|(t, s)| PoolCondition {
                type_: t.to_string(),
                status: s.to_string(),
                ..Default::default()
            })
            .collect(),
        ..Default::default()
    });
    pool
}

pub fn namespace(name: &str) -> Namespace {
    Namespace {
        metadata: meta(name, None),
        ..Default::default()
    }
}

pub fn pod(name: &str, ns: &str, phase: &str) -> Pod {
    Pod {
        metadata: meta(name, Some(ns)),
        status: Some(PodStatus {
            phase: Some(phase.to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn daemonset(name: &str, ns: &str) -> DaemonSet {
    DaemonSet {
        metadata: meta(name, Some(ns)),
        ..Default::default()
    }
}

pub fn attachment(name: &str, ns: &str) -> NetworkAttachmentDefinition {
    let mut nad = NetworkAttachmentDefinition::new(name, Default::default());
    nad.metadata.namespace = Some(ns.to_string());
    nad
}

pub fn policy(name: &str, ns: &str) -> SriovNetworkNodePolicy {
    let mut policy = SriovNetworkNodePolicy::new(name, Default::default());
    policy.metadata.namespace = Some(ns.to_string());
    policy.spec.resource_name = name.to_string();
    policy
}

pub fn network(name: &str, ns: &str, target_ns: Option<&str>) -> SriovNetwork {
    let mut net = SriovNetwork::new(name, Default::default());
    net.metadata.namespace = Some(ns.to_string());
    net.spec.network_namespace = target_ns.map(str::to_string);
    net
}

pub fn config() -> HarnessConfig {
    HarnessConfig {
        worker_selector: format!("{WORKER_LABEL}="),
        ..Default::default()
    }
}

/// Healthy cluster: ready workers, synced node states, updated worker pool
pub fn healthy_cluster(config: &HarnessConfig, workers: &[&str]) -> MemoryStore {
    let store = MemoryStore::new();
    let ns = &config.operator_namespace;
    for w in workers {
        store.insert_typed(ResourceKind::Node, &ready_node(w)).unwrap();
        store
            .insert_typed(ResourceKind::NodeState, &node_state(w, ns, "Succeeded"))
            .unwrap();
    }
    store
        .insert_typed(
            ResourceKind::MachineConfigPool,
            &pool("worker", "worker", &[("Updated", "True"), ("Degraded", "False")]),
        )
        .unwrap();
    store
}

/// Reactor emulating the operator: networks render attachments and delete them again
pub fn operator_renders_attachments(store: &MemoryStore, operator_ns: &str) {
    let default_ns = operator_ns.to_string();
    store.on_create(
        ResourceKind::Network,
        Arc::new(move |obj: &DynamicObject| {
            let Ok(net) = from_dynamic::<SriovNetwork>(obj) else {
                return Vec::new();
            };
            let nad = attachment(&net.name_any(), net.target_namespace(&default_ns));
            match to_dynamic(&nad) {
                Ok(nad) => vec![Effect::Upsert(ResourceKind::Attachment, nad)],
                Err(_) => Vec::new(),
            }
        }),
    );
    let default_ns = operator_ns.to_string();
    store.on_delete(
        ResourceKind::Network,
        Arc::new(move |obj: &DynamicObject| {
            let Ok(net) = from_dynamic::<SriovNetwork>(obj) else {
                return Vec::new();
            };
            vec![Effect::Remove(ResourceRef::namespaced(
                ResourceKind::Attachment,
                net.name_any(),
                net.target_namespace(&default_ns),
            ))]
        }),
    );
}
