//! Dependency-ordered provisioning
//!
//! Brings up the chain a scenario needs: a node policy pinned to one worker,
//! fleet-wide convergence of that policy, a SriovNetwork, the attachment
//! definition the operator renders from it, and finally allocatable VFs.
//!
//! Steps run strictly in order and each is gated by its readiness predicate.
//! A failed step rolls back everything the attempt created (newest first)
//! and the plan is retried on the next worker. Only when every worker has
//! been tried does provisioning give up with [`Error::NoWorkableTarget`].
//!
//! ```text
//!  fleet check ─► pre-clean ─► for each worker:
//!                                policy ─► convergence ─► network ─► attachment ─► capacity
//!                                   └──────── rollback on failure, next worker ────────┘
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use k8s_openapi::api::core::v1::Node;
use kube::api::DynamicObject;
use kube::ResourceExt;
use sriov_common::crd::{
    DeviceType, NicSelector, SriovNetwork, SriovNetworkNodePolicy, SriovNetworkNodePolicySpec,
    SriovNetworkNodeState, SriovNetworkSpec, LINK_STATE_AUTO,
};
use sriov_common::kube_utils::{from_dynamic, to_dynamic, HOSTNAME_LABEL};
use sriov_common::retry::{retry_if, RetryConfig};
use sriov_common::{DeviceDescriptor, Error, HarnessConfig, Result};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cleanup::{CleanupAction, CleanupStack};
use crate::poll::{poll_until, ReadinessTarget};
use crate::predicates::{
    attachment_exists, capacity_available, cluster_converged, fleet_report, policy_exists,
};
use crate::store::{ListScope, ResourceKind, ResourceRef, ResourceStore};
use crate::teardown::Teardown;

/// Static IPAM; scenarios assign addresses per pod
const STATIC_IPAM: &str = r#"{"type":"static"}"#;
/// CNI capabilities enabling per-pod MAC and IP requests
const NETWORK_CAPABILITIES: &str = r#"{"mac": true, "ips": true}"#;

/// Network parameters requested by a scenario
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NetworkRequest {
    /// SriovNetwork (and attachment) name
    pub name: String,
    /// Namespace the attachment is rendered into
    pub target_namespace: String,
    /// VF binding for the policy
    pub device_type: DeviceType,
    /// MTU the policy sets on the physical function and its VFs
    pub mtu: Option<u32>,
    /// MAC spoof checking
    pub spoof_check: Option<bool>,
    /// VF trust mode
    pub trust: Option<bool>,
    /// VLAN ID
    pub vlan: Option<u16>,
    /// VLAN QoS priority
    pub vlan_qos: Option<u16>,
    /// Minimum TX rate in Mbps
    pub min_tx_rate: Option<u32>,
    /// Maximum TX rate in Mbps
    pub max_tx_rate: Option<u32>,
    /// Link state, `auto` when unset
    pub link_state: Option<String>,
}

impl NetworkRequest {
    /// Kernel-netdevice network with default settings
    pub fn new(name: impl Into<String>, target_namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            target_namespace: target_namespace.into(),
            device_type: DeviceType::NetDevice,
            mtu: None,
            spoof_check: None,
            trust: None,
            vlan: None,
            vlan_qos: None,
            min_tx_rate: None,
            max_tx_rate: None,
            link_state: None,
        }
    }

    /// Use a different VF binding (vfio-pci for DPDK)
    pub fn with_device_type(mut self, device_type: DeviceType) -> Self {
        self.device_type = device_type;
        self
    }

    /// Set the MTU on the policy
    pub fn with_mtu(mut self, mtu: u32) -> Self {
        self.mtu = Some(mtu);
        self
    }

    /// Tag traffic with a VLAN and QoS priority
    pub fn with_vlan(mut self, vlan: u16, qos: Option<u16>) -> Self {
        self.vlan = Some(vlan);
        self.vlan_qos = qos;
        self
    }

    /// Set MAC spoof checking
    pub fn with_spoof_check(mut self, on: bool) -> Self {
        self.spoof_check = Some(on);
        self
    }

    /// Set VF trust mode
    pub fn with_trust(mut self, on: bool) -> Self {
        self.trust = Some(on);
        self
    }

    /// Limit TX rates in Mbps
    pub fn with_tx_rates(mut self, min: Option<u32>, max: Option<u32>) -> Self {
        self.min_tx_rate = min;
        self.max_tx_rate = max;
        self
    }

    /// Set the link state (`auto`, `enable`, `disable`)
    pub fn with_link_state(mut self, state: impl Into<String>) -> Self {
        self.link_state = Some(state.into());
        self
    }
}

/// One step of a provisioning plan
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlanStep {
    /// Create the node policy for the candidate worker
    Policy,
    /// Wait for policy sync, pool update and fleet health
    Convergence,
    /// Create the SriovNetwork
    Network,
    /// Wait for the rendered attachment definition
    Attachment,
    /// Wait for allocatable VFs (never fails the plan)
    Capacity,
}

impl PlanStep {
    /// Step name used in logs and errors
    pub fn name(self) -> &'static str {
        match self {
            Self::Policy => "policy",
            Self::Convergence => "convergence",
            Self::Network => "network",
            Self::Attachment => "attachment",
            Self::Capacity => "capacity",
        }
    }
}

impl fmt::Display for PlanStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Ordered steps attempted against each candidate worker
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProvisioningPlan {
    steps: Vec<PlanStep>,
}

impl ProvisioningPlan {
    /// Policy through capacity
    pub fn full() -> Self {
        Self {
            steps: vec![
                PlanStep::Policy,
                PlanStep::Convergence,
                PlanStep::Network,
                PlanStep::Attachment,
                PlanStep::Capacity,
            ],
        }
    }

    /// Only the policy and its convergence (VF initialisation)
    pub fn policy_only() -> Self {
        Self {
            steps: vec![PlanStep::Policy, PlanStep::Convergence],
        }
    }

    /// Steps in execution order
    pub fn steps(&self) -> &[PlanStep] {
        &self.steps
    }

    fn includes(&self, step: PlanStep) -> bool {
        self.steps.contains(&step)
    }
}

/// Result of a successful provisioning run
#[derive(Debug)]
pub struct Provisioned {
    /// Device that was provisioned
    pub device: DeviceDescriptor,
    /// Worker the policy is pinned to
    pub node: String,
    /// Physical function interface on that worker
    pub interface: String,
    /// The node policy
    pub policy: ResourceRef,
    /// The SriovNetwork, when the plan created one
    pub network: Option<ResourceRef>,
    /// The rendered attachment, when the plan waited for one
    pub attachment: Option<ResourceRef>,
    /// Whether allocatable VFs were observed before the capacity deadline
    pub capacity_confirmed: bool,
    /// Removal of everything above, newest first
    pub cleanup: CleanupStack,
}

struct StepFailure {
    step: PlanStep,
    error: Error,
}

struct AttemptState {
    interface: String,
    network: Option<ResourceRef>,
    attachment: Option<ResourceRef>,
    capacity_confirmed: bool,
}

/// Builds the node policy pinning `device` VFs to one worker
///
/// VF binding and MTU come from the request.
pub fn build_policy(
    config: &HarnessConfig,
    device: &DeviceDescriptor,
    node: &str,
    interface: &str,
    request: &NetworkRequest,
) -> SriovNetworkNodePolicy {
    let mut policy = SriovNetworkNodePolicy::new(
        &device.name,
        SriovNetworkNodePolicySpec {
            resource_name: device.name.clone(),
            node_selector: BTreeMap::from([(HOSTNAME_LABEL.to_string(), node.to_string())]),
            num_vfs: config.vf_count,
            nic_selector: NicSelector {
                vendor: Some(device.vendor.clone()),
                device_id: Some(device.device_id.clone()),
                pf_names: vec![config.pf_range(interface)],
            },
            device_type: request.device_type,
            priority: None,
            mtu: request.mtu,
        },
    );
    policy.metadata.namespace = Some(config.operator_namespace.clone());
    policy
}

/// Builds the SriovNetwork for a request backed by `resource_name`
pub fn build_network(
    config: &HarnessConfig,
    request: &NetworkRequest,
    resource_name: &str,
) -> SriovNetwork {
    let on_off = |on: bool| if on { "on" } else { "off" }.to_string();
    let mut network = SriovNetwork::new(
        &request.name,
        SriovNetworkSpec {
            resource_name: resource_name.to_string(),
            network_namespace: Some(request.target_namespace.clone()),
            ipam: Some(STATIC_IPAM.to_string()),
            vlan: request.vlan,
            vlan_qos: request.vlan_qos,
            spoof_chk: request.spoof_check.map(on_off),
            trust: request.trust.map(on_off),
            link_state: Some(
                request
                    .link_state
                    .clone()
                    .unwrap_or_else(|| LINK_STATE_AUTO.to_string()),
            ),
            min_tx_rate: request.min_tx_rate,
            max_tx_rate: request.max_tx_rate,
            log_level: Some("debug".to_string()),
            capabilities: Some(NETWORK_CAPABILITIES.to_string()),
        },
    );
    network.metadata.namespace = Some(config.operator_namespace.clone());
    network
}

/// Provisions device/network chains for scenarios
pub struct Provisioner {
    store: Arc<dyn ResourceStore>,
    config: Arc<HarnessConfig>,
    teardown: Teardown,
    cancel: CancellationToken,
}

impl Provisioner {
    /// Create a provisioner; `cancel` aborts any wait in progress
    pub fn new(
        store: Arc<dyn ResourceStore>,
        config: Arc<HarnessConfig>,
        cancel: CancellationToken,
    ) -> Self {
        let teardown = Teardown::new(store.clone(), config.timeouts.clone(), cancel.clone());
        Self {
            store,
            config,
            teardown,
            cancel,
        }
    }

    /// Teardown helper sharing this provisioner's store and cancellation
    pub fn teardown(&self) -> &Teardown {
        &self.teardown
    }

    /// Provision `device` with a default network rendered into `target_namespace`
    pub async fn provision(
        &self,
        device: &DeviceDescriptor,
        target_namespace: &str,
    ) -> Result<Provisioned> {
        let request = NetworkRequest::new(format!("{}-net", device.name), target_namespace);
        self.provision_with(device, &request, &ProvisioningPlan::full())
            .await
    }

    /// Try each device in order and return the first that provisions
    ///
    /// Devices without a workable target are skipped; any other failure stops
    /// the search.
    pub async fn provision_first_available(
        &self,
        devices: &[DeviceDescriptor],
        request: &NetworkRequest,
    ) -> Result<Provisioned> {
        let mut attempts = Vec::new();
        for device in devices {
            match self
                .provision_with(device, request, &ProvisioningPlan::full())
                .await
            {
                Ok(provisioned) => return Ok(provisioned),
                Err(e) if e.is_skip() => {
                    info!(device = %device.name, error = %e, "Device unusable, trying next");
                    attempts.push(e.to_string());
                }
                Err(e) => return Err(e),
            }
        }
        Err(Error::NoWorkableTarget {
            device: devices
                .iter()
                .map(|d| d.name.as_str())
                .collect::<Vec<_>>()
                .join(","),
            attempts,
        })
    }

    /// Run `plan` for `device` against each worker until one succeeds
    pub async fn provision_with(
        &self,
        device: &DeviceDescriptor,
        request: &NetworkRequest,
        plan: &ProvisioningPlan,
    ) -> Result<Provisioned> {
        let config = self.config.as_ref();

        self.check_fleet().await?;

        let policy_ref = ResourceRef::namespaced(
            ResourceKind::Policy,
            &device.name,
            &config.operator_namespace,
        );
        self.teardown
            .remove(&policy_ref, config.timeouts.delete)
            .await?;
        if plan.includes(PlanStep::Network) {
            self.teardown
                .remove_network(&request.name, &config.operator_namespace, config.timeouts.delete)
                .await?;
        }

        let candidates = self.candidates().await?;
        info!(
            device = %device.name,
            candidates = candidates.len(),
            "Provisioning device"
        );

        let mut attempts = Vec::new();
        for node in &candidates {
            let mut stack = CleanupStack::new();
            match self.attempt(device, request, plan, node, &mut stack).await {
                Ok(state) => {
                    info!(device = %device.name, node = %node, "Provisioned");
                    return Ok(Provisioned {
                        device: device.clone(),
                        node: node.clone(),
                        interface: state.interface,
                        policy: policy_ref,
                        network: state.network,
                        attachment: state.attachment,
                        capacity_confirmed: state.capacity_confirmed,
                        cleanup: stack,
                    });
                }
                Err(failure) => {
                    warn!(
                        device = %device.name,
                        node = %node,
                        step = %failure.step,
                        error = %failure.error,
                        "Attempt failed, rolling back"
                    );
                    let rollback_failures = stack.unwind(&self.teardown).await;
                    if failure.error.is_cancelled() {
                        return Err(failure.error);
                    }
                    if let Some(e) = rollback_failures.into_iter().next() {
                        return Err(Error::teardown(
                            policy_ref.to_string(),
                            format!("rollback after failed attempt on {node} did not complete: {e}"),
                        ));
                    }
                    attempts.push(format!("{node}: {} step failed: {}", failure.step, failure.error));
                }
            }
        }

        Err(Error::NoWorkableTarget {
            device: device.name.clone(),
            attempts,
        })
    }

    /// Worker names, sorted
    /// One-shot fleet check; transient store errors are retried, then reported as not ready
    async fn check_fleet(&self) -> Result<()> {
        let store = self.store.as_ref();
        let selector = self.config.worker_selector.as_str();
        let report = retry_if(
            &RetryConfig::mutation(),
            "worker fleet check",
            Error::is_transient,
            || async move { fleet_report(store, selector).await },
        )
        .await;
        match report {
            Ok(report) if report.is_ready() => Ok(()),
            Ok(report) => Err(Error::fleet_not_ready(report.summary())),
            Err(e) if e.is_transient() => Err(Error::fleet_not_ready(format!(
                "worker nodes could not be listed: {e}"
            ))),
            Err(e) => Err(e),
        }
    }

    async fn candidates(&self) -> Result<Vec<String>> {
        let objects = self
            .store
            .list(
                ResourceKind::Node,
                &ListScope::all().with_selector(&self.config.worker_selector),
            )
            .await?;
        let mut names = objects
            .iter()
            .map(from_dynamic::<Node>)
            .map(|n| n.map(|n| n.name_any()))
            .collect::<Result<Vec<_>>>()?;
        names.sort();
        Ok(names)
    }

    async fn attempt(
        &self,
        device: &DeviceDescriptor,
        request: &NetworkRequest,
        plan: &ProvisioningPlan,
        node: &str,
        stack: &mut CleanupStack,
    ) -> std::result::Result<AttemptState, StepFailure> {
        let mut state = AttemptState {
            interface: self.discover_interface(device, node).await,
            network: None,
            attachment: None,
            capacity_confirmed: false,
        };

        for &step in plan.steps() {
            debug!(device = %device.name, node, step = %step, "Running step");
            let result = match step {
                PlanStep::Policy => {
                    self.create_policy(device, request, node, &state.interface, stack)
                        .await
                }
                PlanStep::Convergence => self.await_convergence(device, node).await,
                PlanStep::Network => self
                    .create_network(device, request, stack)
                    .await
                    .map(|r| state.network = Some(r)),
                PlanStep::Attachment => self
                    .await_attachment(device, request)
                    .await
                    .map(|r| state.attachment = Some(r)),
                PlanStep::Capacity => self
                    .await_capacity(device)
                    .await
                    .map(|confirmed| state.capacity_confirmed = confirmed),
            };
            result.map_err(|error| StepFailure { step, error })?;
        }
        Ok(state)
    }

    /// Interface name reported by the node's state for this device, or the configured one
    async fn discover_interface(&self, device: &DeviceDescriptor, node: &str) -> String {
        let reference = ResourceRef::namespaced(
            ResourceKind::NodeState,
            node,
            &self.config.operator_namespace,
        );
        let discovered = match self.store.get(&reference).await {
            Ok(obj) => from_dynamic::<SriovNetworkNodeState>(&obj)
                .ok()
                .and_then(|s| {
                    s.interface_for(&device.vendor, &device.device_id)
                        .map(str::to_string)
                }),
            Err(e) => {
                debug!(node, error = %e, "Node state unavailable for interface discovery");
                None
            }
        };
        match discovered {
            Some(name) => {
                debug!(node, interface = %name, "Discovered interface");
                name
            }
            None => device.interface_name.clone(),
        }
    }

    async fn create_policy(
        &self,
        device: &DeviceDescriptor,
        request: &NetworkRequest,
        node: &str,
        interface: &str,
        stack: &mut CleanupStack,
    ) -> Result<()> {
        let policy = build_policy(&self.config, device, node, interface, request);
        let reference = ResourceRef::namespaced(
            ResourceKind::Policy,
            &device.name,
            &self.config.operator_namespace,
        );
        // rollback is registered first; removing an absent policy is a no-op
        stack.push(CleanupAction::Remove(reference));
        self.create(ResourceKind::Policy, &to_dynamic(&policy)?).await?;
        info!(
            policy = %device.name,
            node,
            pf = %policy.spec.nic_selector.pf_names.join(","),
            device_type = %policy.spec.device_type,
            mtu = ?policy.spec.mtu,
            "Policy submitted"
        );
        Ok(())
    }

    async fn await_convergence(&self, device: &DeviceDescriptor, node: &str) -> Result<()> {
        let store = self.store.as_ref();
        let config = self.config.as_ref();
        let target = ReadinessTarget::new(
            format!("policy {} applied on {}", device.name, node),
            config.timeouts.stability_interval,
            config.timeouts.policy_application,
        );
        poll_until(&target, &self.cancel, || async move {
            cluster_converged(store, config).await
        })
        .await
    }

    async fn create_network(
        &self,
        device: &DeviceDescriptor,
        request: &NetworkRequest,
        stack: &mut CleanupStack,
    ) -> Result<ResourceRef> {
        let config = self.config.as_ref();
        let network = build_network(config, request, &device.name);
        stack.push(CleanupAction::RemoveNetwork {
            name: request.name.clone(),
            operator_namespace: config.operator_namespace.clone(),
            target_namespace: Some(request.target_namespace.clone()),
        });
        self.create(ResourceKind::Network, &to_dynamic(&network)?).await?;
        info!(
            network = %request.name,
            target_namespace = %request.target_namespace,
            resource = %device.name,
            "Network submitted"
        );
        Ok(ResourceRef::namespaced(
            ResourceKind::Network,
            &request.name,
            &config.operator_namespace,
        ))
    }

    async fn await_attachment(
        &self,
        device: &DeviceDescriptor,
        request: &NetworkRequest,
    ) -> Result<ResourceRef> {
        let store = self.store.as_ref();
        let config = self.config.as_ref();
        let operator_ns = config.operator_namespace.as_str();
        let policy_name = device.name.as_str();

        let precheck = ReadinessTarget::new(
            format!("policy {policy_name} in {operator_ns}"),
            config.timeouts.poll_interval,
            config.timeouts.policy_precheck,
        );
        poll_until(&precheck, &self.cancel, || async move {
            policy_exists(store, policy_name, operator_ns).await
        })
        .await
        .map_err(|e| {
            if e.is_deadline() {
                Error::predicate(
                    format!("attachment {}/{}", request.target_namespace, request.name),
                    format!(
                        "policy {policy_name} not found in {operator_ns}; \
                         the operator renders the attachment only once the policy is applied"
                    ),
                )
            } else {
                e
            }
        })?;

        let name = request.name.as_str();
        let namespace = request.target_namespace.as_str();
        let target = ReadinessTarget::new(
            format!("attachment {namespace}/{name}"),
            config.timeouts.poll_interval,
            config.timeouts.attachment,
        );
        poll_until(&target, &self.cancel, || async move {
            attachment_exists(store, name, namespace).await
        })
        .await?;
        Ok(ResourceRef::namespaced(ResourceKind::Attachment, name, namespace))
    }

    /// `Ok(false)` when capacity never showed up; only cancellation is an error
    async fn await_capacity(&self, device: &DeviceDescriptor) -> Result<bool> {
        let store = self.store.as_ref();
        let config = self.config.as_ref();
        let key = config.resource_key(&device.name);
        let key_ref = key.as_str();
        let target = ReadinessTarget::new(
            format!("allocatable {key}"),
            config.timeouts.capacity_interval,
            config.timeouts.capacity,
        );
        match poll_until(&target, &self.cancel, || async move {
            capacity_available(store, &config.worker_selector, key_ref).await
        })
        .await
        {
            Ok(()) => Ok(true),
            Err(e) if e.is_cancelled() => Err(e),
            Err(e) => {
                warn!(resource = %key, error = %e, "VF capacity not confirmed, continuing");
                Ok(false)
            }
        }
    }

    async fn create(&self, kind: ResourceKind, object: &DynamicObject) -> Result<()> {
        let store = self.store.as_ref();
        retry_if(
            &RetryConfig::mutation(),
            "create",
            Error::is_transient,
            || async move { store.create(kind, object).await },
        )
        .await
        .map(|_| ())
    }
}
