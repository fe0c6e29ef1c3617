//! Harness configuration
//!
//! Configuration is resolved once, from the process environment or from any
//! lookup function, into an explicit [`HarnessConfig`] that is passed by
//! reference to every component. Nothing reads the environment after startup.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{Error, Result};

/// Device list override: `name:deviceID:vendor:interface,...`
pub const DEVICES_ENV: &str = "SRIOV_DEVICES";
/// Preferred VF count variable
pub const VF_NUM_ENV: &str = "ECO_OCP_SRIOV_VF_NUM";
/// Fallback VF count variable
pub const VF_NUM_FALLBACK_ENV: &str = "SRIOV_VF_NUM";
/// Worker node label selector
pub const WORKER_LABEL_ENV: &str = "SRIOV_WORKER_LABEL";
/// Namespace the SR-IOV operator runs in
pub const OPERATOR_NAMESPACE_ENV: &str = "SRIOV_OPERATOR_NAMESPACE";
/// MachineConfigPool `key=value` filter
pub const MCP_LABEL_ENV: &str = "SRIOV_MCP_LABEL";
/// Policy application timeout in seconds
pub const POLICY_TIMEOUT_ENV: &str = "SRIOV_POLICY_TIMEOUT_SECS";
/// Prefix of the extended resource advertised by the device plugin
pub const RESOURCE_PREFIX_ENV: &str = "SRIOV_RESOURCE_PREFIX";

/// Default namespace of the SR-IOV network operator
pub const DEFAULT_OPERATOR_NAMESPACE: &str = "openshift-sriov-network-operator";
/// Default worker selector
pub const DEFAULT_WORKER_LABEL: &str = "node-role.kubernetes.io/worker=";
/// Default pool filter
pub const DEFAULT_MCP_LABEL: &str = "machineconfiguration.openshift.io/role=worker";
/// Default extended resource prefix
pub const DEFAULT_RESOURCE_PREFIX: &str = "openshift.io";
/// Default number of VFs per policy
pub const DEFAULT_VF_COUNT: u32 = 2;
/// Namespace prefix shared by every scenario namespace
pub const SCENARIO_NAMESPACE_PREFIX: &str = "e2e-";

/// A NIC model the harness knows how to exercise
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceDescriptor {
    /// Short name, also used as policy and resource name
    pub name: String,
    /// PCI device ID, e.g. "1593"
    pub device_id: String,
    /// PCI vendor ID, e.g. "8086"
    pub vendor: String,
    /// Expected physical function interface name on the worker
    pub interface_name: String,
}

impl DeviceDescriptor {
    /// Create a descriptor
    pub fn new(
        name: impl Into<String>,
        device_id: impl Into<String>,
        vendor: impl Into<String>,
        interface_name: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            device_id: device_id.into(),
            vendor: vendor.into(),
            interface_name: interface_name.into(),
        }
    }

    /// Parse one `name:deviceID:vendor:interface` entry.
    ///
    /// Fields are trimmed. Returns `None` unless there are exactly four
    /// non-empty fields.
    pub fn parse(entry: &str) -> Option<Self> {
        let fields: Vec<&str> = entry.split(':').map(str::trim).collect();
        match fields.as_slice() {
            [name, device_id, vendor, interface]
                if fields.iter().all(|f| !f.is_empty()) =>
            {
                Some(Self::new(*name, *device_id, *vendor, *interface))
            }
            _ => None,
        }
    }
}

/// Built-in device table used when `SRIOV_DEVICES` is not set
pub fn default_devices() -> Vec<DeviceDescriptor> {
    [
        ("e810xxv", "159b", "8086", "eno12409"),
        ("e810c", "1593", "8086", "ens2f2"),
        ("x710", "1572", "8086", "ens5f0"),
        ("bcm57414", "16d7", "14e4", "ens4f1np1"),
        ("bcm57508", "1750", "14e4", "ens3f0np0"),
        ("e810back", "1591", "8086", "ens4f2"),
        ("cx7anl244", "1021", "15b3", "ens2f0np0"),
    ]
    .into_iter()
    .map(|(name, id, vendor, iface)| DeviceDescriptor::new(name, id, vendor, iface))
    .collect()
}

/// Parse a comma-separated device list, dropping malformed entries
pub fn parse_device_list(raw: &str) -> Vec<DeviceDescriptor> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .filter_map(|entry| {
            let parsed = DeviceDescriptor::parse(entry);
            if parsed.is_none() {
                warn!(entry = %entry, "Ignoring malformed device entry");
            }
            parsed
        })
        .collect()
}

/// Normalize a worker label into a selector, appending `=` when it has no operator
pub fn normalize_label_selector(label: &str) -> String {
    let label = label.trim();
    if label.contains('=') {
        label.to_string()
    } else {
        format!("{label}=")
    }
}

/// Deadlines and intervals used by waits across the harness
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Timeouts {
    /// Default interval between predicate attempts
    pub poll_interval: Duration,
    /// Interval for cluster-wide stability waits
    pub stability_interval: Duration,
    /// How long a policy may take to be applied across the fleet
    pub policy_application: Duration,
    /// Short pre-check that the policy exists before waiting on attachments
    pub policy_precheck: Duration,
    /// How long the operator may take to create or remove an attachment
    pub attachment: Duration,
    /// How long to wait for allocatable VFs
    pub capacity: Duration,
    /// Interval between capacity checks
    pub capacity_interval: Duration,
    /// Namespace removal during leftover cleanup
    pub cleanup: Duration,
    /// Generic resource removal
    pub delete: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            stability_interval: Duration::from_secs(30),
            policy_application: Duration::from_secs(20 * 60),
            policy_precheck: Duration::from_secs(30),
            attachment: Duration::from_secs(3 * 60),
            capacity: Duration::from_secs(2 * 60),
            capacity_interval: Duration::from_secs(10),
            cleanup: Duration::from_secs(120),
            delete: Duration::from_secs(300),
        }
    }
}

/// Fully resolved harness configuration
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HarnessConfig {
    /// Namespace the operator and its CRs live in
    pub operator_namespace: String,
    /// Label selector for worker nodes
    pub worker_selector: String,
    /// Optional `key=value` MachineConfigPool filter (None = all pools)
    pub pool_selector: Option<String>,
    /// Devices scenarios may provision
    pub devices: Vec<DeviceDescriptor>,
    /// VFs per policy
    pub vf_count: u32,
    /// Extended resource prefix, e.g. `openshift.io`
    pub resource_prefix: String,
    /// Prefix identifying scenario namespaces
    pub namespace_prefix: String,
    /// Deadlines and intervals
    pub timeouts: Timeouts,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            operator_namespace: DEFAULT_OPERATOR_NAMESPACE.to_string(),
            worker_selector: DEFAULT_WORKER_LABEL.to_string(),
            pool_selector: Some(DEFAULT_MCP_LABEL.to_string()),
            devices: default_devices(),
            vf_count: DEFAULT_VF_COUNT,
            resource_prefix: DEFAULT_RESOURCE_PREFIX.to_string(),
            namespace_prefix: SCENARIO_NAMESPACE_PREFIX.to_string(),
            timeouts: Timeouts::default(),
        }
    }
}

impl HarnessConfig {
    /// Resolve configuration from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolve configuration from an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup(DEVICES_ENV) {
            let devices = parse_device_list(&raw);
            if devices.is_empty() {
                return Err(Error::configuration_for(
                    DEVICES_ENV,
                    format!("no valid device entries in {raw:?}; expected name:deviceID:vendor:interface"),
                ));
            }
            config.devices = devices;
        }

        config.vf_count = resolve_vf_count(&lookup);

        if let Some(label) = non_empty(lookup(WORKER_LABEL_ENV)) {
            config.worker_selector = normalize_label_selector(&label);
        }
        if let Some(ns) = non_empty(lookup(OPERATOR_NAMESPACE_ENV)) {
            config.operator_namespace = ns;
        }
        if let Some(pool) = lookup(MCP_LABEL_ENV) {
            config.pool_selector = non_empty(Some(pool));
        }
        if let Some(prefix) = non_empty(lookup(RESOURCE_PREFIX_ENV)) {
            config.resource_prefix = prefix.trim_end_matches('/').to_string();
        }
        if let Some(raw) = non_empty(lookup(POLICY_TIMEOUT_ENV)) {
            let secs: u64 = raw.parse().ok().filter(|s| *s > 0).ok_or_else(|| {
                Error::configuration_for(
                    POLICY_TIMEOUT_ENV,
                    format!("expected a positive number of seconds, got {raw:?}"),
                )
            })?;
            config.timeouts.policy_application = Duration::from_secs(secs);
        }

        debug!(
            devices = config.devices.len(),
            vf_count = config.vf_count,
            worker_selector = %config.worker_selector,
            operator_namespace = %config.operator_namespace,
            "Resolved harness configuration"
        );
        Ok(config)
    }

    /// Look up a configured device by name
    pub fn device(&self, name: &str) -> Option<&DeviceDescriptor> {
        self.devices.iter().find(|d| d.name == name)
    }

    /// Extended resource key for a policy resource name, e.g. `openshift.io/e810c`
    pub fn resource_key(&self, resource_name: &str) -> String {
        format!("{}/{}", self.resource_prefix, resource_name)
    }

    /// Physical function selector covering every configured VF, e.g. `ens2f2#0-1`
    pub fn pf_range(&self, interface: &str) -> String {
        format!("{}#0-{}", interface, self.vf_count.saturating_sub(1))
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn resolve_vf_count<F>(lookup: &F) -> u32
where
    F: Fn(&str) -> Option<String>,
{
    for key in [VF_NUM_ENV, VF_NUM_FALLBACK_ENV] {
        if let Some(raw) = lookup(key) {
            match raw.trim().parse::<u32>() {
                Ok(n) if n > 0 => return n,
                _ => warn!(variable = key, value = %raw, "Ignoring invalid VF count"),
            }
        }
    }
    DEFAULT_VF_COUNT
}
