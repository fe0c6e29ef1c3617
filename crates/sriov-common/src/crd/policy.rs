//! SriovNetworkNodePolicy: asks the operator to carve VFs out of a physical function

use std::collections::BTreeMap;
use std::fmt;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// How VFs are exposed to pods
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum DeviceType {
    /// Kernel network interface
    #[default]
    #[serde(rename = "netdevice")]
    NetDevice,
    /// Userspace (DPDK) binding
    #[serde(rename = "vfio-pci")]
    VfioPci,
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NetDevice => f.write_str("netdevice"),
            Self::VfioPci => f.write_str("vfio-pci"),
        }
    }
}

/// Selects the physical function a policy applies to
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NicSelector {
    /// PCI vendor ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vendor: Option<String>,
    /// PCI device ID
    #[serde(rename = "deviceID", default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    /// Interface names with optional VF range, e.g. `ens2f2#0-1`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pf_names: Vec<String>,
}

/// Desired VF layout for matching nodes
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "sriovnetwork.openshift.io",
    version = "v1",
    kind = "SriovNetworkNodePolicy",
    plural = "sriovnetworknodepolicies",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct SriovNetworkNodePolicySpec {
    /// Extended resource name advertised by the device plugin
    pub resource_name: String,
    /// Nodes the policy applies to
    #[serde(default)]
    pub node_selector: BTreeMap<String, String>,
    /// Number of VFs to create per PF
    pub num_vfs: u32,
    /// PF selection
    pub nic_selector: NicSelector,
    /// VF driver binding
    #[serde(default)]
    pub device_type: DeviceType,
    /// Policy priority, lower wins
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<u32>,
    /// MTU applied to the PF
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mtu: Option<u32>,
}
