//! SriovNetwork: asks the operator to render a NetworkAttachmentDefinition

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Link state used when a scenario does not ask for one
pub const LINK_STATE_AUTO: &str = "auto";

/// Attachment parameters for VFs from one resource pool
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "sriovnetwork.openshift.io",
    version = "v1",
    kind = "SriovNetwork",
    plural = "sriovnetworks",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct SriovNetworkSpec {
    /// Policy resource name providing the VFs
    pub resource_name: String,
    /// Namespace the attachment definition is rendered into (empty = the network's own)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_namespace: Option<String>,
    /// CNI IPAM configuration as a JSON string
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipam: Option<String>,
    /// VLAN ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vlan: Option<u16>,
    /// VLAN QoS priority
    #[serde(rename = "vlanQoS", default, skip_serializing_if = "Option::is_none")]
    pub vlan_qos: Option<u16>,
    /// MAC spoof checking, "on" or "off"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spoof_chk: Option<String>,
    /// VF trust mode, "on" or "off"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trust: Option<String>,
    /// "auto", "enable" or "disable"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link_state: Option<String>,
    /// Minimum TX rate in Mbps
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_tx_rate: Option<u32>,
    /// Maximum TX rate in Mbps
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tx_rate: Option<u32>,
    /// CNI plugin log level
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
    /// CNI capabilities as a JSON string, e.g. `{"mac": true}`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<String>,
}

impl SriovNetwork {
    /// Namespace the operator renders the attachment into, falling back to `default_ns`
    pub fn target_namespace<'a>(&'a self, default_ns: &'a str) -> &'a str {
        self.spec
            .network_namespace
            .as_deref()
            .filter(|ns| !ns.is_empty())
            .unwrap_or(default_ns)
    }
}
