//! SriovNetworkNodeState: per-node report of the config daemon

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Sync status once the daemon applied the desired state
pub const SYNC_STATUS_SUCCEEDED: &str = "Succeeded";
/// Sync status while the daemon is applying a change
pub const SYNC_STATUS_IN_PROGRESS: &str = "InProgress";

/// Desired state written by the operator
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "sriovnetwork.openshift.io",
    version = "v1",
    kind = "SriovNetworkNodeState",
    plural = "sriovnetworknodestates",
    namespaced,
    status = "SriovNetworkNodeStateStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct SriovNetworkNodeStateSpec {
    /// Interfaces the operator wants configured
    #[serde(default)]
    pub interfaces: Vec<InterfaceStatus>,
}

/// Observed state reported by the daemon
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SriovNetworkNodeStateStatus {
    /// Discovered SR-IOV capable interfaces
    #[serde(default)]
    pub interfaces: Vec<InterfaceStatus>,
    /// "Succeeded", "InProgress" or "Failed"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_status: Option<String>,
    /// Last error reported by the daemon
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync_error: Option<String>,
}

/// One physical function as seen by the daemon
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InterfaceStatus {
    /// Kernel interface name
    #[serde(default)]
    pub name: String,
    /// PCI vendor ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vendor: Option<String>,
    /// PCI device ID
    #[serde(rename = "deviceID", default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    /// PCI address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pci_address: Option<String>,
    /// Bound driver
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub driver: Option<String>,
    /// Configured VFs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_vfs: Option<u32>,
    /// Maximum VFs the device supports
    #[serde(rename = "totalvfs", default, skip_serializing_if = "Option::is_none")]
    pub total_vfs: Option<u32>,
}

impl SriovNetworkNodeState {
    /// Reported sync status, if any
    pub fn sync_status(&self) -> Option<&str> {
        self.status.as_ref().and_then(|s| s.sync_status.as_deref())
    }

    /// Whether the daemon finished applying the desired state
    pub fn is_synced(&self) -> bool {
        self.sync_status() == Some(SYNC_STATUS_SUCCEEDED)
    }

    /// Name of the interface matching a PCI vendor and device ID
    pub fn interface_for(&self, vendor: &str, device_id: &str) -> Option<&str> {
        self.status
            .as_ref()?
            .interfaces
            .iter()
            .find(|i| {
                i.vendor.as_deref() == Some(vendor) && i.device_id.as_deref() == Some(device_id)
            })
            .map(|i| i.name.as_str())
    }
}
