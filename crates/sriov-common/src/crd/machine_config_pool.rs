//! MachineConfigPool (OpenShift only): node pools that reboot to apply config

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Pool finished rolling out its current config
pub const CONDITION_UPDATED: &str = "Updated";
/// Pool failed to roll out
pub const CONDITION_DEGRADED: &str = "Degraded";

/// Pool configuration
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "machineconfiguration.openshift.io",
    version = "v1",
    kind = "MachineConfigPool",
    plural = "machineconfigpools",
    status = "MachineConfigPoolStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct MachineConfigPoolSpec {
    /// Whether rollouts are paused
    #[serde(default)]
    pub paused: bool,
}

/// Rollout progress of a pool
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MachineConfigPoolStatus {
    /// Pool conditions (Updated, Updating, Degraded, ...)
    #[serde(default)]
    pub conditions: Vec<PoolCondition>,
    /// Machines in the pool
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub machine_count: Option<u32>,
    /// Machines running the current config
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_machine_count: Option<u32>,
    /// Machines that failed to update
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub degraded_machine_count: Option<u32>,
}

/// Standard condition shape used by pools
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PoolCondition {
    /// Condition type
    #[serde(rename = "type")]
    pub type_: String,
    /// "True", "False" or "Unknown"
    pub status: String,
    /// Machine-readable reason
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Human-readable message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl MachineConfigPool {
    /// Conditions reported by the pool, empty when the status is missing
    pub fn conditions(&self) -> &[PoolCondition] {
        self.status
            .as_ref()
            .map(|s| s.conditions.as_slice())
            .unwrap_or_default()
    }
}
