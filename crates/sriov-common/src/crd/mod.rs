//! Custom resource types the harness reads and writes
//!
//! These mirror the subset of the SR-IOV operator, MachineConfig and Multus
//! APIs that scenarios touch. Only fields the harness inspects or sets are
//! modelled; unknown fields are ignored on read.

mod attachment;
mod machine_config_pool;
mod network;
mod node_state;
mod policy;

pub use attachment::{NetworkAttachmentDefinition, NetworkAttachmentDefinitionSpec};
pub use machine_config_pool::{
    MachineConfigPool, MachineConfigPoolSpec, MachineConfigPoolStatus, PoolCondition,
    CONDITION_DEGRADED, CONDITION_UPDATED,
};
pub use network::{SriovNetwork, SriovNetworkSpec, LINK_STATE_AUTO};
pub use node_state::{
    InterfaceStatus, SriovNetworkNodeState, SriovNetworkNodeStateSpec,
    SriovNetworkNodeStateStatus, SYNC_STATUS_IN_PROGRESS, SYNC_STATUS_SUCCEEDED,
};
pub use policy::{DeviceType, NicSelector, SriovNetworkNodePolicy, SriovNetworkNodePolicySpec};
