//! Convergence and lifecycle orchestration for SR-IOV end-to-end scenarios
//!
//! The harness waits for an eventually consistent cluster (node policies,
//! device plugins, config daemons, machine-config pools, workers) to settle,
//! provisions policy/network/attachment chains in dependency order with
//! rollback, tears them down idempotently, and captures snapshots that
//! prove an operator reinstall left the configuration intact.
//!
//! All cluster access goes through [`store::ResourceStore`]; pod commands go
//! through [`shell::WorkloadShell`]; scenario results go to
//! [`report::ReportSink`].

#![deny(missing_docs)]

pub mod cleanup;
pub mod poll;
pub mod predicates;
pub mod provisioner;
pub mod reaper;
pub mod report;
pub mod shell;
pub mod snapshot;
pub mod store;
pub mod teardown;

#[cfg(test)]
mod fixtures;

pub use cleanup::{CleanupAction, CleanupStack};
pub use poll::{poll_until, ReadinessTarget};
pub use provisioner::{NetworkRequest, PlanStep, Provisioned, Provisioner, ProvisioningPlan};
pub use reaper::{ReapSummary, Reaper};
pub use report::{MemorySink, Outcome, ReportRecord, ReportSink, ScenarioRunner, TracingSink};
pub use shell::{KubeShell, WorkloadShell};
pub use snapshot::{capture, diff, Change, Snapshot};
pub use store::{
    DeleteMode, KubeStore, ListScope, MemoryStore, ResourceKind, ResourceRef, ResourceStore,
};
pub use teardown::Teardown;

pub use sriov_common::{Error, Result};
