//! End-to-end scenarios against a live SR-IOV capable cluster
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  context.rs         - client, config, namespace and pod setup │
//! │  lifecycle_e2e.rs   - provision, attach a pod, tear down      │
//! │  reinstall_e2e.rs   - snapshot stability across reinstall     │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Running
//!
//! ```bash
//! KUBECONFIG=/path/to/kubeconfig \
//! SRIOV_DEVICES=e810c:1593:8086:ens2f2 \
//! cargo test -p sriov-harness --features cluster-e2e --test e2e -- --nocapture
//!
//! # Operator reinstall check (uninstall and reinstall the operator while it waits)
//! cargo test -p sriov-harness --features cluster-e2e --test e2e \
//!   test_operator_reinstall_preserves_configuration -- --ignored --nocapture
//! ```

#![cfg(feature = "cluster-e2e")]

mod context;
mod lifecycle_e2e;
mod reinstall_e2e;
