//! Snapshot checks around an operator reinstall
//!
//! The operator itself is removed and reinstalled out of band (OLM); the
//! test captures a baseline, waits for the control plane to disappear,
//! checks no node started reconciling on its own, waits for the operator to
//! return and requires the configuration to be unchanged.

use std::time::Duration;

use sriov_harness::predicates::{cluster_converged, control_plane_removed, operator_pods_running};
use sriov_harness::{capture, diff, poll_until, ReadinessTarget};

use super::context::E2eContext;

/// Time allowed for the out-of-band uninstall or reinstall
const OPERATOR_CHANGE_TIMEOUT: Duration = Duration::from_secs(30 * 60);

#[tokio::test]
async fn test_snapshot_is_stable_while_idle() {
    let ctx = E2eContext::connect().await;
    let ns = ctx.config.operator_namespace.as_str();

    let before = capture(ctx.store.as_ref(), ns).await.unwrap();
    tokio::time::sleep(ctx.config.timeouts.stability_interval).await;
    let after = capture(ctx.store.as_ref(), ns).await.unwrap();

    let changes = diff(&before, &after);
    assert!(changes.is_empty(), "idle cluster changed: {changes:?}");
    assert!(after.unexpected_reconciliation(&before).is_empty());
}

#[tokio::test]
#[ignore]
async fn test_operator_reinstall_preserves_configuration() {
    let ctx = E2eContext::connect().await;
    let store = ctx.store.as_ref();
    let config = ctx.config.as_ref();
    let ns = config.operator_namespace.as_str();

    let baseline = capture(store, ns).await.unwrap();
    assert!(
        baseline.all_nodes_succeeded(),
        "baseline requires every node state Succeeded: {:?}",
        baseline.node_sync_status
    );
    std::fs::write(
        std::env::temp_dir().join("sriov-baseline.json"),
        baseline.to_json().unwrap(),
    )
    .unwrap();
    tracing::info!("Baseline captured, remove the SR-IOV operator now");

    let removed = ReadinessTarget::new(
        format!("operator control plane removed from {ns}"),
        config.timeouts.stability_interval,
        OPERATOR_CHANGE_TIMEOUT,
    );
    poll_until(&removed, &ctx.cancel, || control_plane_removed(store, ns))
        .await
        .unwrap();

    let absent = capture(store, ns).await.unwrap();
    let reconciling = absent.unexpected_reconciliation(&baseline);
    assert!(
        reconciling.is_empty(),
        "nodes reconciling without an operator: {reconciling:?}"
    );
    tracing::info!("Control plane gone, reinstall the SR-IOV operator now");

    let returned = ReadinessTarget::new(
        format!("operator pods running in {ns}"),
        config.timeouts.stability_interval,
        OPERATOR_CHANGE_TIMEOUT,
    );
    poll_until(&returned, &ctx.cancel, || operator_pods_running(store, ns))
        .await
        .unwrap();

    let converged = ReadinessTarget::new(
        "cluster converged after reinstall",
        config.timeouts.stability_interval,
        config.timeouts.policy_application,
    );
    poll_until(&converged, &ctx.cancel, || cluster_converged(store, config))
        .await
        .unwrap();

    let restored = capture(store, ns).await.unwrap();
    let changes = diff(&baseline, &restored);
    assert!(
        changes.is_empty(),
        "reinstall changed the configuration: {}",
        changes
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ")
    );
}
