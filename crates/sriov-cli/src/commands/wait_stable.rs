//! Wait-stable command - block until the cluster has converged
//!
//! Usage: sriov-e2e wait-stable [--timeout-secs <secs>]
//!
//! Converged means every SriovNetworkNodeState reports `Succeeded`, every
//! selected MachineConfigPool is updated and not degraded (skipped on
//! clusters without machine config), and every worker is Ready without
//! pressure.

use std::time::Duration;

use clap::Args;
use sriov_harness::predicates::{cluster_converged, fleet_report};
use sriov_harness::{poll_until, ReadinessTarget};
use tracing::info;

use super::Session;
use crate::Result;

/// Wait until policies are synced, pools updated and workers ready
#[derive(Args, Debug)]
pub struct WaitStableArgs {
    /// Give up after this many seconds (defaults to the policy application timeout)
    #[arg(long)]
    pub timeout_secs: Option<u64>,
}

pub async fn run(session: &Session, args: &WaitStableArgs) -> Result<()> {
    let elapsed = wait(session, args).await?;
    println!("cluster stable after {:.0}s", elapsed.as_secs_f64());
    Ok(())
}

pub async fn wait(session: &Session, args: &WaitStableArgs) -> Result<Duration> {
    let store = session.store.as_ref();
    let config = session.config.as_ref();
    let timeout = args
        .timeout_secs
        .map(Duration::from_secs)
        .unwrap_or(config.timeouts.policy_application);

    let report = fleet_report(store, &config.worker_selector).await?;
    info!(
        workers = report.total,
        unstable = report.unstable.len(),
        timeout_secs = timeout.as_secs(),
        "Waiting for cluster to converge"
    );

    let start = tokio::time::Instant::now();
    let target = ReadinessTarget::new(
        "SR-IOV and machine config stable",
        config.timeouts.stability_interval,
        timeout,
    );
    poll_until(&target, &session.cancel, || cluster_converged(store, config)).await?;
    Ok(start.elapsed())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use sriov_common::HarnessConfig;
    use sriov_harness::MemoryStore;

    #[tokio::test(start_paused = true)]
    async fn test_empty_cluster_never_converges() {
        let session = Session::new(Arc::new(MemoryStore::new()), HarnessConfig::default());
        let err = wait(&session, &WaitStableArgs { timeout_secs: Some(60) })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("SR-IOV and machine config stable"));
    }
}
