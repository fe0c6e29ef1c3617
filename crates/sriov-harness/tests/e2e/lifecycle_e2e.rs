//! VF lifecycle scenarios
//!
//! Each scenario provisions the first device that has a workable worker,
//! attaches a pod to the resulting network, checks the VF inside the pod and
//! unwinds everything it created. Devices without a usable worker are
//! reported as skipped rather than failed.

use sriov_harness::shell::interface_mac;
use sriov_harness::{CleanupStack, Error, NetworkRequest, Result, ScenarioRunner};

use super::context::{E2eContext, POD_INTERFACE};

const CLIENT_MAC: &str = "20:04:0f:f1:88:01";
const CLIENT_IP: &str = "192.168.1.10/24";

async fn attach_and_verify(ctx: &E2eContext, case: &str, request: NetworkRequest) -> Result<()> {
    let mut cleanup = CleanupStack::new();
    let teardown = ctx.teardown();

    let outcome: Result<()> = async {
        ctx.create_namespace(&request.target_namespace, &mut cleanup)
            .await?;
        let provisioned = ctx
            .provisioner()
            .provision_first_available(&ctx.config.devices, &request)
            .await?;
        cleanup.append(provisioned.cleanup);

        let pod = format!("{case}-client");
        ctx.create_test_pod(
            &request.target_namespace,
            &pod,
            &request.name,
            CLIENT_MAC,
            CLIENT_IP,
            &mut cleanup,
        )
        .await?;
        ctx.wait_interface_ready(&request.target_namespace, &pod)
            .await?;

        let mac = interface_mac(
            ctx.shell.as_ref(),
            &request.target_namespace,
            &pod,
            POD_INTERFACE,
        )
        .await?;
        if mac.as_deref() != Some(CLIENT_MAC) {
            return Err(Error::predicate(
                format!("{POD_INTERFACE} in {}/{pod}", request.target_namespace),
                format!("expected MAC {CLIENT_MAC}, found {mac:?}"),
            ));
        }
        Ok(())
    }
    .await;

    let unwound = cleanup.unwind_checked(&teardown).await;
    outcome.and(unwound)
}

#[tokio::test]
async fn test_vf_lifecycle() {
    let ctx = E2eContext::connect().await;
    let summary = ctx.reaper().sweep().await;
    tracing::info!(removed = summary.removed(), "Pre-suite sweep done");

    let runner = ScenarioRunner::new("sriov vf lifecycle");

    runner
        .run("netdevice-static-ip", || async {
            let ns = ctx.scenario_namespace("25959");
            attach_and_verify(&ctx, "25959", NetworkRequest::new("25959-net", ns)).await
        })
        .await;

    runner
        .run("trust-on-spoof-off", || async {
            let ns = ctx.scenario_namespace("25960");
            let request = NetworkRequest::new("25960-net", ns)
                .with_trust(true)
                .with_spoof_check(false);
            attach_and_verify(&ctx, "25960", request).await
        })
        .await;

    runner
        .run("vlan-link-enabled", || async {
            let ns = ctx.scenario_namespace("25961");
            let request = NetworkRequest::new("25961-net", ns)
                .with_vlan(100, Some(2))
                .with_link_state("enable");
            attach_and_verify(&ctx, "25961", request).await
        })
        .await;

    runner.finish().unwrap();
}
