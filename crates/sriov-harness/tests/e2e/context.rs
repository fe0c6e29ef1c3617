//! Shared setup for cluster scenarios
//!
//! # Environment Variables
//!
//! - `KUBECONFIG`: cluster to test (inferred config otherwise)
//! - `ECO_SRIOV_TEST_CONTAINER`: image for workload pods
//! - every `SRIOV_*` variable read by `HarnessConfig::from_env`

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::core::v1::{Container, Namespace, Pod, PodSpec, SecurityContext};
use kube::api::ObjectMeta;
use sriov_common::kube_utils::{
    api_ready_retry, create_client, from_dynamic, to_dynamic, wait_for_api_ready,
};
use sriov_common::telemetry::{init_logging, LogFormat};
use sriov_common::HarnessConfig;
use sriov_harness::shell::interface_ready;
use sriov_harness::store::get_opt;
use sriov_harness::{
    poll_until, CleanupAction, CleanupStack, KubeShell, KubeStore, Provisioner, ReadinessTarget,
    Reaper, ResourceKind, ResourceRef, ResourceStore, Result, Teardown, WorkloadShell,
};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Image override for workload pods
pub const TEST_IMAGE_ENV: &str = "ECO_SRIOV_TEST_CONTAINER";
/// Workload image with iproute2 and test tooling
pub const DEFAULT_TEST_IMAGE: &str = "quay.io/openshift-kni/cnf-tests:4.16";
/// Multus secondary network annotation
pub const NETWORKS_ANNOTATION: &str = "k8s.v1.cni.cncf.io/networks";
/// First secondary interface inside the pod
pub const POD_INTERFACE: &str = "net1";

const POD_RUNNING_TIMEOUT: Duration = Duration::from_secs(300);
const INTERFACE_TIMEOUT: Duration = Duration::from_secs(60);

/// Cluster connection and collaborators for one test binary run
pub struct E2eContext {
    pub config: Arc<HarnessConfig>,
    pub store: Arc<dyn ResourceStore>,
    pub shell: Arc<dyn WorkloadShell>,
    pub cancel: CancellationToken,
    image: String,
}

impl E2eContext {
    /// Connect using the ambient kubeconfig and `SRIOV_*` environment
    pub async fn connect() -> Self {
        let _ = init_logging(LogFormat::Text);
        let config = HarnessConfig::from_env().expect("harness configuration should be valid");
        let client = create_client(None)
            .await
            .expect("kube client should be created");
        wait_for_api_ready(&client, &api_ready_retry())
            .await
            .expect("API server should be reachable");
        Self {
            config: Arc::new(config),
            store: Arc::new(KubeStore::new(client.clone())),
            shell: Arc::new(KubeShell::new(client)),
            cancel: CancellationToken::new(),
            image: std::env::var(TEST_IMAGE_ENV).unwrap_or_else(|_| DEFAULT_TEST_IMAGE.to_string()),
        }
    }

    pub fn provisioner(&self) -> Provisioner {
        Provisioner::new(self.store.clone(), self.config.clone(), self.cancel.clone())
    }

    pub fn teardown(&self) -> Teardown {
        Teardown::new(
            self.store.clone(),
            self.config.timeouts.clone(),
            self.cancel.clone(),
        )
    }

    pub fn reaper(&self) -> Reaper {
        Reaper::new(self.store.clone(), self.config.clone(), self.cancel.clone())
    }

    /// Namespace name following the convention the reaper sweeps
    pub fn scenario_namespace(&self, case: &str) -> String {
        format!("{}{case}", self.config.namespace_prefix)
    }

    /// Create a scenario namespace and register its removal
    pub async fn create_namespace(&self, name: &str, cleanup: &mut CleanupStack) -> Result<()> {
        let ns = Namespace {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        cleanup.push(CleanupAction::Remove(ResourceRef::cluster(
            ResourceKind::Namespace,
            name,
        )));
        self.store
            .create(ResourceKind::Namespace, &to_dynamic(&ns)?)
            .await?;
        info!(namespace = name, "Created scenario namespace");
        Ok(())
    }

    /// Privileged pod with one secondary interface on `network`, static MAC and IP
    pub async fn create_test_pod(
        &self,
        namespace: &str,
        name: &str,
        network: &str,
        mac: &str,
        ip: &str,
        cleanup: &mut CleanupStack,
    ) -> Result<()> {
        let annotation = serde_json::json!([{ "name": network, "mac": mac, "ips": [ip] }]);
        let pod = Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                annotations: Some(BTreeMap::from([(
                    NETWORKS_ANNOTATION.to_string(),
                    annotation.to_string(),
                )])),
                ..Default::default()
            },
            spec: Some(PodSpec {
                containers: vec![Container {
                    name: "test".to_string(),
                    image: Some(self.image.clone()),
                    command: Some(vec!["sleep".to_string(), "INF".to_string()]),
                    security_context: Some(SecurityContext {
                        privileged: Some(true),
                        ..Default::default()
                    }),
                    ..Default::default()
                }],
                ..Default::default()
            }),
            ..Default::default()
        };
        cleanup.push(CleanupAction::Remove(ResourceRef::namespaced(
            ResourceKind::Pod,
            name,
            namespace,
        )));
        self.store
            .create(ResourceKind::Pod, &to_dynamic(&pod)?)
            .await?;
        self.wait_pod_running(namespace, name).await
    }

    async fn wait_pod_running(&self, namespace: &str, name: &str) -> Result<()> {
        let store = self.store.as_ref();
        let reference = ResourceRef::namespaced(ResourceKind::Pod, name, namespace);
        let reference = &reference;
        let target = ReadinessTarget::new(
            format!("pod {namespace}/{name} running"),
            self.config.timeouts.poll_interval,
            POD_RUNNING_TIMEOUT,
        );
        poll_until(&target, &self.cancel, || async move {
            let Some(obj) = get_opt(store, reference).await? else {
                return Ok(false);
            };
            let pod: Pod = from_dynamic(&obj)?;
            Ok(pod
                .status
                .and_then(|s| s.phase)
                .is_some_and(|phase| phase == "Running"))
        })
        .await
    }

    /// Wait until the pod's secondary interface is up
    pub async fn wait_interface_ready(&self, namespace: &str, pod: &str) -> Result<()> {
        let shell = self.shell.as_ref();
        let target = ReadinessTarget::new(
            format!("{POD_INTERFACE} up in {namespace}/{pod}"),
            self.config.timeouts.poll_interval,
            INTERFACE_TIMEOUT,
        );
        poll_until(&target, &self.cancel, || async move {
            interface_ready(shell, namespace, pod, POD_INTERFACE).await
        })
        .await
    }
}
