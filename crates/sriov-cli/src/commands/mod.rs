//! CLI commands

use std::path::Path;
use std::sync::Arc;

use sriov_common::kube_utils::{api_ready_retry, create_client, wait_for_api_ready};
use sriov_common::HarnessConfig;
use sriov_harness::{KubeStore, ResourceStore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::Result;

pub mod diff;
pub mod provision;
pub mod reap;
pub mod snapshot;
pub mod teardown;
pub mod wait_stable;

/// Store, configuration and cancellation shared by cluster commands
pub struct Session {
    pub config: Arc<HarnessConfig>,
    pub store: Arc<dyn ResourceStore>,
    pub cancel: CancellationToken,
}

impl Session {
    /// Session over an existing store
    pub fn new(store: Arc<dyn ResourceStore>, config: HarnessConfig) -> Self {
        Self {
            config: Arc::new(config),
            store,
            cancel: CancellationToken::new(),
        }
    }

    /// Connect to the cluster and read `SRIOV_*` configuration
    ///
    /// Ctrl-C cancels any wait in progress so partial work is still reported.
    pub async fn connect(kubeconfig: Option<&Path>) -> Result<Self> {
        let config = HarnessConfig::from_env()?;
        let client = create_client(kubeconfig).await?;
        wait_for_api_ready(&client, &api_ready_retry()).await?;
        debug!(
            operator_namespace = %config.operator_namespace,
            worker_selector = %config.worker_selector,
            devices = config.devices.len(),
            "Connected"
        );
        let session = Self::new(Arc::new(KubeStore::new(client)), config);

        let cancel = session.cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, cancelling");
                cancel.cancel();
            }
        });
        Ok(session)
    }
}
