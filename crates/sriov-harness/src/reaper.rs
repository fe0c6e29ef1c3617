//! Leftover resource sweep
//!
//! Runs once before a suite. Earlier aborted runs can leave scenario
//! namespaces, networks and policies behind; they would collide with the
//! names the next run creates, so anything matching the suite's naming
//! convention is removed. The sweep is best-effort and never fails.

use std::sync::{Arc, LazyLock};

use kube::ResourceExt;
use regex::Regex;
use sriov_common::{DeviceDescriptor, HarnessConfig};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::store::{DeleteMode, ListScope, ResourceKind, ResourceRef, ResourceStore};
use crate::teardown::Teardown;

/// Networks created by scenarios: numeric test-case prefixes and DPDK networks
static LEFTOVER_NETWORK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{5}-|\w+dpdknet$").expect("leftover network pattern is valid"));

/// Policy prefixes used by scenarios beyond the configured device names
pub const EXTRA_POLICY_PREFIXES: [&str; 1] = ["cx5ex"];

/// Whether a network name follows the scenario naming convention
pub fn is_leftover_network(name: &str) -> bool {
    LEFTOVER_NETWORK.is_match(name)
}

/// Whether a policy name equals or extends a device name
pub fn is_leftover_policy(name: &str, devices: &[DeviceDescriptor]) -> bool {
    devices
        .iter()
        .map(|d| d.name.as_str())
        .chain(EXTRA_POLICY_PREFIXES)
        .any(|prefix| name.starts_with(prefix))
}

/// What a sweep removed and what it could not
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReapSummary {
    /// Namespaces removed
    pub namespaces: Vec<String>,
    /// Networks deleted
    pub networks: Vec<String>,
    /// Policies deleted
    pub policies: Vec<String>,
    /// One message per failed list or removal
    pub failures: Vec<String>,
}

impl ReapSummary {
    /// Number of objects removed
    pub fn removed(&self) -> usize {
        self.namespaces.len() + self.networks.len() + self.policies.len()
    }

    /// Nothing failed
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Startup sweep of leftovers from earlier runs
pub struct Reaper {
    store: Arc<dyn ResourceStore>,
    config: Arc<HarnessConfig>,
    teardown: Teardown,
}

impl Reaper {
    /// Create a reaper
    pub fn new(
        store: Arc<dyn ResourceStore>,
        config: Arc<HarnessConfig>,
        cancel: CancellationToken,
    ) -> Self {
        let teardown = Teardown::new(store.clone(), config.timeouts.clone(), cancel);
        Self {
            store,
            config,
            teardown,
        }
    }

    /// Remove scenario namespaces, then leftover networks, then leftover policies
    pub async fn sweep(&self) -> ReapSummary {
        let mut summary = ReapSummary::default();
        self.sweep_namespaces(&mut summary).await;
        self.sweep_networks(&mut summary).await;
        self.sweep_policies(&mut summary).await;

        if summary.is_clean() {
            info!(removed = summary.removed(), "Leftover sweep complete");
        } else {
            warn!(
                removed = summary.removed(),
                failures = summary.failures.len(),
                "Leftover sweep finished with failures"
            );
        }
        summary
    }

    async fn list_names(
        &self,
        kind: ResourceKind,
        scope: &ListScope,
        summary: &mut ReapSummary,
    ) -> Vec<String> {
        match self.store.list(kind, scope).await {
            Ok(objects) => objects.iter().map(|o| o.name_any()).collect(),
            Err(e) => {
                warn!(kind = %kind, error = %e, "Listing leftovers failed");
                summary.failures.push(format!("list {kind}: {e}"));
                Vec::new()
            }
        }
    }

    async fn sweep_namespaces(&self, summary: &mut ReapSummary) {
        let prefix = self.config.namespace_prefix.as_str();
        let names = self
            .list_names(ResourceKind::Namespace, &ListScope::all(), summary)
            .await;
        for name in names.into_iter().filter(|n| n.starts_with(prefix)) {
            let reference = ResourceRef::cluster(ResourceKind::Namespace, &name);
            match self
                .teardown
                .remove(&reference, self.config.timeouts.cleanup)
                .await
            {
                Ok(()) => {
                    info!(namespace = %name, "Removed leftover namespace");
                    summary.namespaces.push(name);
                }
                Err(e) => {
                    warn!(namespace = %name, error = %e, "Leftover namespace not removed");
                    summary.failures.push(e.to_string());
                }
            }
        }
    }

    async fn sweep_networks(&self, summary: &mut ReapSummary) {
        let scope = ListScope::namespace(&self.config.operator_namespace);
        let names = self
            .list_names(ResourceKind::Network, &scope, summary)
            .await;
        for name in names.into_iter().filter(|n| is_leftover_network(n)) {
            if self.delete(ResourceKind::Network, &name, summary).await {
                summary.networks.push(name);
            }
        }
    }

    async fn sweep_policies(&self, summary: &mut ReapSummary) {
        let scope = ListScope::namespace(&self.config.operator_namespace);
        let names = self.list_names(ResourceKind::Policy, &scope, summary).await;
        for name in names
            .into_iter()
            .filter(|n| is_leftover_policy(n, &self.config.devices))
        {
            if self.delete(ResourceKind::Policy, &name, summary).await {
                summary.policies.push(name);
            }
        }
    }

    /// Plain delete; an object that is already gone counts as removed
    async fn delete(&self, kind: ResourceKind, name: &str, summary: &mut ReapSummary) -> bool {
        let reference = ResourceRef::namespaced(kind, name, &self.config.operator_namespace);
        match self.store.delete(&reference, DeleteMode::Normal).await {
            Ok(()) => {
                info!(resource = %reference, "Deleted leftover");
                true
            }
            Err(e) if e.is_not_found() => true,
            Err(e) => {
                warn!(resource = %reference, error = %e, "Leftover not deleted");
                summary.failures.push(e.to_string());
                false
            }
        }
    }
}
