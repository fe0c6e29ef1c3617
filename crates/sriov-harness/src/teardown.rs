//! Idempotent teardown
//!
//! Removal is "make it absent", not "issue a delete": an object that is
//! already gone is success without a delete call, a delete is always followed
//! by a wait for disappearance, and a wait that runs out of time gets exactly
//! one forced re-delete before the failure is surfaced.
//!
//! Networks need extra care because the operator renders their attachment
//! definition into another namespace; a network is only torn down once that
//! attachment is confirmed gone as well.

use std::sync::Arc;
use std::time::Duration;

use kube::ResourceExt;
use sriov_common::crd::SriovNetwork;
use sriov_common::kube_utils::from_dynamic;
use sriov_common::retry::{retry_if, RetryConfig};
use sriov_common::{Error, Result, Timeouts};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::poll::{poll_until, ReadinessTarget};
use crate::predicates::resource_absent;
use crate::store::{get_opt, DeleteMode, ListScope, ResourceKind, ResourceRef, ResourceStore};

/// How long a force-deleted object may stay visible while the API server finishes removing it
pub const FORCE_DELETE_GRACE: Duration = Duration::from_secs(60);

/// Removes objects and waits until they are gone
#[derive(Clone)]
pub struct Teardown {
    store: Arc<dyn ResourceStore>,
    timeouts: Timeouts,
    cancel: CancellationToken,
}

impl Teardown {
    /// Create a teardown helper sharing the scenario's cancellation token
    pub fn new(
        store: Arc<dyn ResourceStore>,
        timeouts: Timeouts,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            store,
            timeouts,
            cancel,
        }
    }

    /// Default removal deadline for a kind
    pub fn timeout_for(&self, kind: ResourceKind) -> Duration {
        match kind {
            ResourceKind::Namespace => self.timeouts.cleanup,
            _ => self.timeouts.delete,
        }
    }

    /// Make `reference` absent within `timeout`
    ///
    /// Absent objects are left alone. Otherwise deletes, waits, and on
    /// deadline force-deletes once before giving up with [`Error::Teardown`].
    pub async fn remove(&self, reference: &ResourceRef, timeout: Duration) -> Result<()> {
        if self.lookup(reference).await?.is_none() {
            debug!(resource = %reference, "Already absent");
            return Ok(());
        }
        if !self.delete(reference, DeleteMode::Normal).await? {
            debug!(resource = %reference, "Disappeared before delete");
            return Ok(());
        }
        self.await_absence(reference, timeout).await?;
        info!(resource = %reference, "Removed");
        Ok(())
    }

    /// Remove a SriovNetwork and wait for its rendered attachment to disappear
    ///
    /// The attachment's namespace is read from the network's
    /// `networkNamespace` (empty means the operator namespace).
    pub async fn remove_network(
        &self,
        name: &str,
        operator_namespace: &str,
        timeout: Duration,
    ) -> Result<()> {
        self.remove_network_with_target(name, operator_namespace, None, timeout)
            .await
    }

    /// As [`Teardown::remove_network`], with a target namespace known in advance
    ///
    /// A known target lets the attachment check run even when the network
    /// itself is already gone.
    pub async fn remove_network_with_target(
        &self,
        name: &str,
        operator_namespace: &str,
        known_target: Option<&str>,
        timeout: Duration,
    ) -> Result<()> {
        let reference = ResourceRef::namespaced(ResourceKind::Network, name, operator_namespace);
        let target_namespace = match self.lookup(&reference).await? {
            Some(obj) => {
                let network: SriovNetwork = from_dynamic(&obj)?;
                network.target_namespace(operator_namespace).to_string()
            }
            None => match known_target {
                Some(ns) => ns.to_string(),
                None => {
                    debug!(resource = %reference, "Network already absent");
                    return Ok(());
                }
            },
        };

        self.remove(&reference, timeout).await?;

        if target_namespace != operator_namespace {
            let attachment =
                ResourceRef::namespaced(ResourceKind::Attachment, name, &target_namespace);
            if self.lookup(&attachment).await?.is_none() {
                debug!(resource = %attachment, "Attachment already absent");
                return Ok(());
            }
            self.await_absence(&attachment, self.timeouts.attachment).await?;
            info!(resource = %attachment, "Cascaded attachment removed");
        }
        Ok(())
    }

    /// Remove every network in the operator namespace that targets `target_namespace`
    ///
    /// Best-effort: all networks are attempted and failures are aggregated.
    pub async fn remove_networks_for_namespace(
        &self,
        operator_namespace: &str,
        target_namespace: &str,
    ) -> Result<usize> {
        let objects = self
            .store
            .list(ResourceKind::Network, &ListScope::namespace(operator_namespace))
            .await?;

        let mut removed = 0;
        let mut failures = Vec::new();
        for obj in &objects {
            let network: SriovNetwork = from_dynamic(obj)?;
            if network.target_namespace(operator_namespace) != target_namespace {
                continue;
            }
            let name = network.name_any();
            match self
                .remove_network_with_target(
                    &name,
                    operator_namespace,
                    Some(target_namespace),
                    self.timeouts.delete,
                )
                .await
            {
                Ok(()) => removed += 1,
                Err(e) => failures.push(format!("{name}: {e}")),
            }
        }

        if failures.is_empty() {
            Ok(removed)
        } else {
            Err(Error::teardown(
                format!("networks targeting {target_namespace}"),
                failures.join("; "),
            ))
        }
    }

    async fn lookup(&self, reference: &ResourceRef) -> Result<Option<kube::api::DynamicObject>> {
        let store = self.store.as_ref();
        retry_if(
            &RetryConfig::mutation(),
            "teardown lookup",
            Error::is_transient,
            || async move { get_opt(store, reference).await },
        )
        .await
    }

    /// Issue a delete; `Ok(false)` when the object was already gone
    async fn delete(&self, reference: &ResourceRef, mode: DeleteMode) -> Result<bool> {
        let store = self.store.as_ref();
        let result = retry_if(
            &RetryConfig::mutation(),
            "teardown delete",
            Error::is_transient,
            || async move { store.delete(reference, mode).await },
        )
        .await;
        match result {
            Ok(()) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn await_absence(&self, reference: &ResourceRef, timeout: Duration) -> Result<()> {
        let store = self.store.as_ref();
        let target = ReadinessTarget::new(
            format!("{reference} to disappear"),
            self.timeouts.poll_interval,
            timeout,
        );
        let waited = poll_until(&target, &self.cancel, || async move {
            resource_absent(store, reference).await
        })
        .await;

        match waited {
            Ok(()) => Ok(()),
            Err(e) if e.is_deadline() => {
                warn!(
                    resource = %reference,
                    timeout_secs = timeout.as_secs(),
                    "Still present, forcing delete"
                );
                self.delete(reference, DeleteMode::Force).await?;
                let grace = ReadinessTarget::new(
                    format!("{reference} to disappear after forced delete"),
                    self.timeouts.poll_interval,
                    FORCE_DELETE_GRACE,
                );
                match poll_until(&grace, &self.cancel, || async move {
                    resource_absent(store, reference).await
                })
                .await
                {
                    Ok(()) => {
                        info!(resource = %reference, "Removed by forced delete");
                        Ok(())
                    }
                    Err(grace_err) if grace_err.is_deadline() => Err(Error::teardown(
                        reference.to_string(),
                        format!("still present after forced delete ({e})"),
                    )),
                    Err(grace_err) => Err(grace_err),
                }
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::*;
    use crate::store::{MemoryStore, StoreOp};
    use sriov_common::StoreErrorKind;

    const OPS: &str = "openshift-sriov-network-operator";

    fn teardown(store: &Arc<MemoryStore>) -> Teardown {
        Teardown::new(store.clone(), Timeouts::default(), CancellationToken::new())
    }

    fn ns_ref(name: &str) -> ResourceRef {
        ResourceRef::cluster(ResourceKind::Namespace, name)
    }

    #[tokio::test(start_paused = true)]
    async fn story_double_teardown_issues_no_second_delete() {
        let store = Arc::new(MemoryStore::new());
        store.insert_typed(ResourceKind::Namespace, &namespace("e2e-a")).unwrap();
        let td = teardown(&store);
        let r = ns_ref("e2e-a");

        td.remove(&r, Duration::from_secs(30)).await.unwrap();
        assert_eq!(store.delete_calls(&r), 1);

        td.remove(&r, Duration::from_secs(30)).await.unwrap();
        assert_eq!(store.delete_calls(&r), 1);
        assert!(!store.contains(&r));
    }

    #[tokio::test(start_paused = true)]
    async fn test_absent_object_is_success() {
        let store = Arc::new(MemoryStore::new());
        teardown(&store)
            .remove(&ns_ref("never-existed"), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(store.calls(StoreOp::Delete, ResourceKind::Namespace), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn story_stuck_object_gets_one_forced_delete() {
        let store = Arc::new(MemoryStore::new());
        store.insert_typed(ResourceKind::Namespace, &namespace("e2e-stuck")).unwrap();
        let r = ns_ref("e2e-stuck");
        store.ignore_deletes(&r, 1);

        teardown(&store).remove(&r, Duration::from_secs(20)).await.unwrap();
        assert_eq!(store.delete_calls(&r), 2);
        assert!(!store.contains(&r));
    }

    #[tokio::test(start_paused = true)]
    async fn story_forced_delete_waits_for_terminating_object() {
        let store = Arc::new(MemoryStore::new());
        store.insert_typed(ResourceKind::Namespace, &namespace("e2e-slow")).unwrap();
        let r = ns_ref("e2e-slow");
        store.ignore_deletes(&r, 1);
        // the forced delete is accepted but the namespace stays terminating for a while
        store.linger_after_delete(&r, 3);

        let started = tokio::time::Instant::now();
        teardown(&store).remove(&r, Duration::from_secs(20)).await.unwrap();
        assert_eq!(store.delete_calls(&r), 2);
        assert!(!store.contains(&r));
        assert!(started.elapsed() < Duration::from_secs(20) + FORCE_DELETE_GRACE);
    }

    #[tokio::test(start_paused = true)]
    async fn story_object_surviving_forced_delete_is_an_error() {
        let store = Arc::new(MemoryStore::new());
        store.insert_typed(ResourceKind::Namespace, &namespace("e2e-stuck")).unwrap();
        let r = ns_ref("e2e-stuck");
        store.ignore_deletes(&r, 5);

        let err = teardown(&store).remove(&r, Duration::from_secs(20)).await.unwrap_err();
        assert!(matches!(err, Error::Teardown { .. }));
        assert!(err.to_string().contains("e2e-stuck"));
        assert_eq!(store.delete_calls(&r), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn story_network_teardown_waits_for_cascaded_attachment() {
        let store = Arc::new(MemoryStore::new());
        store
            .insert_typed(ResourceKind::Network, &network("net-a", OPS, Some("e2e-a")))
            .unwrap();
        store
            .insert_typed(ResourceKind::Attachment, &attachment("net-a", "e2e-a"))
            .unwrap();
        // no operator reacts here, so only the forced delete removes the attachment
        let nad = ResourceRef::namespaced(ResourceKind::Attachment, "net-a", "e2e-a");

        teardown(&store)
            .remove_network("net-a", OPS, Duration::from_secs(30))
            .await
            .unwrap();

        assert!(!store.contains(&nad));
        assert_eq!(store.delete_calls(&nad), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn story_network_teardown_never_succeeds_while_attachment_exists() {
        let store = Arc::new(MemoryStore::new());
        store
            .insert_typed(ResourceKind::Network, &network("net-a", OPS, Some("e2e-a")))
            .unwrap();
        store
            .insert_typed(ResourceKind::Attachment, &attachment("net-a", "e2e-a"))
            .unwrap();
        let nad = ResourceRef::namespaced(ResourceKind::Attachment, "net-a", "e2e-a");
        store.ignore_deletes(&nad, 1);

        let err = teardown(&store)
            .remove_network("net-a", OPS, Duration::from_secs(30))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Teardown { .. }));
        assert!(store.contains(&nad));
    }

    #[tokio::test(start_paused = true)]
    async fn test_network_in_operator_namespace_skips_cascade() {
        let store = Arc::new(MemoryStore::new());
        operator_renders_attachments(&store, OPS);
        store.insert_typed(ResourceKind::Network, &network("net-b", OPS, None)).unwrap();

        teardown(&store)
            .remove_network("net-b", OPS, Duration::from_secs(30))
            .await
            .unwrap();
        assert_eq!(store.calls(StoreOp::Get, ResourceKind::Attachment), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_known_target_checks_attachment_after_network_is_gone() {
        let store = Arc::new(MemoryStore::new());
        store
            .insert_typed(ResourceKind::Attachment, &attachment("net-c", "e2e-c"))
            .unwrap();

        teardown(&store)
            .remove_network_with_target("net-c", OPS, Some("e2e-c"), Duration::from_secs(10))
            .await
            .unwrap();
        assert!(!store.contains(&ResourceRef::namespaced(
            ResourceKind::Attachment,
            "net-c",
            "e2e-c"
        )));
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_networks_for_namespace() {
        let store = Arc::new(MemoryStore::new());
        operator_renders_attachments(&store, OPS);
        store
            .insert_typed(ResourceKind::Network, &network("n1", OPS, Some("e2e-x")))
            .unwrap();
        store
            .insert_typed(ResourceKind::Network, &network("n2", OPS, Some("e2e-x")))
            .unwrap();
        store
            .insert_typed(ResourceKind::Network, &network("n3", OPS, Some("e2e-y")))
            .unwrap();

        let removed = teardown(&store)
            .remove_networks_for_namespace(OPS, "e2e-x")
            .await
            .unwrap();
        assert_eq!(removed, 2);
        assert_eq!(store.names(ResourceKind::Network), vec!["n3".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_delete_is_retried() {
        let store = Arc::new(MemoryStore::new());
        store.insert_typed(ResourceKind::Namespace, &namespace("e2e-t")).unwrap();
        store.inject_fault(ResourceKind::Namespace, StoreOp::Delete, StoreErrorKind::Transient, 1);
        let r = ns_ref("e2e-t");

        teardown(&store).remove(&r, Duration::from_secs(10)).await.unwrap();
        assert!(!store.contains(&r));
    }
}
