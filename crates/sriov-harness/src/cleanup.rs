//! Cleanup stack
//!
//! Scenarios push one action per object they create and unwind the stack at
//! the end, newest first, so dependents are removed before what they depend
//! on (network before policy, namespace last).

use std::fmt;

use sriov_common::{Error, Result};
use tracing::{info, warn};

use crate::store::ResourceRef;
use crate::teardown::Teardown;

/// One deferred removal
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CleanupAction {
    /// Plain removal of one object
    Remove(ResourceRef),
    /// Network removal including its rendered attachment
    RemoveNetwork {
        /// Network name
        name: String,
        /// Namespace holding the SriovNetwork
        operator_namespace: String,
        /// Namespace the attachment was rendered into, when known
        target_namespace: Option<String>,
    },
}

impl fmt::Display for CleanupAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Remove(r) => write!(f, "remove {r}"),
            Self::RemoveNetwork {
                name,
                operator_namespace,
                ..
            } => write!(f, "remove network {operator_namespace}/{name}"),
        }
    }
}

impl CleanupAction {
    async fn run(&self, teardown: &Teardown) -> Result<()> {
        match self {
            Self::Remove(r) => teardown.remove(r, teardown.timeout_for(r.kind)).await,
            Self::RemoveNetwork {
                name,
                operator_namespace,
                target_namespace,
            } => {
                teardown
                    .remove_network_with_target(
                        name,
                        operator_namespace,
                        target_namespace.as_deref(),
                        teardown.timeout_for(crate::store::ResourceKind::Network),
                    )
                    .await
            }
        }
    }
}

/// LIFO list of cleanup actions
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CleanupStack {
    actions: Vec<CleanupAction>,
}

impl CleanupStack {
    /// Empty stack
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an action to run before everything already registered
    pub fn push(&mut self, action: CleanupAction) {
        self.actions.push(action);
    }

    /// Move every action of `other` on top of this stack, keeping their order
    pub fn append(&mut self, mut other: CleanupStack) {
        self.actions.append(&mut other.actions);
    }

    /// Pending actions, oldest first
    pub fn actions(&self) -> &[CleanupAction] {
        &self.actions
    }

    /// Number of pending actions
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// Whether nothing is pending
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Run every action newest first, continuing past failures
    ///
    /// The stack is empty afterwards. Returns the failures in the order they
    /// happened.
    pub async fn unwind(&mut self, teardown: &Teardown) -> Vec<Error> {
        let mut failures = Vec::new();
        while let Some(action) = self.actions.pop() {
            match action.run(teardown).await {
                Ok(()) => info!(action = %action, "Cleanup done"),
                Err(e) => {
                    warn!(action = %action, error = %e, "Cleanup failed, continuing");
                    failures.push(e);
                }
            }
        }
        failures
    }

    /// As [`CleanupStack::unwind`], folding failures into one [`Error::Teardown`]
    pub async fn unwind_checked(&mut self, teardown: &Teardown) -> Result<()> {
        let failures = self.unwind(teardown).await;
        if failures.is_empty() {
            return Ok(());
        }
        Err(Error::teardown(
            "cleanup stack",
            failures
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; "),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::*;
    use crate::store::{MemoryStore, ResourceKind};
    use sriov_common::Timeouts;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    const OPS: &str = "openshift-sriov-network-operator";

    #[tokio::test(start_paused = true)]
    async fn story_unwind_removes_newest_first() {
        let store = Arc::new(MemoryStore::new());
        operator_renders_attachments(&store, OPS);
        store.insert_typed(ResourceKind::Namespace, &namespace("e2e-a")).unwrap();
        store.insert_typed(ResourceKind::Policy, &policy("e810c", OPS)).unwrap();
        store
            .insert_typed(ResourceKind::Network, &network("net", OPS, Some("e2e-a")))
            .unwrap();
        let teardown = Teardown::new(store.clone(), Timeouts::default(), CancellationToken::new());

        let mut stack = CleanupStack::new();
        stack.push(CleanupAction::Remove(ResourceRef::cluster(ResourceKind::Namespace, "e2e-a")));
        stack.push(CleanupAction::Remove(ResourceRef::namespaced(
            ResourceKind::Policy,
            "e810c",
            OPS,
        )));
        stack.push(CleanupAction::RemoveNetwork {
            name: "net".to_string(),
            operator_namespace: OPS.to_string(),
            target_namespace: Some("e2e-a".to_string()),
        });

        assert!(stack.unwind(&teardown).await.is_empty());
        assert!(stack.is_empty());
        assert!(store.names(ResourceKind::Network).is_empty());
        assert!(store.names(ResourceKind::Policy).is_empty());
        assert!(store.names(ResourceKind::Namespace).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn story_unwind_continues_after_failure() {
        let store = Arc::new(MemoryStore::new());
        store.insert_typed(ResourceKind::Namespace, &namespace("e2e-stuck")).unwrap();
        store.insert_typed(ResourceKind::Namespace, &namespace("e2e-ok")).unwrap();
        let stuck = ResourceRef::cluster(ResourceKind::Namespace, "e2e-stuck");
        store.ignore_deletes(&stuck, 2);
        let teardown = Teardown::new(store.clone(), Timeouts::default(), CancellationToken::new());

        let mut stack = CleanupStack::new();
        stack.push(CleanupAction::Remove(ResourceRef::cluster(ResourceKind::Namespace, "e2e-ok")));
        stack.push(CleanupAction::Remove(stuck.clone()));

        let err = stack.unwind_checked(&teardown).await.unwrap_err();
        assert!(err.to_string().contains("e2e-stuck"));
        assert_eq!(store.names(ResourceKind::Namespace), vec!["e2e-stuck".to_string()]);
    }

    #[test]
    fn test_append_keeps_order() {
        let a = CleanupAction::Remove(ResourceRef::cluster(ResourceKind::Namespace, "a"));
        let b = CleanupAction::Remove(ResourceRef::cluster(ResourceKind::Namespace, "b"));
        let mut outer = CleanupStack::new();
        outer.push(a.clone());
        let mut inner = CleanupStack::new();
        inner.push(b.clone());
        outer.append(inner);
        assert_eq!(outer.actions(), &[a, b]);
        assert_eq!(outer.len(), 2);
    }
}
