//! Teardown command - remove one object and wait until it is gone
//!
//! Usage: sriov-e2e teardown --kind <kind> --name <name> [--namespace <ns>]
//!
//! Networks are removed together with the attachment the operator rendered
//! for them. Namespaced kinds default to the operator namespace.

use std::time::Duration;

use clap::Args;
use sriov_harness::{ResourceKind, ResourceRef, Teardown};

use super::Session;
use crate::{Error, Result};

/// Remove one object and wait until it is gone
#[derive(Args, Debug)]
pub struct TeardownArgs {
    /// Resource kind (e.g. policy, network, namespace, pod, nad)
    #[arg(long)]
    pub kind: String,

    /// Object name
    #[arg(long)]
    pub name: String,

    /// Namespace for namespaced kinds (defaults to the operator namespace)
    #[arg(short = 'n', long)]
    pub namespace: Option<String>,

    /// Override the removal deadline
    #[arg(long)]
    pub timeout_secs: Option<u64>,
}

/// Reference named by the arguments
pub fn resolve(session: &Session, args: &TeardownArgs) -> Result<ResourceRef> {
    let kind = ResourceKind::parse(&args.kind)
        .ok_or_else(|| Error::validation(format!("unknown resource kind {:?}", args.kind)))?;
    if !kind.is_namespaced() {
        if args.namespace.is_some() {
            return Err(Error::validation(format!("{kind} is cluster-scoped")));
        }
        return Ok(ResourceRef::cluster(kind, &args.name));
    }
    let namespace = args
        .namespace
        .as_deref()
        .unwrap_or(&session.config.operator_namespace);
    Ok(ResourceRef::namespaced(kind, &args.name, namespace))
}

pub async fn run(session: &Session, args: &TeardownArgs) -> Result<()> {
    let reference = remove(session, args).await?;
    println!("{reference} removed");
    Ok(())
}

pub async fn remove(session: &Session, args: &TeardownArgs) -> Result<ResourceRef> {
    let reference = resolve(session, args)?;
    let teardown = Teardown::new(
        session.store.clone(),
        session.config.timeouts.clone(),
        session.cancel.clone(),
    );
    let timeout = args
        .timeout_secs
        .map(Duration::from_secs)
        .unwrap_or_else(|| teardown.timeout_for(reference.kind));

    match (reference.kind, reference.namespace.as_deref()) {
        (ResourceKind::Network, Some(namespace)) => {
            teardown
                .remove_network(&reference.name, namespace, timeout)
                .await?
        }
        _ => teardown.remove(&reference, timeout).await?,
    }
    Ok(reference)
}
