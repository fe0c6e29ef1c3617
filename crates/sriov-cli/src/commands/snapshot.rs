//! Snapshot command - capture SR-IOV configuration as JSON
//!
//! Usage: sriov-e2e snapshot [--output <file>]
//!
//! Writes policy names, network names and per-node sync status from the
//! operator namespace. Pair with `sriov-e2e diff` around disruptive steps.

use std::path::PathBuf;

use clap::Args;
use sriov_harness::{capture, Snapshot};
use tracing::info;

use super::Session;
use crate::{Error, Result};

/// Capture policies, networks and node sync status
#[derive(Args, Debug)]
pub struct SnapshotArgs {
    /// Write to this file instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

pub async fn run(session: &Session, args: &SnapshotArgs) -> Result<()> {
    let snapshot = take(session).await?;
    let json = snapshot.to_json()?;
    match &args.output {
        Some(path) => {
            std::fs::write(path, json).map_err(|e| Error::io(path, e))?;
            info!(path = %path.display(), "Snapshot written");
        }
        None => println!("{json}"),
    }
    Ok(())
}

pub async fn take(session: &Session) -> Result<Snapshot> {
    Ok(capture(session.store.as_ref(), &session.config.operator_namespace).await?)
}
