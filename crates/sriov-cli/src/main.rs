//! SR-IOV e2e CLI
//!
//! Operational entry point for the harness: leftover sweeps, convergence
//! waits, one-off provisioning and teardown, snapshots and their diffs.

use clap::Parser;

use sriov_cli::{Cli, Result};
use sriov_common::telemetry::init_logging;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_format)?;
    cli.run().await
}
