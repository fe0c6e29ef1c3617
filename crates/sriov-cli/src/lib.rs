//! SR-IOV e2e CLI library

pub mod commands;
pub mod error;

pub use error::{Error, Result};

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use sriov_common::telemetry::LogFormat;

/// SR-IOV e2e harness - convergence waits, provisioning and snapshots
#[derive(Parser, Debug)]
#[command(name = "sriov-e2e")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to kubeconfig (in-cluster or KUBECONFIG inferred when omitted)
    #[arg(short = 'k', long, global = true)]
    pub kubeconfig: Option<PathBuf>,

    /// Log output format: text or json
    #[arg(long, global = true, default_value = "text")]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Remove leftovers of earlier runs (scenario namespaces, networks, policies)
    Reap,
    /// Wait until policies are synced, pools updated and workers ready
    WaitStable(commands::wait_stable::WaitStableArgs),
    /// Provision a device policy, network and attachment
    Provision(commands::provision::ProvisionArgs),
    /// Remove one object and wait until it is gone
    Teardown(commands::teardown::TeardownArgs),
    /// Capture policies, networks and node sync status as JSON
    Snapshot(commands::snapshot::SnapshotArgs),
    /// Compare two snapshot files
    Diff(commands::diff::DiffArgs),
}

impl Cli {
    /// Run the CLI command
    pub async fn run(self) -> Result<()> {
        use commands::Session;

        let kubeconfig = self.kubeconfig.as_deref();
        match self.command {
            Commands::Reap => commands::reap::run(&Session::connect(kubeconfig).await?).await,
            Commands::WaitStable(args) => {
                commands::wait_stable::run(&Session::connect(kubeconfig).await?, &args).await
            }
            Commands::Provision(args) => {
                commands::provision::run(&Session::connect(kubeconfig).await?, &args).await
            }
            Commands::Teardown(args) => {
                commands::teardown::run(&Session::connect(kubeconfig).await?, &args).await
            }
            Commands::Snapshot(args) => {
                commands::snapshot::run(&Session::connect(kubeconfig).await?, &args).await
            }
            Commands::Diff(args) => commands::diff::run(&args),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_flags_parse_after_subcommand() {
        let cli = Cli::try_parse_from([
            "sriov-e2e",
            "provision",
            "--device",
            "e810c",
            "--log-format",
            "json",
            "-k",
            "/tmp/kubeconfig",
        ])
        .unwrap();
        assert_eq!(cli.log_format, LogFormat::Json);
        assert_eq!(cli.kubeconfig, Some(PathBuf::from("/tmp/kubeconfig")));
        assert!(matches!(cli.command, Commands::Provision(ref a) if a.device == "e810c"));
    }

    #[test]
    fn test_provision_accepts_mtu() {
        let cli =
            Cli::try_parse_from(["sriov-e2e", "provision", "--device", "e810c", "--mtu", "9000"])
                .unwrap();
        assert!(matches!(cli.command, Commands::Provision(ref a) if a.mtu == Some(9000)));
        assert!(
            Cli::try_parse_from(["sriov-e2e", "provision", "--device", "e810c", "--mtu", "big"])
                .is_err()
        );
    }

    #[test]
    fn test_unknown_log_format_is_rejected() {
        assert!(Cli::try_parse_from(["sriov-e2e", "--log-format", "xml", "reap"]).is_err());
    }

    #[test]
    fn test_diff_requires_two_files() {
        assert!(Cli::try_parse_from(["sriov-e2e", "diff", "before.json"]).is_err());
        let cli = Cli::try_parse_from(["sriov-e2e", "diff", "a.json", "b.json"]).unwrap();
        assert!(matches!(cli.command, Commands::Diff(_)));
    }

    #[test]
    fn test_cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
