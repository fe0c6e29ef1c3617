//! Diff command - compare two snapshot files
//!
//! Usage: sriov-e2e diff <before> <after> [--fail-on-change]

use std::path::{Path, PathBuf};

use clap::Args;
use sriov_harness::{diff, Change, Snapshot};

use crate::{Error, Result};

/// Compare two snapshots written by `sriov-e2e snapshot`
#[derive(Args, Debug)]
pub struct DiffArgs {
    /// Earlier snapshot
    pub before: PathBuf,

    /// Later snapshot
    pub after: PathBuf,

    /// Exit non-zero when the snapshots differ
    #[arg(long)]
    pub fail_on_change: bool,
}

pub fn run(args: &DiffArgs) -> Result<()> {
    let changes = compare(&args.before, &args.after)?;
    if changes.is_empty() {
        println!("no changes");
        return Ok(());
    }
    for change in &changes {
        println!("{change}");
    }
    if args.fail_on_change {
        return Err(Error::command_failed(format!(
            "{} change(s) between snapshots",
            changes.len()
        )));
    }
    Ok(())
}

pub fn compare(before: &Path, after: &Path) -> Result<Vec<Change>> {
    Ok(diff(&load(before)?, &load(after)?))
}

fn load(path: &Path) -> Result<Snapshot> {
    let raw = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
    Ok(Snapshot::from_json(&raw)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, file: &str, snapshot: &Snapshot) -> PathBuf {
        let path = dir.join(file);
        std::fs::write(&path, snapshot.to_json().unwrap()).unwrap();
        path
    }

    fn snapshot(policies: &[&str], nodes: &[(&str, &str)]) -> Snapshot {
        Snapshot::new(
            policies.iter().map(|p| p.to_string()),
            Vec::new(),
            nodes.iter().map(|(n, s)| (n.to_string(), s.to_string())),
        )
    }

    #[test]
    fn test_identical_snapshots_pass_even_when_strict() {
        let dir = tempfile::tempdir().unwrap();
        let snap = snapshot(&["e810c"], &[("worker-0", "Succeeded")]);
        let args = DiffArgs {
            before: write(dir.path(), "a.json", &snap),
            after: write(dir.path(), "b.json", &snap),
            fail_on_change: true,
        };
        assert!(run(&args).is_ok());
    }

    #[test]
    fn test_changes_fail_only_when_strict() {
        let dir = tempfile::tempdir().unwrap();
        let before = write(
            dir.path(),
            "a.json",
            &snapshot(&["e810c"], &[("worker-0", "Succeeded")]),
        );
        let after = write(
            dir.path(),
            "b.json",
            &snapshot(&[], &[("worker-0", "InProgress")]),
        );

        let changes = compare(&before, &after).unwrap();
        assert_eq!(
            changes,
            vec![
                Change::PolicyRemoved("e810c".to_string()),
                Change::NodeStatusChanged {
                    node: "worker-0".to_string(),
                    from: "Succeeded".to_string(),
                    to: "InProgress".to_string(),
                },
            ]
        );

        let mut args = DiffArgs {
            before,
            after,
            fail_on_change: false,
        };
        assert!(run(&args).is_ok());
        args.fail_on_change = true;
        assert!(matches!(run(&args), Err(Error::CommandFailed { .. })));
    }

    #[test]
    fn test_missing_or_malformed_files_error() {
        let dir = tempfile::tempdir().unwrap();
        let garbage = dir.path().join("garbage.json");
        std::fs::write(&garbage, "not json").unwrap();
        let missing = dir.path().join("missing.json");

        assert!(matches!(
            compare(&missing, &garbage),
            Err(Error::Io { .. })
        ));
        assert!(matches!(
            compare(&garbage, &garbage),
            Err(Error::Harness(_))
        ));
    }
}
