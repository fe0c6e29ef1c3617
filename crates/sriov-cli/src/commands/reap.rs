//! Reap command - remove leftovers of earlier runs
//!
//! Usage: sriov-e2e reap
//!
//! Sweeps scenario namespaces (`e2e-` prefix), networks named like scenario
//! networks and policies named after configured devices. Failures are
//! reported but do not fail the command.

use sriov_harness::{ReapSummary, Reaper};
use tracing::info;

use super::Session;
use crate::Result;

pub async fn run(session: &Session) -> Result<()> {
    let summary = sweep(session).await;
    println!("{}", render(&summary));
    Ok(())
}

pub async fn sweep(session: &Session) -> ReapSummary {
    let reaper = Reaper::new(
        session.store.clone(),
        session.config.clone(),
        session.cancel.clone(),
    );
    let summary = reaper.sweep().await;
    info!(
        namespaces = summary.namespaces.len(),
        networks = summary.networks.len(),
        policies = summary.policies.len(),
        failures = summary.failures.len(),
        "Reap finished"
    );
    summary
}

fn render(summary: &ReapSummary) -> String {
    let mut lines = vec![format!("removed {} leftover object(s)", summary.removed())];
    let groups = [
        ("namespace", &summary.namespaces),
        ("network", &summary.networks),
        ("policy", &summary.policies),
    ];
    for (label, names) in groups {
        lines.extend(names.iter().map(|n| format!("  {label:<10} {n}")));
    }
    lines.extend(summary.failures.iter().map(|f| format!("  failed     {f}")));
    lines.join("\n")
}
