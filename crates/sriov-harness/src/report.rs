//! Scenario outcomes and the run-all-and-report runner
//!
//! Scenarios run one after another; a failing or panicking scenario is
//! recorded and the next one still runs. The summary is printed and the
//! suite fails at [`ScenarioRunner::finish`].

use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
#[cfg(test)]
use mockall::automock;
use parking_lot::Mutex;
use sriov_common::{Error, Result};
use tokio::time::Instant;
use tracing::{error, info, warn};

/// Longest error message shown in the summary
const SUMMARY_MESSAGE_LIMIT: usize = 200;

/// How a scenario ended
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// Completed without error
    Passed,
    /// Returned an error or panicked
    Failed,
    /// No usable hardware for the scenario
    Skipped,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Passed => "PASS",
            Self::Failed => "FAIL",
            Self::Skipped => "SKIP",
        })
    }
}

/// One scenario result
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReportRecord {
    /// Scenario name
    pub scenario: String,
    /// How it ended
    pub outcome: Outcome,
    /// Wall time spent
    pub duration: Duration,
    /// Error or skip reason
    pub message: Option<String>,
}

/// Destination for scenario results
#[cfg_attr(test, automock)]
pub trait ReportSink: Send + Sync {
    /// Record one result
    fn record(&self, record: ReportRecord);
}

/// Emits every record as a structured log line
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingSink;

impl ReportSink for TracingSink {
    fn record(&self, record: ReportRecord) {
        let duration_secs = record.duration.as_secs_f64();
        let message = record.message.as_deref().unwrap_or_default();
        match record.outcome {
            Outcome::Passed => info!(scenario = %record.scenario, duration_secs, "Scenario passed"),
            Outcome::Skipped => {
                warn!(scenario = %record.scenario, duration_secs, reason = %message, "Scenario skipped")
            }
            Outcome::Failed => {
                error!(scenario = %record.scenario, duration_secs, error = %message, "Scenario failed")
            }
        }
    }
}

/// Keeps records in memory; clones share the same records
#[derive(Clone, Debug, Default)]
pub struct MemorySink {
    records: Arc<Mutex<Vec<ReportRecord>>>,
}

impl MemorySink {
    /// Empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Records so far, in order
    pub fn records(&self) -> Vec<ReportRecord> {
        self.records.lock().clone()
    }
}

impl ReportSink for MemorySink {
    fn record(&self, record: ReportRecord) {
        self.records.lock().push(record);
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn truncate(message: &str) -> String {
    if message.chars().count() <= SUMMARY_MESSAGE_LIMIT {
        return message.to_string();
    }
    let cut: String = message.chars().take(SUMMARY_MESSAGE_LIMIT).collect();
    format!("{cut}...")
}

/// Runs scenarios, records their outcomes and prints a summary
pub struct ScenarioRunner {
    suite: String,
    sink: Arc<dyn ReportSink>,
    results: MemorySink,
}

impl ScenarioRunner {
    /// Runner reporting to a [`TracingSink`]
    pub fn new(suite: impl Into<String>) -> Self {
        Self::with_sink(suite, Arc::new(TracingSink))
    }

    /// Runner reporting to `sink`
    pub fn with_sink(suite: impl Into<String>, sink: Arc<dyn ReportSink>) -> Self {
        Self {
            suite: suite.into(),
            sink,
            results: MemorySink::new(),
        }
    }

    /// Run one scenario; panics and errors are recorded, never propagated
    pub async fn run<F, Fut>(&self, name: &str, f: F) -> Outcome
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        info!(suite = %self.suite, scenario = name, "Running scenario");
        let start = Instant::now();
        let (outcome, message) = match AssertUnwindSafe(f()).catch_unwind().await {
            Ok(Ok(())) => (Outcome::Passed, None),
            Ok(Err(e)) if e.is_skip() => (Outcome::Skipped, Some(e.to_string())),
            Ok(Err(e)) => (Outcome::Failed, Some(e.to_string())),
            Err(panic) => (
                Outcome::Failed,
                Some(format!("PANIC: {}", panic_message(panic.as_ref()))),
            ),
        };
        let record = ReportRecord {
            scenario: name.to_string(),
            outcome,
            duration: start.elapsed(),
            message,
        };
        self.results.record(record.clone());
        self.sink.record(record);
        outcome
    }

    /// Results recorded so far
    pub fn records(&self) -> Vec<ReportRecord> {
        self.results.records()
    }

    /// Log the summary; fails when any scenario failed
    pub fn finish(&self) -> Result<()> {
        let records = self.results.records();
        let total: Duration = records.iter().map(|r| r.duration).sum();
        let count = |o: Outcome| records.iter().filter(|r| r.outcome == o).count();
        let (passed, failed, skipped) = (
            count(Outcome::Passed),
            count(Outcome::Failed),
            count(Outcome::Skipped),
        );

        info!("========================================");
        info!("  {}", self.suite.to_uppercase());
        info!("========================================");
        for r in &records {
            info!(
                "  {}  {:40} {:.1}s",
                r.outcome,
                r.scenario,
                r.duration.as_secs_f64()
            );
            if let Some(message) = &r.message {
                info!("        -> {}", truncate(message));
            }
        }
        info!("----------------------------------------");
        info!(
            "  {passed} passed, {failed} failed, {skipped} skipped ({:.1}s total)",
            total.as_secs_f64()
        );
        info!("========================================");

        if failed == 0 {
            return Ok(());
        }
        let names: Vec<&str> = records
            .iter()
            .filter(|r| r.outcome == Outcome::Failed)
            .map(|r| r.scenario.as_str())
            .collect();
        Err(Error::internal_with_context(
            "scenario runner",
            format!(
                "{failed} scenario(s) failed in {}: {}",
                self.suite,
                names.join(", ")
            ),
        ))
    }
}
