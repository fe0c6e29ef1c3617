//! Cancellable interval-based polling
//!
//! [`poll_until`] is the only place the harness sleeps. Every wait names what
//! it is waiting for through a [`ReadinessTarget`], so a timeout reports the
//! state that never converged rather than a bare duration.

use std::future::Future;
use std::time::Duration;

use sriov_common::{Error, Result};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Lower bound on the retry interval
const MIN_INTERVAL: Duration = Duration::from_millis(10);

/// What to wait for and for how long
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReadinessTarget {
    /// Logged on every retry and used in errors
    pub description: String,
    /// Time between predicate attempts
    pub interval: Duration,
    /// Deadline measured from the first attempt
    pub timeout: Duration,
}

impl ReadinessTarget {
    /// Create a target
    pub fn new(description: impl Into<String>, interval: Duration, timeout: Duration) -> Self {
        Self {
            description: description.into(),
            interval,
            timeout,
        }
    }
}

/// Poll `predicate` until it returns `Ok(true)`
///
/// The predicate runs immediately and then every `target.interval`. The
/// final sleep is clipped so the last attempt happens at the deadline.
///
/// # Returns
/// - `Ok(())` once the predicate returns `Ok(true)`
/// - the predicate's error as soon as it returns `Err` (no further attempts)
/// - [`Error::DeadlineExceeded`] when `target.timeout` elapses
/// - [`Error::Cancelled`] when `cancel` fires, during an attempt or while sleeping
pub async fn poll_until<F, Fut>(
    target: &ReadinessTarget,
    cancel: &CancellationToken,
    mut predicate: F,
) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    let start = Instant::now();
    let interval = target.interval.max(MIN_INTERVAL);
    let mut attempt = 0u32;

    loop {
        if cancel.is_cancelled() {
            return Err(Error::cancelled(&target.description));
        }

        attempt += 1;
        let outcome = tokio::select! {
            _ = cancel.cancelled() => return Err(Error::cancelled(&target.description)),
            outcome = predicate() => outcome,
        };
        match outcome {
            Ok(true) => {
                debug!(
                    what = %target.description,
                    attempt,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Condition met"
                );
                return Ok(());
            }
            Ok(false) => trace!(what = %target.description, attempt, "Waiting"),
            Err(e) => {
                warn!(what = %target.description, attempt, error = %e, "Stopped waiting on error");
                return Err(e);
            }
        }

        let elapsed = start.elapsed();
        if elapsed >= target.timeout {
            warn!(
                what = %target.description,
                attempts = attempt,
                timeout_secs = target.timeout.as_secs(),
                "Timed out"
            );
            return Err(Error::deadline(&target.description, target.timeout));
        }

        let pause = interval.min(target.timeout - elapsed);
        tokio::select! {
            _ = cancel.cancelled() => return Err(Error::cancelled(&target.description)),
            _ = tokio::time::sleep(pause) => {}
        }
    }
}
