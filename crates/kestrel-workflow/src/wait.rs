//! Bounded polling and retry helpers
//!
//! Every wait is capped by a timeout or attempt budget and returns promptly
//! when the run is cancelled.

use crate::cancel::Cancellation;
use crate::error::{Result, WorkflowError};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Outcome of one check in [`poll_until`]
#[derive(Debug, Clone, PartialEq)]
pub enum Poll<T> {
    Ready(T),
    Pending,
    /// The resource can no longer become ready
    Terminal(String),
}

/// Polling cadence and overall budget
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitConfig {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            timeout: Duration::from_secs(30 * 60),
        }
    }
}

impl WaitConfig {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }
}

/// Attempt budget and fixed backoff between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    pub attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: 5,
            backoff: Duration::from_secs(10),
        }
    }
}

impl RetryConfig {
    pub fn new(attempts: u32, backoff: Duration) -> Self {
        Self { attempts, backoff }
    }
}

/// Sleep for `duration` unless cancelled first
async fn sleep_or_cancel(duration: Duration, cancel: &Cancellation) -> Result<()> {
    tokio::select! {
        _ = tokio::time::sleep(duration) => Ok(()),
        _ = cancel.cancelled() => Err(WorkflowError::Cancelled),
    }
}

/// Check at a fixed interval until ready, terminal, timed out or cancelled
///
/// Check errors are treated as transient: they are logged and the check is
/// retried on the next tick.
pub async fn poll_until<T, F, Fut>(
    what: &str,
    config: &WaitConfig,
    cancel: &Cancellation,
    mut check: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<Poll<T>>>,
{
    let deadline = Instant::now() + config.timeout;

    loop {
        if cancel.is_cancelled() {
            return Err(WorkflowError::Cancelled);
        }

        match check().await {
            Ok(Poll::Ready(value)) => return Ok(value),
            Ok(Poll::Pending) => debug!(what = %what, "Still waiting"),
            Ok(Poll::Terminal(reason)) => {
                return Err(WorkflowError::Terminal {
                    what: what.to_string(),
                    reason,
                })
            }
            Err(e) => warn!(what = %what, error = %e, "Check failed, will retry"),
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(WorkflowError::Timeout {
                what: what.to_string(),
                timeout: config.timeout,
            });
        }
        sleep_or_cancel(config.interval.min(deadline - now), cancel).await?;
    }
}

/// Run `op` up to `config.attempts` times, sleeping `config.backoff` between
/// failures. Returns the last error once the budget is spent.
pub async fn retry_with_backoff<T, F, Fut>(
    what: &str,
    config: &RetryConfig,
    cancel: &Cancellation,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let attempts = config.attempts.max(1);

    for attempt in 1..=attempts {
        if cancel.is_cancelled() {
            return Err(WorkflowError::Cancelled);
        }

        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt == attempts => {
                return Err(WorkflowError::Collaborator(
                    e.context(format!("{} failed after {} attempts", what, attempts)),
                ));
            }
            Err(e) => {
                warn!(what = %what, attempt, attempts, error = %e, "Attempt failed, retrying");
                sleep_or_cancel(config.backoff, cancel).await?;
            }
        }
    }

    Err(WorkflowError::Cancelled)
}
