//! Bounded polling at a fixed cadence.

use std::future::Future;
use std::time::Duration;

use tokio::time::{sleep_until, Instant};
use tracing::debug;

use crate::error::{CertifyError, Result};

/// Default polling cadence.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Repeatedly evaluates a condition until it holds or a deadline passes.
///
/// Each iteration sleeps until one interval after the previous iteration
/// started, so slow predicates do not accumulate drift. A predicate
/// returning `Err` stops polling at once; `Ok(false)`/`Ok(None)` means
/// "not yet".
#[derive(Debug, Clone, Copy)]
pub struct PollingTimer {
    interval: Duration,
}

impl Default for PollingTimer {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_INTERVAL)
    }
}

impl PollingTimer {
    /// Create a timer with the given cadence.
    #[must_use]
    pub const fn new(interval: Duration) -> Self {
        Self { interval }
    }

    /// Polling cadence.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.interval
    }

    /// Poll until `predicate` yields a value.
    ///
    /// # Errors
    /// Returns [`CertifyError::Timeout`] labelled with `label` once
    /// `deadline` has elapsed, or the first error the predicate returns.
    pub async fn wait_for<T, F, Fut>(&self, label: &str, deadline: Duration, mut predicate: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Option<T>>>,
    {
        let start = Instant::now();
        let end = start + deadline;
        let mut iteration_start = start;
        let mut attempts: u32 = 0;

        loop {
            attempts += 1;
            if let Some(value) = predicate().await? {
                debug!(
                    label,
                    attempts,
                    elapsed_secs = start.elapsed().as_secs(),
                    "Condition met"
                );
                return Ok(value);
            }

            sleep_until(iteration_start + self.interval).await;
            iteration_start = Instant::now();

            if iteration_start >= end {
                break;
            }
        }

        debug!(label, attempts, "Polling deadline elapsed");
        Err(CertifyError::Timeout {
            label: label.to_string(),
            secs: deadline.as_secs(),
        })
    }

    /// Poll until `predicate` returns `true`.
    ///
    /// # Errors
    /// Same as [`PollingTimer::wait_for`].
    pub async fn wait_until<F, Fut>(&self, label: &str, deadline: Duration, mut predicate: F) -> Result<()>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<bool>>,
    {
        self.wait_for(label, deadline, || {
            let check = predicate();
            async move { Ok(check.await?.then_some(())) }
        })
        .await
    }
}
