//! Retry with exponential backoff for orchestrator calls.

use backoff::backoff::Backoff;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::solver::client::ClientError;

/// Backoff parameters for one kind of call.
///
/// With `max_elapsed_ms` unset the call is retried until it succeeds or the
/// token is cancelled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub initial_interval_ms: u64,
    pub max_interval_ms: u64,
    pub multiplier: f64,
    /// Relative jitter applied to each interval, 0.5 = ±50%.
    pub randomization_factor: f64,
    pub max_elapsed_ms: Option<u64>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_interval_ms: 500,
            max_interval_ms: 2_000,
            multiplier: 2.0,
            randomization_factor: 0.5,
            max_elapsed_ms: None,
        }
    }
}

impl RetryPolicy {
    /// Policy for result reports: gives up after ten minutes.
    pub fn for_reports() -> Self {
        Self {
            max_elapsed_ms: Some(10 * 60 * 1_000),
            ..Self::default()
        }
    }

    pub fn with_max_elapsed(mut self, max_elapsed: Option<Duration>) -> Self {
        self.max_elapsed_ms =
            max_elapsed.map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX));
        self
    }

    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(self.initial_interval_ms))
            .with_max_interval(Duration::from_millis(self.max_interval_ms))
            .with_multiplier(self.multiplier)
            .with_randomization_factor(self.randomization_factor)
            .with_max_elapsed_time(self.max_elapsed_ms.map(Duration::from_millis))
            .build()
    }

    /// Run `op` until it succeeds, the backoff gives up, or `cancel` fires.
    pub async fn run<T, F, Fut>(
        &self,
        what: &str,
        cancel: &CancellationToken,
        mut op: F,
    ) -> Result<T, ClientError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ClientError>>,
    {
        let mut backoff = self.backoff();
        let mut attempts: u32 = 0;

        loop {
            let result = tokio::select! {
                _ = cancel.cancelled() => return Err(ClientError::Cancelled),
                result = op() => result,
            };

            let err = match result {
                Ok(value) => return Ok(value),
                Err(ClientError::Cancelled) => return Err(ClientError::Cancelled),
                Err(err) => err,
            };
            attempts += 1;

            let Some(delay) = backoff.next_backoff() else {
                warn!("{} failed, giving up after {} attempts: {}", what, attempts, err);
                return Err(ClientError::Exhausted {
                    attempts,
                    last: Box::new(err),
                });
            };

            if matches!(err, ClientError::NoWorkAvailable) {
                debug!("{}: nothing to do, polling again in {:?}", what, delay);
            } else {
                warn!(
                    "{} failed (attempt {}), retrying in {:?}: {}",
                    what, attempts, delay, err
                );
            }

            tokio::select! {
                _ = cancel.cancelled() => return Err(ClientError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}
