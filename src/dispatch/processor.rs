//! Request processing and the retry path around it.

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{error, trace, warn};

use super::report::Outcome;
use super::request::Request;
use crate::error::{DispatchError, Result};

/// Backoff never grows past this.
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Trait for whatever does the actual work for an admitted request.
///
/// The dispatcher controls admission only; a processor may take as long as
/// it likes, and many run concurrently.
#[async_trait]
pub trait Processor: Send + Sync {
    /// Process a single request.
    async fn process(&self, request: &Request) -> Result<()>;
}

/// A processor that sleeps for a fixed duration and always succeeds.
#[derive(Debug, Clone)]
pub struct SimulatedWork {
    duration: Duration,
}

impl SimulatedWork {
    /// Create a simulated processor.
    pub fn new(duration: Duration) -> Self {
        Self { duration }
    }

    /// Time spent per request.
    pub fn duration(&self) -> Duration {
        self.duration
    }
}

impl Default for SimulatedWork {
    fn default() -> Self {
        Self::new(Duration::from_millis(100))
    }
}

#[async_trait]
impl Processor for SimulatedWork {
    async fn process(&self, request: &Request) -> Result<()> {
        let duration = self.duration();
        trace!(
            request = %request,
            duration_ms = duration.as_millis() as u64,
            "Simulating work"
        );
        tokio::time::sleep(duration).await;
        Ok(())
    }
}

/// Retry and timeout settings for a single request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts allowed after the first one fails
    pub max_retries: u32,
    /// Delay before the first retry; doubles each time
    pub initial_backoff: Duration,
    /// Upper bound on one attempt
    pub task_timeout: Option<Duration>,
}

impl RetryPolicy {
    /// One attempt, no timeout.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            initial_backoff: Duration::ZERO,
            task_timeout: None,
        }
    }

    /// Backoff before retry number `retry` (1-based), without jitter.
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.initial_backoff
            .checked_mul(factor)
            .unwrap_or(MAX_BACKOFF)
            .min(MAX_BACKOFF)
    }

    /// Backoff plus up to 10% random jitter.
    fn jittered_backoff(&self, retry: u32) -> Duration {
        let base = self.backoff(retry);
        let spread = base.as_millis() as u64 / 10;
        if spread == 0 {
            return base;
        }
        base + Duration::from_millis(rand::thread_rng().gen_range(0..=spread))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

/// Drive `request` through `processor` until it succeeds, runs out of
/// retries, or `cancel` fires.
pub async fn execute<P>(
    processor: &P,
    request: &Request,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
) -> Outcome
where
    P: Processor + ?Sized,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Outcome::Cancelled,
            result = attempt_once(processor, request, policy.task_timeout) => result,
        };

        let err = match result {
            Ok(()) => return Outcome::Completed,
            Err(err) => err,
        };

        if attempt > policy.max_retries {
            error!(
                request = %request,
                attempts = attempt,
                error = %err,
                "Request failed"
            );
            return Outcome::Failed(err.to_string());
        }

        let delay = policy.jittered_backoff(attempt);
        warn!(
            request = %request,
            attempt = attempt,
            max_retries = policy.max_retries,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "Attempt failed, retrying"
        );

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Outcome::Cancelled,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

async fn attempt_once<P>(processor: &P, request: &Request, timeout: Option<Duration>) -> Result<()>
where
    P: Processor + ?Sized,
{
    match timeout {
        Some(limit) => tokio::time::timeout(limit, processor.process(request))
            .await
            .map_err(|_| DispatchError::Timeout {
                label: request.label().to_string(),
                timeout: limit,
            })?,
        None => processor.process(request).await,
    }
}
