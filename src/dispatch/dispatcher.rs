//! The dispatcher: producer, pacing gate, worker fan-out and join barrier.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, info_span, Instrument};
use uuid::Uuid;

use super::pacing::{PacingGate, PacingPolicy};
use super::processor::{execute, Processor, RetryPolicy, SimulatedWork};
use super::producer::Producer;
use super::report::{DispatchReport, Outcome, Progress, ProgressOutput, Tally};
use super::state::{DispatchState, StateCell};
use crate::config::DispatcherConfig;
use crate::error::Result;

/// Runs one batch of requests through a pacing gate.
///
/// Admitted requests are each handed to their own task immediately; the
/// gate limits admission, not how long processing takes. `run` returns only
/// after every spawned task has finished.
pub struct Dispatcher {
    gate: PacingGate,
    processor: Arc<dyn Processor>,
    retry: RetryPolicy,
    progress: ProgressOutput,
    cancel: CancellationToken,
    state: Arc<StateCell>,
}

impl Dispatcher {
    /// Create a dispatcher with the given policy and processor.
    pub fn new(policy: PacingPolicy, processor: Arc<dyn Processor>) -> Result<Self> {
        Ok(Self {
            gate: PacingGate::new(policy)?,
            processor,
            retry: RetryPolicy::none(),
            progress: ProgressOutput::Silent,
            cancel: CancellationToken::new(),
            state: Arc::new(StateCell::new()),
        })
    }

    /// Create a dispatcher backed by `SimulatedWork` from configuration.
    pub fn from_config(config: &DispatcherConfig) -> Result<Self> {
        let processor = Arc::new(SimulatedWork::new(config.work_duration()));
        Ok(Self::new(config.pacing_policy()?, processor)?
            .with_retry(config.retry_policy())
            .with_progress(config.output.progress))
    }

    /// Set the retry and timeout policy applied to each request.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Echo progress lines to stdout.
    pub fn with_progress(self, echo: bool) -> Self {
        let output = if echo {
            ProgressOutput::Stdout
        } else {
            ProgressOutput::Silent
        };
        self.with_progress_output(output)
    }

    /// Send progress lines to `output`.
    pub fn with_progress_output(mut self, output: ProgressOutput) -> Self {
        self.progress = output;
        self
    }

    /// Use an externally owned cancellation token.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// A handle that cancels this dispatcher's run.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// The pacing policy in force.
    pub fn policy(&self) -> &PacingPolicy {
        self.gate.policy()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> DispatchState {
        self.state.get()
    }

    /// Dispatch `labels` and wait for every admitted request to finish.
    ///
    /// A dispatcher runs a single batch; calling `run` again fails with
    /// an invalid state transition.
    pub async fn run<I, S>(&self, labels: I) -> Result<DispatchReport>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let run_id = Uuid::new_v4();
        let producer = Producer::new(labels);

        self.run_batch(run_id, producer)
            .instrument(info_span!("dispatch", run_id = %run_id))
            .await
    }

    async fn run_batch(&self, run_id: Uuid, producer: Producer) -> Result<DispatchReport> {
        let total = producer.len();
        let policy = *self.gate.policy();
        let started_at = Utc::now();
        let started = Instant::now();

        self.state.advance(DispatchState::Enqueuing)?;
        info!(
            total = total,
            rate = policy.rate,
            burst = policy.burst,
            window_ms = policy.window.as_millis() as u64,
            expected_windows = policy.windows_for(total),
            "Starting dispatch"
        );

        let (tx, rx) = mpsc::unbounded_channel();
        let producer_handle = producer.spawn(tx);

        self.state.advance(DispatchState::Pacing)?;
        let tracker = TaskTracker::new();
        let tally = Tally::new();
        let progress = Progress::new(started, self.progress.clone());

        let admissions = self
            .gate
            .run(rx, self.cancel.clone(), started, |admission| {
                let request = admission.request.clone();
                let processor = Arc::clone(&self.processor);
                let tally = Arc::clone(&tally);
                let cancel = self.cancel.clone();
                let retry = self.retry;
                let progress = progress.clone();

                tracker.spawn(async move {
                    progress.processing(&request);
                    let outcome = execute(processor.as_ref(), &request, &retry, &cancel).await;
                    match &outcome {
                        Outcome::Completed => progress.completed(&request),
                        Outcome::Failed(reason) => progress.failed(&request, reason),
                        Outcome::Cancelled => {
                            debug!(request = %request, "Request cancelled in flight");
                            progress.cancelled(&request);
                        }
                    }
                    tally.record(&request, &outcome);
                });
            })
            .await;

        self.state.advance(DispatchState::Draining)?;
        tracker.close();
        debug!(in_flight = tracker.len(), "Waiting for in-flight requests");
        tracker.wait().await;

        match producer_handle.await {
            Ok(enqueued) => debug!(enqueued = enqueued, "Producer finished"),
            Err(e) => error!(error = %e, "Producer task failed"),
        }

        self.state.advance(DispatchState::Completed)?;

        let failures = tally.failures();
        let report = DispatchReport {
            run_id,
            started_at,
            elapsed: started.elapsed(),
            total,
            completed: tally.completed(),
            failed: failures.len() as u64,
            cancelled: tally.cancelled(),
            skipped: total.saturating_sub(admissions.len()) as u64,
            admissions,
            failures,
        };

        info!(
            elapsed_secs = report.elapsed.as_secs_f64(),
            completed = report.completed,
            failed = report.failed,
            cancelled = report.cancelled,
            skipped = report.skipped,
            "Dispatch completed"
        );

        Ok(report)
    }
}
