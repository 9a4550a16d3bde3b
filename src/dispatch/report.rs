//! Outcomes, progress lines and the final run report.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use uuid::Uuid;

use super::pacing::Admission;
use super::request::Request;

/// Terminal state of one admitted request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "lowercase")]
pub enum Outcome {
    Completed,
    Failed(String),
    Cancelled,
}

/// A request that exhausted its retries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub seq: usize,
    pub label: String,
    pub reason: String,
}

/// Shared tallies updated by worker tasks.
///
/// `completed` is the completion counter: it is owned here and handed to
/// each task through an `Arc`, never global.
#[derive(Debug, Default)]
pub struct Tally {
    completed: AtomicU64,
    cancelled: AtomicU64,
    failures: Mutex<Vec<Failure>>,
}

impl Tally {
    /// Create an empty tally.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Record the outcome of one request.
    pub fn record(&self, request: &Request, outcome: &Outcome) {
        match outcome {
            Outcome::Completed => {
                self.completed.fetch_add(1, Ordering::SeqCst);
            }
            Outcome::Cancelled => {
                self.cancelled.fetch_add(1, Ordering::SeqCst);
            }
            Outcome::Failed(reason) => self.failures.lock().push(Failure {
                seq: request.seq(),
                label: request.label().to_string(),
                reason: reason.clone(),
            }),
        }
    }

    /// Requests processed successfully so far.
    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::SeqCst)
    }

    /// Requests interrupted by cancellation so far.
    pub fn cancelled(&self) -> u64 {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Snapshot of the failures, ordered by batch position.
    pub fn failures(&self) -> Vec<Failure> {
        let mut failures = self.failures.lock().clone();
        failures.sort_by_key(|f| f.seq);
        failures
    }
}

/// Where progress lines go.
#[derive(Debug, Clone, Default)]
pub enum ProgressOutput {
    /// Drop progress lines
    #[default]
    Silent,
    /// Print each line to stdout
    Stdout,
    /// Collect lines in memory
    Capture(Arc<Mutex<Vec<String>>>),
}

impl ProgressOutput {
    /// An in-memory output plus a handle to the lines it collects.
    pub fn capture() -> (Self, Arc<Mutex<Vec<String>>>) {
        let lines = Arc::new(Mutex::new(Vec::new()));
        (ProgressOutput::Capture(Arc::clone(&lines)), lines)
    }
}

/// Writes `[<elapsed>s] <event> <label>` lines to its output.
#[derive(Debug, Clone)]
pub struct Progress {
    started: Instant,
    output: ProgressOutput,
}

impl Progress {
    /// Create a progress writer timed from `started`.
    pub fn new(started: Instant, output: ProgressOutput) -> Self {
        Self { started, output }
    }

    pub fn processing(&self, request: &Request) {
        self.emit(format_args!("Processing {}", request));
    }

    pub fn completed(&self, request: &Request) {
        self.emit(format_args!("Completed {}", request));
    }

    pub fn failed(&self, request: &Request, reason: &str) {
        self.emit(format_args!("Failed {}: {}", request, reason));
    }

    pub fn cancelled(&self, request: &Request) {
        self.emit(format_args!("Cancelled {}", request));
    }

    fn emit(&self, event: std::fmt::Arguments<'_>) {
        match &self.output {
            ProgressOutput::Silent => {}
            ProgressOutput::Stdout => {
                println!("{}", progress_line(self.started.elapsed(), event))
            }
            ProgressOutput::Capture(lines) => lines
                .lock()
                .push(progress_line(self.started.elapsed(), event)),
        }
    }
}

/// Format one progress line.
pub fn progress_line(elapsed: Duration, event: impl std::fmt::Display) -> String {
    format!("[{:.3}s] {}", elapsed.as_secs_f64(), event)
}

/// Summary of a finished run.
///
/// Every request in the batch is counted exactly once across
/// `completed`, `failed`, `cancelled` and `skipped`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    #[serde(with = "duration_secs")]
    pub elapsed: Duration,
    pub total: usize,
    pub admissions: Vec<Admission>,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub skipped: u64,
    pub failures: Vec<Failure>,
}

impl DispatchReport {
    /// Number of requests the gate released.
    pub fn admitted(&self) -> usize {
        self.admissions.len()
    }

    /// Whether every request completed successfully.
    pub fn is_success(&self) -> bool {
        self.completed as usize == self.total
    }

    /// Whether the outcome counts add up to the batch size.
    pub fn is_fully_accounted(&self) -> bool {
        (self.completed + self.failed + self.cancelled + self.skipped) as usize == self.total
    }

    /// One-line human summary, followed by non-zero problem counts.
    pub fn summary(&self) -> String {
        let mut line = format!(
            "Completed {}/{} requests in {:.3}s",
            self.completed,
            self.total,
            self.elapsed.as_secs_f64()
        );
        for (name, count) in [
            ("failed", self.failed),
            ("cancelled", self.cancelled),
            ("skipped", self.skipped),
        ] {
            if count > 0 {
                line.push_str(&format!(", {} {}", count, name));
            }
        }
        line
    }
}

impl std::fmt::Display for DispatchReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.summary())
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}
