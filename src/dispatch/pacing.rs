//! Admission pacing.
//!
//! The gate releases an initial burst immediately, then refreshes a quota of
//! `rate` releases on every tick of a fixed-period clock. Quota left unused
//! at the end of a window expires.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::request::Request;
use crate::error::{DispatchError, Result};

/// How fast requests may be admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacingPolicy {
    /// Requests admitted per window once the burst is spent
    pub rate: u32,
    /// Requests admitted immediately, before the first tick
    pub burst: u32,
    /// Length of a pacing window
    pub window: Duration,
}

impl PacingPolicy {
    /// Create a policy with an explicit window.
    pub fn new(rate: u32, burst: u32, window: Duration) -> Self {
        Self {
            rate,
            burst,
            window,
        }
    }

    /// Create a policy whose window is `1s / rate`.
    pub fn per_second(rate: u32, burst: u32) -> Self {
        let window = if rate == 0 {
            Duration::ZERO
        } else {
            Duration::from_secs(1) / rate
        };
        Self::new(rate, burst, window)
    }

    /// Reject policies that could never admit anything past the burst.
    pub fn validate(&self) -> Result<()> {
        if self.rate == 0 {
            return Err(DispatchError::InvalidPolicy(
                "rate must be at least 1 request per window".to_string(),
            ));
        }
        if self.window.is_zero() {
            return Err(DispatchError::InvalidPolicy(
                "window must be longer than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Number of ticks needed after the burst to admit `batch` requests.
    pub fn windows_for(&self, batch: usize) -> usize {
        let after_burst = batch.saturating_sub(self.burst as usize);
        if after_burst == 0 || self.rate == 0 {
            return 0;
        }
        after_burst.div_ceil(self.rate as usize)
    }
}

/// A request released by the gate, stamped with its offset from run start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Admission {
    /// The admitted request
    pub request: Request,
    /// Time since the run started
    pub at: Duration,
}

/// Releases queued requests no faster than its policy allows.
#[derive(Debug, Clone)]
pub struct PacingGate {
    policy: PacingPolicy,
}

impl PacingGate {
    /// Create a gate for a validated policy.
    pub fn new(policy: PacingPolicy) -> Result<Self> {
        policy.validate()?;
        Ok(Self { policy })
    }

    /// The policy this gate enforces.
    pub fn policy(&self) -> &PacingPolicy {
        &self.policy
    }

    /// Drain `rx`, calling `admit` for each released request in FIFO order.
    ///
    /// Returns when the queue is closed and empty, or when `cancel` fires.
    /// Requests still queued on cancellation are left unreleased.
    pub async fn run<F>(
        &self,
        mut rx: UnboundedReceiver<Request>,
        cancel: CancellationToken,
        started: Instant,
        mut admit: F,
    ) -> Vec<Admission>
    where
        F: FnMut(&Admission),
    {
        let window = self.policy.window;
        let mut ticker = interval_at(started + window, window);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut quota = self.policy.burst;
        let mut pending: Option<Request> = None;
        let mut admissions = Vec::new();

        loop {
            if quota > 0 {
                if let Some(request) = pending.take() {
                    let admission = Admission {
                        request,
                        at: started.elapsed(),
                    };
                    quota -= 1;
                    debug!(
                        request = %admission.request,
                        seq = admission.request.seq(),
                        at_ms = admission.at.as_millis() as u64,
                        quota_left = quota,
                        "Request admitted"
                    );
                    admit(&admission);
                    admissions.push(admission);
                    continue;
                }
            }

            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    warn!(
                        admitted = admissions.len(),
                        "Pacing gate cancelled"
                    );
                    break;
                }
                _ = ticker.tick() => {
                    trace!(quota = self.policy.rate, "Pacing tick");
                    quota = self.policy.rate;
                }
                next = rx.recv(), if pending.is_none() => match next {
                    Some(request) => {
                        trace!(request = %request, "Dequeued request");
                        pending = Some(request);
                    }
                    None => {
                        debug!(
                            admitted = admissions.len(),
                            "Queue closed and drained, pacing gate exiting"
                        );
                        break;
                    }
                },
            }
        }

        admissions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn assert_at(actual: Duration, expected_ms: u64) {
        let expected = Duration::from_millis(expected_ms);
        assert!(
            actual >= expected && actual < expected + Duration::from_millis(5),
            "expected ~{:?}, got {:?}",
            expected,
            actual
        );
    }

    fn queue_of(n: usize) -> UnboundedReceiver<Request> {
        let (tx, rx) = mpsc::unbounded_channel();
        for i in 1..=n {
            tx.send(Request::new(i, format!("Request {}", i))).unwrap();
        }
        rx
    }

    #[test]
    fn test_per_second_window() {
        let policy = PacingPolicy::per_second(2, 2);
        assert_eq!(policy.window, Duration::from_millis(500));

        let policy = PacingPolicy::per_second(4, 0);
        assert_eq!(policy.window, Duration::from_millis(250));
    }

    #[test]
    fn test_validate() {
        assert!(PacingPolicy::per_second(1, 0).validate().is_ok());
        assert!(PacingPolicy::per_second(0, 3).validate().is_err());
        assert!(PacingPolicy::new(1, 1, Duration::ZERO).validate().is_err());
        assert!(PacingGate::new(PacingPolicy::per_second(0, 1)).is_err());
    }

    #[test]
    fn test_windows_for() {
        let policy = PacingPolicy::per_second(2, 2);
        assert_eq!(policy.windows_for(0), 0);
        assert_eq!(policy.windows_for(2), 0);
        assert_eq!(policy.windows_for(10), 4);
        assert_eq!(policy.windows_for(11), 5);

        let policy = PacingPolicy::per_second(3, 5);
        assert_eq!(policy.windows_for(1), 0);
        assert_eq!(policy.windows_for(6), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_then_paced() {
        let gate = PacingGate::new(PacingPolicy::new(1, 3, Duration::from_secs(1))).unwrap();
        let started = Instant::now();

        let admissions = gate
            .run(queue_of(5), CancellationToken::new(), started, |_| {})
            .await;

        assert_eq!(admissions.len(), 5);
        assert_at(admissions[0].at, 0);
        assert_at(admissions[1].at, 0);
        assert_at(admissions[2].at, 0);
        assert_at(admissions[3].at, 1000);
        assert_at(admissions[4].at, 2000);
        // Exits as soon as the closed queue drains, not on the next tick
        assert_at(started.elapsed(), 2000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fifo_order() {
        let gate = PacingGate::new(PacingPolicy::new(3, 1, Duration::from_millis(100))).unwrap();
        let mut seen = Vec::new();

        let admissions = gate
            .run(queue_of(8), CancellationToken::new(), Instant::now(), |a| {
                seen.push(a.request.seq())
            })
            .await;

        assert_eq!(seen, (1..=8).collect::<Vec<_>>());
        let seqs: Vec<_> = admissions.iter().map(|a| a.request.seq()).collect();
        assert_eq!(seqs, seen);
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_final_window() {
        let gate = PacingGate::new(PacingPolicy::new(3, 0, Duration::from_millis(200))).unwrap();
        let admissions = gate
            .run(queue_of(4), CancellationToken::new(), Instant::now(), |_| {})
            .await;

        let times: Vec<u64> = admissions.iter().map(|a| a.at.as_millis() as u64).collect();
        assert_eq!(times.len(), 4);
        assert!(times[..3].iter().all(|t| (200..205).contains(t)));
        assert!((400..405).contains(&times[3]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_queue_exits_immediately() {
        let gate = PacingGate::new(PacingPolicy::per_second(2, 2)).unwrap();
        let started = Instant::now();

        let admissions = gate
            .run(queue_of(0), CancellationToken::new(), started, |_| {})
            .await;

        assert!(admissions.is_empty());
        assert_at(started.elapsed(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unused_quota_does_not_accumulate() {
        let gate = PacingGate::new(PacingPolicy::new(2, 1, Duration::from_millis(500))).unwrap();
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            tx.send(Request::new(1, "first")).unwrap();
            tokio::time::sleep(Duration::from_millis(2200)).await;
            for i in 2..=6 {
                tx.send(Request::new(i, format!("late {}", i))).unwrap();
            }
        });

        let admissions = gate
            .run(rx, CancellationToken::new(), Instant::now(), |_| {})
            .await;

        let times: Vec<u64> = admissions.iter().map(|a| a.at.as_millis() as u64).collect();
        assert_eq!(times.len(), 6);
        assert!(times[0] < 5);
        // Four idle ticks passed, yet only one window's quota is available
        assert_eq!(times.iter().filter(|t| (2200..2205).contains(*t)).count(), 2);
        assert_eq!(times.iter().filter(|t| (2500..2505).contains(*t)).count(), 2);
        assert!((3000..3005).contains(&times[5]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_admission() {
        let gate = PacingGate::new(PacingPolicy::new(1, 1, Duration::from_millis(500))).unwrap();
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(1200)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let admissions = gate.run(queue_of(10), cancel, started, |_| {}).await;

        // t=0 burst, t=500 and t=1000 ticks
        assert_eq!(admissions.len(), 3);
        assert_at(started.elapsed(), 1200);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_burst_waits_for_first_tick() {
        let gate = PacingGate::new(PacingPolicy::new(1, 0, Duration::from_millis(300))).unwrap();
        let admissions = gate
            .run(queue_of(1), CancellationToken::new(), Instant::now(), |_| {})
            .await;

        assert_eq!(admissions.len(), 1);
        assert_at(admissions[0].at, 300);
    }
}
