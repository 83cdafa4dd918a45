//! Per-process request pacing toward the upstream source.
//!
//! The cap is per process only. Several workers each hold their own gate,
//! so deployment concurrency has to be sized against the upstream limit.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::{Instant, sleep, sleep_until};
use tracing::debug;

/// Minimum spacing between requests; ~9 req/s keeps under a 10 req/s cap.
pub const DEFAULT_REQUEST_INTERVAL: Duration = Duration::from_millis(110);

/// Grants at most one request per interval across all callers.
///
/// There is no burst allowance: a caller arriving after a long idle period
/// is granted immediately, and the next caller waits a full interval.
#[derive(Debug)]
pub struct RateGate {
    interval: Duration,
    next_grant: Mutex<Option<Instant>>,
}

impl Default for RateGate {
    fn default() -> Self {
        Self::new(DEFAULT_REQUEST_INTERVAL)
    }
}

impl RateGate {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            next_grant: Mutex::new(None),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Suspend until this caller may issue one request.
    pub async fn acquire(&self) {
        // Holding the lock across the sleep queues callers in arrival order.
        let mut next = self.next_grant.lock().await;
        if let Some(at) = *next
            && at > Instant::now()
        {
            debug!(wait_ms = (at - Instant::now()).as_millis() as u64, "rate gate waiting");
            sleep_until(at).await;
        }
        *next = Some(Instant::now() + self.interval);
    }
}

/// Extra pauses applied after an upstream 429 or transient failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Pause before the first retry.
    pub throttle_pause: Duration,
    /// Pause before every later retry.
    pub escalated_pause: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            throttle_pause: Duration::from_secs(10),
            escalated_pause: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Pause before retry number `retry` (0-based).
    pub fn pause_for(&self, retry: u32) -> Duration {
        if retry == 0 {
            self.throttle_pause
        } else {
            self.escalated_pause
        }
    }

    pub async fn pause(&self, retry: u32) {
        sleep(self.pause_for(retry)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn first_grant_is_immediate() {
        let gate = RateGate::new(Duration::from_millis(500));
        let start = Instant::now();
        gate.acquire().await;
        assert_eq!(Instant::now(), start);
    }

    #[tokio::test(start_paused = true)]
    async fn grants_are_spaced_by_interval() {
        let gate = RateGate::new(Duration::from_millis(200));
        let start = Instant::now();
        for _ in 0..4 {
            gate.acquire().await;
        }
        assert!(Instant::now() - start >= Duration::from_millis(600));
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_callers_do_not_burst() {
        let gate = Arc::new(RateGate::new(Duration::from_millis(100)));
        let start = Instant::now();
        let mut handles = Vec::new();
        for _ in 0..5 {
            let gate = Arc::clone(&gate);
            handles.push(tokio::spawn(async move {
                gate.acquire().await;
                Instant::now()
            }));
        }
        let mut grants = Vec::new();
        for h in handles {
            grants.push(h.await.unwrap());
        }
        grants.sort();
        for pair in grants.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(100));
        }
        assert!(*grants.last().unwrap() - start >= Duration::from_millis(400));
    }

    #[tokio::test(start_paused = true)]
    async fn idle_gap_does_not_bank_permits() {
        let gate = RateGate::new(Duration::from_millis(100));
        gate.acquire().await;
        tokio::time::sleep(Duration::from_secs(5)).await;
        let t0 = Instant::now();
        gate.acquire().await;
        assert_eq!(Instant::now(), t0);
        gate.acquire().await;
        assert!(Instant::now() - t0 >= Duration::from_millis(100));
    }

    #[test]
    fn pause_escalates_once() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.pause_for(0), Duration::from_secs(10));
        assert_eq!(policy.pause_for(1), Duration::from_secs(60));
        assert_eq!(policy.pause_for(5), Duration::from_secs(60));
    }
}
