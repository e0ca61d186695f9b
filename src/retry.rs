//! Bounded polling primitive shared by the job and payment pollers.
//!
//! Both loops follow the same shape: poll on a fixed interval up to a
//! fixed attempt budget; transient errors and in-progress states
//! consume budget and retry; exhausting the budget escalates to the
//! caller (refund / no credit).

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;

/// Interval/budget parameters for one bounded poll loop.
#[derive(Debug, Clone, Copy)]
pub struct PollSchedule {
    pub interval: Duration,
    pub max_attempts: u32,
    /// Small random addition per sleep to avoid synchronized polling
    pub jitter_ms: u64,
}

impl PollSchedule {
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts,
            jitter_ms: 0,
        }
    }

    pub fn with_jitter(mut self, jitter_ms: u64) -> Self {
        self.jitter_ms = jitter_ms;
        self
    }

    fn delay(&self) -> Duration {
        if self.jitter_ms == 0 {
            return self.interval;
        }
        self.interval + Duration::from_millis(fastrand::u64(0..=self.jitter_ms))
    }
}

/// One poll step either finishes with a value or asks for another round.
#[derive(Debug)]
pub enum PollStep<T> {
    Done(T),
    Retry,
}

/// Drive `step` until it returns [`PollStep::Done`] or the attempt
/// budget is exhausted. Returns `None` on exhaustion. Sleeps the
/// schedule's interval between attempts, not after the last one.
pub async fn poll_until<T, F, Fut>(schedule: &PollSchedule, mut step: F) -> Option<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = PollStep<T>>,
{
    for attempt in 1..=schedule.max_attempts {
        if let PollStep::Done(value) = step(attempt).await {
            return Some(value);
        }
        if attempt < schedule.max_attempts {
            sleep(schedule.delay()).await;
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn completes_when_step_is_done() {
        let schedule = PollSchedule::new(Duration::from_millis(1), 10);
        let calls = AtomicU32::new(0);

        let out = poll_until(&schedule, |attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt >= 3 {
                    PollStep::Done(attempt)
                } else {
                    PollStep::Retry
                }
            }
        })
        .await;

        assert_eq!(out, Some(3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausts_budget_and_returns_none() {
        let schedule = PollSchedule::new(Duration::from_millis(1), 5);
        let calls = AtomicU32::new(0);

        let out: Option<()> = poll_until(&schedule, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { PollStep::Retry }
        })
        .await;

        assert_eq!(out, None);
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn jitter_stays_bounded() {
        let schedule = PollSchedule::new(Duration::from_millis(1), 1).with_jitter(2);
        let d = schedule.delay();
        assert!(d >= Duration::from_millis(1));
        assert!(d <= Duration::from_millis(3));
    }
}
