//! Cooperative pacing of outgoing calls.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::{sleep_until, Instant};

/// Kinds of outgoing work, each paced independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallClass {
    /// Side-effecting calls for the sinks of one event.
    Sink,
    /// Consecutive records of a backfill page.
    Record,
    /// Consecutive page fetches.
    Page,
}

impl CallClass {
    fn slot(self) -> usize {
        match self {
            Self::Sink => 0,
            Self::Record => 1,
            Self::Page => 2,
        }
    }
}

/// Minimum spacing per call class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pacing {
    pub sink: Duration,
    pub record: Duration,
    pub page: Duration,
}

impl Default for Pacing {
    fn default() -> Self {
        Self {
            sink: Duration::from_millis(100),
            record: Duration::from_millis(50),
            page: Duration::from_millis(1_000),
        }
    }
}

impl Pacing {
    /// No pacing at all.
    pub fn none() -> Self {
        Self {
            sink: Duration::ZERO,
            record: Duration::ZERO,
            page: Duration::ZERO,
        }
    }

    pub fn interval(&self, class: CallClass) -> Duration {
        match class {
            CallClass::Sink => self.sink,
            CallClass::Record => self.record,
            CallClass::Page => self.page,
        }
    }
}

/// Spaces consecutive calls of the same class by at least the configured
/// interval. Shared by every task of the process, so concurrent backfills
/// draw from the same budget.
///
/// Only waits for the remainder of the interval since the previous call;
/// never preempts anything.
pub struct RateController {
    pacing: Pacing,
    last: [Mutex<Option<Instant>>; 3],
}

impl RateController {
    pub fn new(pacing: Pacing) -> Self {
        Self {
            pacing,
            last: [Mutex::new(None), Mutex::new(None), Mutex::new(None)],
        }
    }

    pub fn pacing(&self) -> Pacing {
        self.pacing
    }

    /// Waits until a call of `class` may proceed.
    pub async fn throttle(&self, class: CallClass) {
        let interval = self.pacing.interval(class);
        if interval.is_zero() {
            return;
        }

        // Held across the sleep so callers of one class queue up in order.
        let mut last = self.last[class.slot()].lock().await;
        if let Some(previous) = *last {
            let ready_at = previous + interval;
            if ready_at > Instant::now() {
                sleep_until(ready_at).await;
            }
        }
        *last = Some(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn first_call_does_not_wait() {
        let rate = RateController::new(Pacing::default());
        let start = Instant::now();
        rate.throttle(CallClass::Page).await;
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn consecutive_calls_are_spaced() {
        let rate = RateController::new(Pacing::default());
        let start = Instant::now();
        for _ in 0..3 {
            rate.throttle(CallClass::Sink).await;
        }
        assert!(start.elapsed() >= Duration::from_millis(200));
        assert!(start.elapsed() < Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn elapsed_time_counts_toward_the_interval() {
        let rate = RateController::new(Pacing::default());
        rate.throttle(CallClass::Page).await;
        tokio::time::sleep(Duration::from_millis(700)).await;

        let start = Instant::now();
        rate.throttle(CallClass::Page).await;
        assert_eq!(start.elapsed(), Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn classes_are_independent() {
        let rate = RateController::new(Pacing::default());
        rate.throttle(CallClass::Page).await;

        let start = Instant::now();
        rate.throttle(CallClass::Sink).await;
        rate.throttle(CallClass::Record).await;
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test]
    async fn zero_pacing_never_sleeps() {
        let rate = RateController::new(Pacing::none());
        for _ in 0..100 {
            rate.throttle(CallClass::Page).await;
        }
    }
}
