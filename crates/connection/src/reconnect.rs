//! Reconnect policy: a fixed back-off ladder and a single-slot scheduler.

use std::future::Future;
use std::time::Duration;

use crate::timer::{self, TimerHandle};

const DEFAULT_LADDER_MS: [u64; 6] = [1_000, 2_000, 4_000, 8_000, 16_000, 30_000];

/// Delays between reconnect attempts, indexed by attempt number and capped
/// at the last entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectBackoff {
    delays: Vec<Duration>,
}

impl Default for ReconnectBackoff {
    fn default() -> Self {
        Self {
            delays: DEFAULT_LADDER_MS
                .iter()
                .copied()
                .map(Duration::from_millis)
                .collect(),
        }
    }
}

impl ReconnectBackoff {
    pub fn new(delays: Vec<Duration>) -> Self {
        Self { delays }
    }

    /// The ladder must be non-empty and never step down.
    pub fn validate(&self) -> Result<(), String> {
        if self.delays.is_empty() {
            return Err("reconnect ladder must not be empty".into());
        }
        if self.delays.windows(2).any(|w| w[1] < w[0]) {
            return Err("reconnect ladder must be non-decreasing".into());
        }
        Ok(())
    }

    /// Delay before retry number `attempt` (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let idx = usize::try_from(attempt).unwrap_or(usize::MAX);
        self.delays
            .get(idx)
            .or_else(|| self.delays.last())
            .copied()
            .unwrap_or_default()
    }
}

/// Tracks the attempt counter and the (at most one) armed retry timer.
#[derive(Debug, Default)]
pub struct ReconnectScheduler {
    backoff: ReconnectBackoff,
    attempt: u32,
    pending: Option<TimerHandle>,
}

impl ReconnectScheduler {
    pub fn new(backoff: ReconnectBackoff) -> Self {
        Self {
            backoff,
            attempt: 0,
            pending: None,
        }
    }

    /// Arm `retry` after the next ladder delay.
    ///
    /// Returns the 1-based attempt number and the delay, or `None` when a
    /// retry is already armed.
    pub fn schedule<F>(&mut self, retry: F) -> Option<(u32, Duration)>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.pending.is_some() {
            return None;
        }
        let delay = self.backoff.delay_for_attempt(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        self.pending = Some(timer::schedule(delay, retry));
        Some((self.attempt, delay))
    }

    /// The armed retry has started running; a new one may be armed.
    pub fn fired(&mut self) {
        self.pending = None;
    }

    /// Successful socket open: start the ladder over.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn cancel(&mut self) {
        if let Some(timer) = self.pending.take() {
            timer.cancel();
        }
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn default_ladder() {
        let b = ReconnectBackoff::default();
        let secs: Vec<u64> = (0..8).map(|a| b.delay_for_attempt(a).as_secs()).collect();
        assert_eq!(secs, vec![1, 2, 4, 8, 16, 30, 30, 30]);
    }

    #[test]
    fn huge_attempt_is_capped() {
        let b = ReconnectBackoff::default();
        assert_eq!(b.delay_for_attempt(u32::MAX), Duration::from_secs(30));
    }

    #[test]
    fn validate_rejects_bad_ladders() {
        assert!(ReconnectBackoff::new(vec![]).validate().is_err());
        let down = ReconnectBackoff::new(vec![Duration::from_secs(2), Duration::from_secs(1)]);
        assert!(down.validate().is_err());
        let flat = ReconnectBackoff::new(vec![Duration::from_secs(1), Duration::from_secs(1)]);
        assert!(flat.validate().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn only_one_retry_pending() {
        let mut sched = ReconnectScheduler::default();
        assert_eq!(sched.schedule(async {}), Some((1, Duration::from_secs(1))));
        assert_eq!(sched.schedule(async {}), None);
        assert_eq!(sched.attempt(), 1);

        sched.fired();
        assert_eq!(sched.schedule(async {}), Some((2, Duration::from_secs(2))));
    }

    #[tokio::test(start_paused = true)]
    async fn reset_restarts_ladder() {
        let mut sched = ReconnectScheduler::default();
        sched.schedule(async {});
        sched.fired();
        sched.schedule(async {});
        sched.fired();
        sched.reset();
        assert_eq!(sched.schedule(async {}), Some((1, Duration::from_secs(1))));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_stops_retry() {
        let runs = Arc::new(AtomicU32::new(0));
        let counter = runs.clone();
        let mut sched = ReconnectScheduler::default();
        sched.schedule(async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        sched.cancel();
        assert!(!sched.is_pending());

        tokio::time::advance(Duration::from_secs(5)).await;
        tokio::task::yield_now().await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }
}
