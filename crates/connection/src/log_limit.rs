//! Keyed rate limiting for repetitive log lines.
//!
//! A dead editor makes the reconnect loop log on every attempt, forever.
//! Callers ask [`LogLimiter::allow`] before logging; each key gets a burst of
//! ten lines and then one more line per half second.

use std::num::NonZeroU32;
use std::time::Duration;

use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};

const BURST: u32 = 10;
const REPLENISH_EVERY: Duration = Duration::from_millis(500);

pub struct LogLimiter {
    limiter: DefaultKeyedRateLimiter<&'static str>,
}

impl LogLimiter {
    pub fn new() -> Self {
        let burst = NonZeroU32::new(BURST).unwrap_or(NonZeroU32::MIN);
        let quota = Quota::with_period(REPLENISH_EVERY)
            .unwrap_or_else(|| Quota::per_second(NonZeroU32::MIN))
            .allow_burst(burst);
        Self {
            limiter: RateLimiter::keyed(quota),
        }
    }

    /// Whether a line under `key` may be logged now.
    pub fn allow(&self, key: &'static str) -> bool {
        self.limiter.check_key(&key).is_ok()
    }
}

impl Default for LogLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for LogLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogLimiter").finish_non_exhaustive()
    }
}
