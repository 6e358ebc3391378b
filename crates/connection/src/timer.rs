//! One-shot timers on the Tokio clock.
//!
//! Every deadline in the crate (command expiry, reconnect backoff) goes
//! through [`schedule`], so tests can drive them with a paused runtime and
//! `tokio::time::advance`.

use std::future::Future;
use std::time::Duration;

use tokio::task::AbortHandle;

/// Handle to a scheduled task. Dropping the handle does **not** cancel it.
#[derive(Debug)]
pub struct TimerHandle {
    abort: AbortHandle,
}

impl TimerHandle {
    /// Cancel the timer. A no-op if it already fired.
    pub fn cancel(&self) {
        self.abort.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.abort.is_finished()
    }
}

/// Run `task` once `delay` has elapsed. Must be called from within a Tokio
/// runtime.
pub fn schedule<F>(delay: Duration, task: F) -> TimerHandle
where
    F: Future<Output = ()> + Send + 'static,
{
    let join = tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        task.await;
    });
    TimerHandle {
        abort: join.abort_handle(),
    }
}
