//! One-shot and periodic timers on the tokio runtime.
//!
//! Every timer runs in its own task and is controlled through a
//! [`TimerHandle`]. Cancellation is cooperative: a cancelled timer never
//! starts another firing, but a firing that already began runs to completion.
//! Callbacks must therefore tolerate running once after `cancel()`.

use std::future::Future;
use std::time::Duration;

use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Cancels its timer when [`cancel`](Self::cancel) is called or when dropped.
#[derive(Debug)]
pub struct TimerHandle {
    token: CancellationToken,
}

impl TimerHandle {
    fn new() -> (Self, CancellationToken) {
        let token = CancellationToken::new();
        let child = token.clone();
        (Self { token }, child)
    }

    /// Stop the timer. Idempotent.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Whether the timer has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Run `f` once after `delay`.
pub fn schedule_once<F, Fut>(delay: Duration, f: F) -> TimerHandle
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let (handle, cancel) = TimerHandle::new();
    drop(tokio::spawn(async move {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {}
            () = time::sleep(delay) => f().await,
        }
    }));
    handle
}

/// Run `f` every `period`, first firing one full period from now.
///
/// A slow callback delays the following tick rather than causing a burst.
pub fn schedule_periodic<F, Fut>(period: Duration, f: F) -> TimerHandle
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let (handle, cancel) = TimerHandle::new();
    drop(tokio::spawn(async move {
        let mut ticker = time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                _ = ticker.tick() => f().await,
            }
        }
    }));
    handle
}
