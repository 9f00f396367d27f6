//! A `setTimeout`-style scheduler for the client's single-threaded
//! cooperative model (spec §9 "Coroutines/event-loop code"): schedules a
//! task to run after a delay, cancellable before it fires. Used by the
//! reconnect timer, which must be a *single* outstanding timer per
//! connection (a fresh reconnect attempt cancels any prior one).

use std::time::Duration;
use tokio::task::JoinHandle;

/// Holds at most one scheduled task. Dropping or re-scheduling cancels
/// whatever was previously pending.
pub struct Ticker {
    handle: Option<JoinHandle<()>>,
}

impl Ticker {
    pub fn new() -> Self {
        Self { handle: None }
    }

    /// Cancels any previously scheduled task and schedules `task` to run
    /// after `after`.
    pub fn schedule<F>(&mut self, after: Duration, task: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        self.cancel();
        self.handle = Some(tokio::spawn(async move {
            tokio::time::sleep(after).await;
            task.await;
        }));
    }

    pub fn cancel(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl Default for Ticker {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.cancel();
    }
}
