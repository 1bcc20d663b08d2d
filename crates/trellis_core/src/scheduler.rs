//! Background tick loops with cooperative cancellation.
//!
//! A [`Ticker`] owns at most one spawned loop. Each iteration sleeps for the
//! period and then awaits the tick callback to completion, so the next sleep
//! starts only after the previous tick finished. Cancelling the loop never
//! interrupts a tick in progress; the loop exits at its next sleep.

use parking_lot::Mutex;
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// A clonable cancellation flag.
#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: std::sync::Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    /// Creates a token that is not cancelled.
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: std::sync::Arc::new(tx),
            rx,
        }
    }

    /// Cancels the token and wakes every waiter.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    /// Returns true once [`cancel`](Self::cancel) was called.
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Completes when the token is cancelled.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        // The sender lives as long as any token clone, so this only errs
        // if every clone is gone, which cannot happen while `self` exists.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

struct Running {
    token: CancelToken,
    handle: JoinHandle<()>,
    period: Duration,
}

/// Owner of a restartable background loop.
#[derive(Default)]
pub struct Ticker {
    running: Mutex<Option<Running>>,
}

impl Ticker {
    /// Creates a stopped ticker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawns the loop calling `tick` every `period`.
    ///
    /// Returns `false` without spawning if a loop is already running.
    /// Must be called from within a tokio runtime.
    pub fn start<F, Fut>(&self, period: Duration, mut tick: F) -> bool
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut running = self.running.lock();
        if running.as_ref().is_some_and(|r| !r.handle.is_finished()) {
            return false;
        }

        let token = CancelToken::new();
        let loop_token = token.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = loop_token.cancelled() => break,
                    () = tokio::time::sleep(period) => {}
                }
                if loop_token.is_cancelled() {
                    break;
                }
                tick().await;
            }
        });

        *running = Some(Running {
            token,
            handle,
            period,
        });
        true
    }

    /// Cancels the loop. Returns `false` if it was not running.
    pub fn stop(&self) -> bool {
        match self.running.lock().take() {
            Some(running) => {
                running.token.cancel();
                true
            }
            None => false,
        }
    }

    /// Returns true while a loop is spawned and not cancelled.
    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .as_ref()
            .is_some_and(|r| !r.token.is_cancelled() && !r.handle.is_finished())
    }

    /// Period of the running loop, if any.
    pub fn period(&self) -> Option<Duration> {
        self.running.lock().as_ref().map(|r| r.period)
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        if let Some(running) = self.running.get_mut().take() {
            running.token.cancel();
        }
    }
}

impl std::fmt::Debug for Ticker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ticker")
            .field("running", &self.is_running())
            .field("period", &self.period())
            .finish()
    }
}
