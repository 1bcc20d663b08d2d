//! Priority admission control.
//!
//! The controller hands out a bounded number of permits. A caller that finds
//! no free permit waits in a queue ordered by [`Priority`] and then arrival
//! order. Every granted permit must be returned with
//! [`release_permission`](BackpressureController::release_permission), which
//! also reports whether the guarded operation succeeded. Those outcomes drive
//! the adaptive permit count:
//!
//! | Failure ratio over a window | Effect |
//! |---|---|
//! | above `shrink_threshold` | permits shrink by 20% (not below `min_concurrent`) |
//! | below `grow_threshold`, queue non-empty | permits grow by 10% (not above the ceiling) |
//!
//! Permits are keyed by operation id so a release for an id that was never
//! granted is ignored instead of corrupting the count.

use crate::config::BackpressureConfig;
use crate::error::{CoreError, CoreResult};
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// Admission priority. Higher values are served first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Priority {
    /// Background work.
    Low = 0,
    /// Regular operations.
    #[default]
    Normal = 1,
    /// Buffer flushes.
    High = 2,
}

/// Point-in-time view of the controller.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BackpressureStatus {
    /// Callers waiting for a permit.
    pub queue_length: usize,
    /// Permits currently held.
    pub active_operations: usize,
    /// Current permit limit.
    pub max_concurrent: usize,
    /// True while callers are queued.
    pub is_throttled: bool,
    /// Permits granted since creation.
    pub total_granted: u64,
    /// Requests rejected because the queue was full.
    pub total_rejected: u64,
    /// Releases reporting success.
    pub total_succeeded: u64,
    /// Releases reporting failure.
    pub total_failed: u64,
}

struct Waiter {
    priority: Priority,
    seq: u64,
    op_id: String,
    tx: oneshot::Sender<()>,
}

impl PartialEq for Waiter {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Waiter {}

impl PartialOrd for Waiter {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Waiter {
    // Max-heap: higher priority first, then lower sequence number.
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Default)]
struct State {
    held: HashMap<String, usize>,
    active: usize,
    max_concurrent: usize,
    waiters: BinaryHeap<Waiter>,
    next_seq: u64,
    window_releases: u32,
    window_failures: u32,
    total_granted: u64,
    total_rejected: u64,
    total_succeeded: u64,
    total_failed: u64,
}

impl State {
    /// Drops one permit held by `op_id`. Returns false if it holds none.
    fn take_permit(&mut self, op_id: &str) -> bool {
        match self.held.get_mut(op_id) {
            Some(count) if *count > 1 => *count -= 1,
            Some(_) => {
                self.held.remove(op_id);
            }
            None => return false,
        }
        self.active -= 1;
        true
    }

    fn grant(&mut self, op_id: String) {
        *self.held.entry(op_id).or_insert(0) += 1;
        self.active += 1;
        self.total_granted += 1;
    }

    fn dispatch(&mut self) {
        while self.active < self.max_concurrent {
            let Some(waiter) = self.waiters.pop() else {
                break;
            };
            // A dropped receiver means the caller gave up waiting.
            if waiter.tx.send(()).is_ok() {
                self.grant(waiter.op_id);
            } else {
                debug!(op_id = %waiter.op_id, "waiter abandoned before grant");
            }
        }
    }
}

/// Withdraws a queued request whose future was dropped.
struct PendingRequest<'a> {
    controller: &'a BackpressureController,
    op_id: &'a str,
    seq: u64,
    rx: oneshot::Receiver<()>,
    settled: bool,
}

impl Drop for PendingRequest<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let mut state = self.controller.state.lock();
        let queued = state.waiters.len();
        state.waiters.retain(|waiter| waiter.seq != self.seq);
        if state.waiters.len() < queued {
            debug!(op_id = self.op_id, "queued request withdrawn");
            return;
        }
        // Granted after the caller stopped waiting.
        if self.rx.try_recv().is_ok() && state.take_permit(self.op_id) {
            debug!(op_id = self.op_id, "unclaimed permit returned");
            state.dispatch();
        }
    }
}

/// Priority-ordered async semaphore with adaptive concurrency.
pub struct BackpressureController {
    config: BackpressureConfig,
    state: Mutex<State>,
}

impl BackpressureController {
    /// Creates a controller.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidConfig`] if the configuration is unusable.
    pub fn new(config: BackpressureConfig) -> CoreResult<Self> {
        config.validate()?;
        let state = State {
            max_concurrent: config.max_concurrent,
            ..State::default()
        };
        Ok(Self {
            config,
            state: Mutex::new(state),
        })
    }

    /// Waits for a permit for `op_id`.
    ///
    /// Returns immediately when a permit is free and nobody is queued.
    ///
    /// # Cancel safety
    ///
    /// Dropping the returned future before it completes leaves no permit
    /// behind: a queued request is withdrawn, and a permit granted in the
    /// meantime is handed to the next waiter.
    ///
    /// # Errors
    ///
    /// - [`CoreError::Overloaded`] if the wait queue is full
    /// - [`CoreError::Stopped`] if the controller was dropped while waiting
    pub async fn request_permission(&self, op_id: &str, priority: Priority) -> CoreResult<()> {
        let (rx, seq) = {
            let mut state = self.state.lock();
            if state.active < state.max_concurrent && state.waiters.is_empty() {
                state.grant(op_id.to_string());
                return Ok(());
            }

            let queue_length = state.waiters.len();
            if queue_length >= self.config.max_queue_length {
                state.total_rejected += 1;
                warn!(op_id, queue_length, "admission rejected, queue full");
                return Err(CoreError::Overloaded { queue_length });
            }

            let (tx, rx) = oneshot::channel();
            let seq = state.next_seq;
            state.next_seq += 1;
            state.waiters.push(Waiter {
                priority,
                seq,
                op_id: op_id.to_string(),
                tx,
            });
            debug!(op_id, ?priority, queue_length = queue_length + 1, "queued for permit");
            (rx, seq)
        };

        let mut pending = PendingRequest {
            controller: self,
            op_id,
            seq,
            rx,
            settled: false,
        };
        let granted = (&mut pending.rx).await.map_err(|_| CoreError::Stopped);
        pending.settled = true;
        granted
    }

    /// Returns the permit held by `op_id` and records the outcome.
    ///
    /// Unknown ids are ignored.
    pub fn release_permission(&self, op_id: &str, success: bool) {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        if !state.take_permit(op_id) {
            debug!(op_id, "release for unknown operation ignored");
            return;
        }

        if success {
            state.total_succeeded += 1;
        } else {
            state.total_failed += 1;
            state.window_failures += 1;
        }
        state.window_releases += 1;

        if state.window_releases >= self.config.adaptation_window {
            self.adapt(state);
        }
        state.dispatch();
    }

    fn adapt(&self, state: &mut State) {
        let ratio = f64::from(state.window_failures) / f64::from(state.window_releases);
        state.window_releases = 0;
        state.window_failures = 0;

        let current = state.max_concurrent;
        let next = if ratio > self.config.shrink_threshold {
            (current - current / 5).max(self.config.min_concurrent)
        } else if ratio < self.config.grow_threshold && !state.waiters.is_empty() {
            (current + (current / 10).max(1)).min(self.config.max_concurrent_ceiling)
        } else {
            current
        };

        if next != current {
            info!(
                from = current,
                to = next,
                failure_ratio = ratio,
                "adjusted concurrency limit"
            );
            state.max_concurrent = next;
        }
    }

    /// Returns a snapshot of the controller.
    pub fn status(&self) -> BackpressureStatus {
        let state = self.state.lock();
        BackpressureStatus {
            queue_length: state.waiters.len(),
            active_operations: state.active,
            max_concurrent: state.max_concurrent,
            is_throttled: !state.waiters.is_empty(),
            total_granted: state.total_granted,
            total_rejected: state.total_rejected,
            total_succeeded: state.total_succeeded,
            total_failed: state.total_failed,
        }
    }

    /// Number of callers currently waiting.
    pub fn queue_length(&self) -> usize {
        self.state.lock().waiters.len()
    }

    /// Returns the configuration.
    pub fn config(&self) -> &BackpressureConfig {
        &self.config
    }
}

impl Default for BackpressureController {
    fn default() -> Self {
        let config = BackpressureConfig::default();
        let state = State {
            max_concurrent: config.max_concurrent,
            ..State::default()
        };
        Self {
            config,
            state: Mutex::new(state),
        }
    }
}

impl std::fmt::Debug for BackpressureController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackpressureController")
            .field("config", &self.config)
            .field("status", &self.status())
            .finish()
    }
}
