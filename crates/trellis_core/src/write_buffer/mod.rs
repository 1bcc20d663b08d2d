//! Deduplicating write buffer.
//!
//! A [`WriteBuffer`] collects writes keyed by id and hands them to a
//! [`BulkWriter`] in batches. Repeated writes to the same id before a flush
//! collapse to the last value, so storage only ever sees the latest state.
//!
//! ## Flush triggers
//!
//! | Reason | Condition |
//! |---|---|
//! | [`FlushReason::Size`] | buffer length reached `max_buffer_size` |
//! | [`FlushReason::Interval`] | `flush_interval` elapsed and length ≥ `min_flush_size` |
//! | [`FlushReason::Pressure`] | backpressure queue > 10 and length > 10 |
//! | [`FlushReason::Forced`] | explicit [`flush`](WriteBuffer::flush) / [`force_flush`](WriteBuffer::force_flush) |
//! | [`FlushReason::Shutdown`] | [`shutdown`](WriteBuffer::shutdown) |
//!
//! ## Invariants
//!
//! - At most one flush runs per buffer; concurrent triggers share its result
//! - Items leave the live buffer when a flush takes them, so `add` during a
//!   flush never blocks on the write itself
//! - A failed item is buffered again unless a newer value for its id arrived
//!   meanwhile or it ran out of retries; exhausted items are counted in
//!   `failed_writes` exactly once
//! - Errors never reach `add` callers; they surface through stats and logs

mod entry;
mod registry;
mod writer;

pub use entry::{BufferedWrite, WriteState};
pub use registry::WriteBufferRegistry;
pub use writer::{BulkWriter, FnWriter};

use crate::backpressure::{BackpressureController, Priority};
use crate::clock::Clock;
use crate::config::{LoadTier, WriteBufferConfig};
use crate::error::{CoreError, CoreResult};
use crate::scheduler::Ticker;
use crate::stats::{WriteBufferStats, WriteBufferStatsSnapshot};
use parking_lot::{Mutex, RwLock};
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Backpressure queue length above which pressure flushes are proposed.
const PRESSURE_QUEUE_THRESHOLD: usize = 10;

/// Buffer length above which pressure flushes are proposed.
const PRESSURE_BUFFER_THRESHOLD: usize = 10;

/// Upper bound on the background tick period.
const MAX_TICK_PERIOD: Duration = Duration::from_millis(100);

/// Why a flush ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlushReason {
    /// The buffer reached its size limit.
    Size,
    /// The flush interval elapsed.
    Interval,
    /// The backpressure controller reported a long queue.
    Pressure,
    /// Requested by the caller.
    Forced,
    /// Drain during shutdown.
    Shutdown,
}

/// Outcome of one flush, or of a drain made of several.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlushResult {
    /// Items written.
    pub successful: usize,
    /// Items in failed bulk writes.
    pub failed: usize,
    /// Items put back into the buffer.
    pub requeued: usize,
    /// Items dropped after exhausting their retries.
    pub permanently_failed: usize,
    /// Wall time spent.
    pub duration: Duration,
    /// What triggered the flush.
    pub reason: FlushReason,
}

impl FlushResult {
    /// A result for a flush that found nothing to do.
    pub fn empty(reason: FlushReason) -> Self {
        Self {
            successful: 0,
            failed: 0,
            requeued: 0,
            permanently_failed: 0,
            duration: Duration::ZERO,
            reason,
        }
    }

    /// Items handed to the bulk writer.
    pub fn attempted(&self) -> usize {
        self.successful + self.failed
    }

    /// Returns true if the flush touched no items.
    pub fn is_empty(&self) -> bool {
        self.attempted() == 0 && self.requeued == 0
    }

    fn absorb(&mut self, other: &Self) {
        self.successful += other.successful;
        self.failed += other.failed;
        self.requeued += other.requeued;
        self.permanently_failed += other.permanently_failed;
        self.duration += other.duration;
    }
}

struct BufferState<T> {
    entries: HashMap<String, BufferedWrite<T>>,
    in_flight: HashSet<String>,
    last_flush_at: Instant,
    pending_flush: Option<watch::Receiver<Option<FlushResult>>>,
}

struct Inner<T> {
    category: String,
    writer: Arc<dyn BulkWriter<T>>,
    backpressure: Arc<BackpressureController>,
    clock: Arc<dyn Clock>,
    config: RwLock<WriteBufferConfig>,
    state: Mutex<BufferState<T>>,
    stats: WriteBufferStats,
    ticker: Ticker,
}

/// Clears the pending-flush slot even if the bulk writer panics.
struct PendingFlushSlot<'a, T>(&'a Inner<T>);

impl<T> Drop for PendingFlushSlot<'_, T> {
    fn drop(&mut self) {
        self.0.state.lock().pending_flush = None;
    }
}

/// A per-category deduplicating write buffer.
///
/// Cheap to clone; clones share the same buffer.
pub struct WriteBuffer<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for WriteBuffer<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> WriteBuffer<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Creates a stopped buffer.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidConfig`] if `config` is unusable.
    pub fn new(
        category: impl Into<String>,
        writer: Arc<dyn BulkWriter<T>>,
        backpressure: Arc<BackpressureController>,
        clock: Arc<dyn Clock>,
        config: WriteBufferConfig,
    ) -> CoreResult<Self> {
        config.validate()?;
        Ok(Self::from_validated(
            category.into(),
            writer,
            backpressure,
            clock,
            config,
        ))
    }

    pub(crate) fn from_validated(
        category: String,
        writer: Arc<dyn BulkWriter<T>>,
        backpressure: Arc<BackpressureController>,
        clock: Arc<dyn Clock>,
        config: WriteBufferConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                category,
                writer,
                backpressure,
                clock,
                config: RwLock::new(config),
                state: Mutex::new(BufferState {
                    entries: HashMap::new(),
                    in_flight: HashSet::new(),
                    last_flush_at: Instant::now(),
                    pending_flush: None,
                }),
                stats: WriteBufferStats::new(),
                ticker: Ticker::new(),
            }),
        }
    }

    /// Category this buffer serves.
    pub fn category(&self) -> &str {
        &self.inner.category
    }

    /// Buffers `data` under `id`, replacing any value not yet flushed.
    ///
    /// Waits only when the buffer is full: first for a running flush, then
    /// for a size flush of its own.
    pub async fn add(&self, id: impl Into<String>, data: T) {
        let id = id.into();
        let max_buffer_size = self.inner.config.read().max_buffer_size;

        if self.is_full_without(&id, max_buffer_size) {
            self.wait_for_pending_flush().await;
            if self.is_full_without(&id, max_buffer_size) {
                self.flush_with(FlushReason::Size).await;
            }
        }

        let len = {
            let mut state = self.inner.state.lock();
            let now = self.inner.clock.now_millis();
            let replaced = match state.entries.entry(id) {
                Entry::Occupied(mut slot) => {
                    slot.get_mut().replace(data, now);
                    true
                }
                Entry::Vacant(slot) => {
                    let write =
                        BufferedWrite::new(slot.key().clone(), data, &*self.inner.category, now);
                    slot.insert(write);
                    false
                }
            };
            self.inner.stats.record_add(replaced);
            self.inner.stats.set_buffer_size(state.entries.len());
            state.entries.len()
        };

        if len >= max_buffer_size {
            self.flush_with(FlushReason::Size).await;
        }
    }

    /// Runs one flush of up to `max_flush_batch` items.
    pub async fn flush(&self) -> FlushResult {
        self.flush_with(FlushReason::Forced).await
    }

    /// Flushes until the buffer is empty or a round makes no progress.
    pub async fn force_flush(&self) -> FlushResult {
        self.drain(FlushReason::Forced).await
    }

    /// Starts the background trigger loop.
    ///
    /// Returns `false` if it was already running. Must be called from within
    /// a tokio runtime.
    pub fn start(&self) -> bool {
        let period = self.tick_period();
        let weak = Arc::downgrade(&self.inner);
        let started = self.inner.ticker.start(period, move || {
            let weak = weak.clone();
            async move {
                if let Some(inner) = weak.upgrade() {
                    WriteBuffer { inner }.maybe_flush().await;
                }
            }
        });
        if started {
            info!(category = %self.inner.category, ?period, "write buffer started");
        }
        started
    }

    /// Stops the background trigger loop. Buffered items stay buffered.
    pub fn stop(&self) -> bool {
        let stopped = self.inner.ticker.stop();
        if stopped {
            info!(category = %self.inner.category, "write buffer stopped");
        }
        stopped
    }

    /// Stops the trigger loop and drains the buffer.
    pub async fn shutdown(&self) -> FlushResult {
        self.stop();
        self.drain(FlushReason::Shutdown).await
    }

    /// Returns true while the trigger loop runs.
    pub fn is_running(&self) -> bool {
        self.inner.ticker.is_running()
    }

    /// Switches to the preset tier for `pending` outstanding requests.
    pub fn adjust_for_load(&self, pending: usize) -> LoadTier {
        let tier = LoadTier::for_pending(pending);
        let changed = {
            let mut config = self.inner.config.write();
            let before = config.clone();
            config.apply_tier(tier);
            *config != before
        };

        if changed {
            info!(category = %self.inner.category, ?tier, pending, "adjusted write buffer for load");
            let period = self.tick_period();
            if self.inner.ticker.period().is_some_and(|p| p != period) && self.inner.ticker.stop() {
                self.start();
            }
        }
        tier
    }

    /// Proposes a flush reason from the current triggers, if any.
    pub fn flush_trigger(&self) -> Option<FlushReason> {
        let config = self.inner.config.read().clone();
        let (len, since_last) = {
            let state = self.inner.state.lock();
            if state.pending_flush.is_some() {
                return None;
            }
            (state.entries.len(), state.last_flush_at.elapsed())
        };

        if len == 0 {
            None
        } else if len >= config.max_buffer_size {
            Some(FlushReason::Size)
        } else if since_last >= config.flush_interval && len >= config.min_flush_size {
            Some(FlushReason::Interval)
        } else if len > PRESSURE_BUFFER_THRESHOLD
            && self.inner.backpressure.queue_length() > PRESSURE_QUEUE_THRESHOLD
        {
            Some(FlushReason::Pressure)
        } else {
            None
        }
    }

    /// Flushes if a trigger fires. This is what the background loop runs.
    pub async fn maybe_flush(&self) -> Option<FlushResult> {
        let reason = self.flush_trigger()?;
        Some(self.flush_with(reason).await)
    }

    /// Current configuration.
    pub fn config(&self) -> WriteBufferConfig {
        self.inner.config.read().clone()
    }

    /// Number of buffered items, excluding any in flight.
    pub fn len(&self) -> usize {
        self.inner.state.lock().entries.len()
    }

    /// Returns true if nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Lifecycle state of `id`, if it is buffered or in flight.
    pub fn state_of(&self, id: &str) -> Option<WriteState> {
        let state = self.inner.state.lock();
        state
            .entries
            .get(id)
            .map(|write| write.state)
            .or_else(|| state.in_flight.contains(id).then_some(WriteState::InFlight))
    }

    /// Returns a snapshot of the buffer statistics.
    pub fn get_stats(&self) -> WriteBufferStatsSnapshot {
        let mut snapshot = self.inner.stats.snapshot();
        snapshot.buffer_size = self.len() as u64;
        snapshot
    }

    fn tick_period(&self) -> Duration {
        self.inner.config.read().flush_interval.min(MAX_TICK_PERIOD)
    }

    fn is_full_without(&self, id: &str, max_buffer_size: usize) -> bool {
        let state = self.inner.state.lock();
        state.entries.len() >= max_buffer_size && !state.entries.contains_key(id)
    }

    async fn wait_for_pending_flush(&self) {
        let pending = self.inner.state.lock().pending_flush.clone();
        if let Some(rx) = pending {
            await_flush(rx).await;
        }
    }

    async fn flush_with(&self, reason: FlushReason) -> FlushResult {
        let rx = {
            let mut state = self.inner.state.lock();
            match &state.pending_flush {
                Some(rx) => rx.clone(),
                None => {
                    let (tx, rx) = watch::channel(None);
                    state.pending_flush = Some(rx.clone());
                    tokio::spawn(Arc::clone(&self.inner).run_flush(reason, tx));
                    rx
                }
            }
        };
        await_flush(rx)
            .await
            .unwrap_or_else(|| FlushResult::empty(reason))
    }

    async fn drain(&self, reason: FlushReason) -> FlushResult {
        let mut total = FlushResult::empty(reason);
        loop {
            let round = self.flush_with(reason).await;
            let stalled = round.successful == 0 && (round.failed > 0 || round.requeued > 0);
            total.absorb(&round);
            if self.is_empty() || stalled {
                break;
            }
        }
        if !total.is_empty() {
            info!(
                category = %self.inner.category,
                ?reason,
                successful = total.successful,
                remaining = self.len(),
                "drained write buffer"
            );
        }
        total
    }
}

impl<T> Inner<T>
where
    T: Clone + Send + Sync + 'static,
{
    async fn run_flush(self: Arc<Self>, reason: FlushReason, tx: watch::Sender<Option<FlushResult>>) {
        let slot = PendingFlushSlot(&*self);
        let result = self.flush_batch(reason).await;
        drop(slot);
        tx.send_replace(Some(result));
    }

    async fn flush_batch(&self, reason: FlushReason) -> FlushResult {
        let started = Instant::now();
        let config = self.config.read().clone();
        let mut batch = self.take_batch(config.max_flush_batch);
        if batch.is_empty() {
            return FlushResult::empty(reason);
        }
        let count = batch.len();
        let op_id = format!("flush:{}:{}", self.category, Uuid::new_v4());

        if let Err(err) = self
            .backpressure
            .request_permission(&op_id, Priority::High)
            .await
        {
            warn!(
                category = %self.category,
                items = count,
                error = %err,
                "flush admission rejected, requeueing"
            );
            let requeued = self.return_unattempted(batch);
            self.stats.record_requeued(requeued as u64);
            return FlushResult {
                requeued,
                duration: started.elapsed(),
                ..FlushResult::empty(reason)
            };
        }

        let items: HashMap<String, T> = batch
            .iter()
            .map(|write| (write.id.clone(), write.data.clone()))
            .collect();
        // A panicking writer fails the batch instead of stranding it in flight.
        let writer = Arc::clone(&self.writer);
        let outcome = match tokio::spawn(async move { writer.write_batch(items).await }).await {
            Ok(outcome) => outcome,
            Err(err) => Err(CoreError::write_failed(format!("bulk writer aborted: {err}"))),
        };
        self.backpressure
            .release_permission(&op_id, outcome.is_ok());
        let now = self.clock.now_millis();

        match outcome {
            Ok(()) => {
                for write in &mut batch {
                    write.mark_flushed();
                }
                self.finish_in_flight(&batch);
                self.stats.record_flush(count as u64, now);
                info!(category = %self.category, items = count, ?reason, "flush completed");
                FlushResult {
                    successful: count,
                    duration: started.elapsed(),
                    ..FlushResult::empty(reason)
                }
            }
            Err(err) => {
                self.stats.record_failed_flush(now);
                warn!(
                    category = %self.category,
                    items = count,
                    error = %err,
                    "flush failed, requeueing"
                );
                let (requeued, permanently_failed) = self.requeue_failed(batch, config.max_retries);
                self.stats.record_requeued(requeued as u64);
                FlushResult {
                    failed: count,
                    requeued,
                    permanently_failed,
                    duration: started.elapsed(),
                    ..FlushResult::empty(reason)
                }
            }
        }
    }

    /// Removes up to `cap` of the oldest items from the live buffer.
    fn take_batch(&self, cap: usize) -> Vec<BufferedWrite<T>> {
        let mut state = self.state.lock();
        let mut ids: Vec<(u64, String)> = state
            .entries
            .values()
            .map(|write| (write.timestamp, write.id.clone()))
            .collect();
        ids.sort_unstable();
        ids.truncate(cap);

        let mut batch = Vec::with_capacity(ids.len());
        for (_, id) in ids {
            if let Some(mut write) = state.entries.remove(&id) {
                write.mark_in_flight();
                state.in_flight.insert(id);
                batch.push(write);
            }
        }
        state.last_flush_at = Instant::now();
        self.stats.set_buffer_size(state.entries.len());
        batch
    }

    fn finish_in_flight(&self, batch: &[BufferedWrite<T>]) {
        let mut state = self.state.lock();
        for write in batch {
            state.in_flight.remove(&write.id);
        }
    }

    fn return_unattempted(&self, batch: Vec<BufferedWrite<T>>) -> usize {
        let mut state = self.state.lock();
        let mut returned = 0;
        for mut write in batch {
            state.in_flight.remove(&write.id);
            if state.entries.contains_key(&write.id) {
                continue;
            }
            write.return_unattempted();
            state.entries.insert(write.id.clone(), write);
            returned += 1;
        }
        self.stats.set_buffer_size(state.entries.len());
        returned
    }

    fn requeue_failed(&self, batch: Vec<BufferedWrite<T>>, max_retries: u32) -> (usize, usize) {
        let mut state = self.state.lock();
        let mut requeued = 0;
        let mut dropped = 0;

        for mut write in batch {
            state.in_flight.remove(&write.id);
            if state.entries.contains_key(&write.id) {
                debug!(category = %self.category, id = %write.id, "failed write superseded by newer value");
                continue;
            }
            match write.record_failure(max_retries) {
                WriteState::PermanentlyFailed => {
                    let err = CoreError::RetryExhausted {
                        id: write.id.clone(),
                        attempts: write.retry_count,
                    };
                    error!(category = %self.category, error = %err, "dropping buffered write");
                    self.stats.record_permanent_failure();
                    dropped += 1;
                }
                _ => {
                    debug!(
                        category = %self.category,
                        id = %write.id,
                        attempt = write.retry_count,
                        "requeued buffered write"
                    );
                    state.entries.insert(write.id.clone(), write);
                    requeued += 1;
                }
            }
        }
        self.stats.set_buffer_size(state.entries.len());
        (requeued, dropped)
    }
}

async fn await_flush(mut rx: watch::Receiver<Option<FlushResult>>) -> Option<FlushResult> {
    match rx.wait_for(Option::is_some).await {
        Ok(result) => Option::clone(&result),
        Err(_) => None,
    }
}

impl<T> std::fmt::Debug for WriteBuffer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteBuffer")
            .field("category", &self.inner.category)
            .field("len", &self.inner.state.lock().entries.len())
            .field("running", &self.inner.ticker.is_running())
            .finish()
    }
}
