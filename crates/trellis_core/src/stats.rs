//! Component statistics.
//!
//! Counters are atomic so they can be read while flushes and cleanup passes
//! are in progress. All counters are monotonically increasing; the only
//! gauges are `buffer_size` and the timestamps.
//!
//! # Usage
//!
//! ```rust,ignore
//! let buffer = registry.get_or_create("nouns", writer)?;
//! buffer.add("n-1", body).await;
//!
//! let stats = buffer.get_stats();
//! println!("Writes: {}", stats.total_writes);
//! println!("Deduplicated: {}", stats.deduplicated_writes);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

/// Sentinel for "never happened" in timestamp gauges.
const NEVER: u64 = 0;

fn load_timestamp(value: &AtomicU64) -> Option<u64> {
    match value.load(Ordering::Relaxed) {
        NEVER => None,
        ts => Some(ts),
    }
}

/// Write buffer statistics.
#[derive(Debug, Default)]
pub struct WriteBufferStats {
    /// Calls to `add`.
    total_writes: AtomicU64,
    /// `add` calls that replaced a buffered value.
    deduplicated_writes: AtomicU64,
    /// Flushes that wrote at least one item.
    total_flushes: AtomicU64,
    /// Items written successfully.
    items_flushed: AtomicU64,
    /// Flushes whose bulk write failed.
    failed_flushes: AtomicU64,
    /// Items put back into the buffer after a failed or rejected flush.
    requeued_writes: AtomicU64,
    /// Items dropped after exhausting their retries.
    failed_writes: AtomicU64,
    /// Current buffer length.
    buffer_size: AtomicU64,
    /// Wall-clock time of the last flush attempt.
    last_flush: AtomicU64,
}

impl WriteBufferStats {
    /// Creates a new stats instance.
    pub fn new() -> Self {
        Self::default()
    }

    // === Increment methods (internal use) ===

    pub(crate) fn record_add(&self, replaced: bool) {
        self.total_writes.fetch_add(1, Ordering::Relaxed);
        if replaced {
            self.deduplicated_writes.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_flush(&self, items: u64, at_millis: u64) {
        self.total_flushes.fetch_add(1, Ordering::Relaxed);
        self.items_flushed.fetch_add(items, Ordering::Relaxed);
        self.last_flush.store(at_millis, Ordering::Relaxed);
    }

    pub(crate) fn record_failed_flush(&self, at_millis: u64) {
        self.failed_flushes.fetch_add(1, Ordering::Relaxed);
        self.last_flush.store(at_millis, Ordering::Relaxed);
    }

    pub(crate) fn record_requeued(&self, items: u64) {
        self.requeued_writes.fetch_add(items, Ordering::Relaxed);
    }

    pub(crate) fn record_permanent_failure(&self) {
        self.failed_writes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn set_buffer_size(&self, size: usize) {
        self.buffer_size.store(size as u64, Ordering::Relaxed);
    }

    // === Getter methods (public API) ===

    /// Returns the number of `add` calls.
    pub fn total_writes(&self) -> u64 {
        self.total_writes.load(Ordering::Relaxed)
    }

    /// Returns the number of `add` calls that replaced a buffered value.
    pub fn deduplicated_writes(&self) -> u64 {
        self.deduplicated_writes.load(Ordering::Relaxed)
    }

    /// Returns the number of successful flushes.
    pub fn total_flushes(&self) -> u64 {
        self.total_flushes.load(Ordering::Relaxed)
    }

    /// Returns the number of items written.
    pub fn items_flushed(&self) -> u64 {
        self.items_flushed.load(Ordering::Relaxed)
    }

    /// Returns the number of failed flushes.
    pub fn failed_flushes(&self) -> u64 {
        self.failed_flushes.load(Ordering::Relaxed)
    }

    /// Returns the number of requeued items.
    pub fn requeued_writes(&self) -> u64 {
        self.requeued_writes.load(Ordering::Relaxed)
    }

    /// Returns the number of permanently failed items.
    ///
    /// Each dropped item is counted exactly once.
    pub fn failed_writes(&self) -> u64 {
        self.failed_writes.load(Ordering::Relaxed)
    }

    /// Returns the current buffer length.
    pub fn buffer_size(&self) -> u64 {
        self.buffer_size.load(Ordering::Relaxed)
    }

    /// Returns the wall-clock time of the last flush attempt.
    pub fn last_flush(&self) -> Option<u64> {
        load_timestamp(&self.last_flush)
    }

    /// Returns a snapshot of all stats.
    pub fn snapshot(&self) -> WriteBufferStatsSnapshot {
        WriteBufferStatsSnapshot {
            total_writes: self.total_writes(),
            deduplicated_writes: self.deduplicated_writes(),
            total_flushes: self.total_flushes(),
            items_flushed: self.items_flushed(),
            failed_flushes: self.failed_flushes(),
            requeued_writes: self.requeued_writes(),
            failed_writes: self.failed_writes(),
            buffer_size: self.buffer_size(),
            last_flush: self.last_flush(),
        }
    }
}

/// A point-in-time snapshot of write buffer statistics.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WriteBufferStatsSnapshot {
    /// Calls to `add`.
    pub total_writes: u64,
    /// `add` calls that replaced a buffered value.
    pub deduplicated_writes: u64,
    /// Successful flushes.
    pub total_flushes: u64,
    /// Items written.
    pub items_flushed: u64,
    /// Failed flushes.
    pub failed_flushes: u64,
    /// Requeued items.
    pub requeued_writes: u64,
    /// Permanently failed items.
    pub failed_writes: u64,
    /// Buffer length.
    pub buffer_size: u64,
    /// Last flush attempt, ms since the epoch.
    pub last_flush: Option<u64>,
}

/// Periodic cleanup statistics.
#[derive(Debug, Default)]
pub struct CleanupStats {
    items_processed: AtomicU64,
    items_deleted: AtomicU64,
    errors: AtomicU64,
    consistency_warnings: AtomicU64,
    runs: AtomicU64,
    last_run: AtomicU64,
    next_run: AtomicU64,
}

impl CleanupStats {
    /// Creates a new stats instance.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_pass(
        &self,
        processed: u64,
        deleted: u64,
        errors: u64,
        warnings: u64,
        at_millis: u64,
    ) {
        self.items_processed.fetch_add(processed, Ordering::Relaxed);
        self.items_deleted.fetch_add(deleted, Ordering::Relaxed);
        self.errors.fetch_add(errors, Ordering::Relaxed);
        self.consistency_warnings
            .fetch_add(warnings, Ordering::Relaxed);
        self.runs.fetch_add(1, Ordering::Relaxed);
        self.last_run.store(at_millis, Ordering::Relaxed);
    }

    pub(crate) fn set_next_run(&self, at_millis: Option<u64>) {
        self.next_run
            .store(at_millis.unwrap_or(NEVER), Ordering::Relaxed);
    }

    /// Returns the number of eligible items a pass attempted to delete.
    pub fn items_processed(&self) -> u64 {
        self.items_processed.load(Ordering::Relaxed)
    }

    /// Returns the number of items removed from storage.
    pub fn items_deleted(&self) -> u64 {
        self.items_deleted.load(Ordering::Relaxed)
    }

    /// Returns the number of storage or listing errors.
    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    /// Returns the number of non-fatal index removal failures.
    pub fn consistency_warnings(&self) -> u64 {
        self.consistency_warnings.load(Ordering::Relaxed)
    }

    /// Returns the number of completed passes.
    pub fn runs(&self) -> u64 {
        self.runs.load(Ordering::Relaxed)
    }

    /// Returns a snapshot of all stats.
    pub fn snapshot(&self) -> CleanupStatsSnapshot {
        CleanupStatsSnapshot {
            items_processed: self.items_processed(),
            items_deleted: self.items_deleted(),
            errors: self.errors(),
            consistency_warnings: self.consistency_warnings(),
            runs: self.runs(),
            last_run: load_timestamp(&self.last_run),
            next_run: load_timestamp(&self.next_run),
        }
    }
}

/// A point-in-time snapshot of cleanup statistics.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CleanupStatsSnapshot {
    /// Eligible items attempted.
    pub items_processed: u64,
    /// Items removed from storage.
    pub items_deleted: u64,
    /// Storage or listing errors.
    pub errors: u64,
    /// Index removal failures.
    pub consistency_warnings: u64,
    /// Completed passes.
    pub runs: u64,
    /// Start of the last pass, ms since the epoch.
    pub last_run: Option<u64>,
    /// Next scheduled pass, ms since the epoch.
    pub next_run: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_stats_are_zero() {
        let stats = WriteBufferStats::new();
        assert_eq!(stats.snapshot(), WriteBufferStatsSnapshot::default());
        assert_eq!(CleanupStats::new().snapshot(), CleanupStatsSnapshot::default());
    }

    #[test]
    fn record_buffer_operations() {
        let stats = WriteBufferStats::new();
        stats.record_add(false);
        stats.record_add(true);
        stats.record_flush(2, 1_000);
        stats.record_failed_flush(2_000);
        stats.record_requeued(3);
        stats.record_permanent_failure();
        stats.set_buffer_size(4);

        let snap = stats.snapshot();
        assert_eq!(snap.total_writes, 2);
        assert_eq!(snap.deduplicated_writes, 1);
        assert_eq!(snap.total_flushes, 1);
        assert_eq!(snap.items_flushed, 2);
        assert_eq!(snap.failed_flushes, 1);
        assert_eq!(snap.requeued_writes, 3);
        assert_eq!(snap.failed_writes, 1);
        assert_eq!(snap.buffer_size, 4);
        assert_eq!(snap.last_flush, Some(2_000));
    }

    #[test]
    fn record_cleanup_passes() {
        let stats = CleanupStats::new();
        stats.record_pass(5, 4, 1, 2, 10_000);
        stats.record_pass(1, 1, 0, 0, 20_000);
        stats.set_next_run(Some(30_000));

        let snap = stats.snapshot();
        assert_eq!(snap.items_processed, 6);
        assert_eq!(snap.items_deleted, 5);
        assert_eq!(snap.errors, 1);
        assert_eq!(snap.consistency_warnings, 2);
        assert_eq!(snap.runs, 2);
        assert_eq!(snap.last_run, Some(20_000));
        assert_eq!(snap.next_run, Some(30_000));

        stats.set_next_run(None);
        assert_eq!(stats.snapshot().next_run, None);
    }

    #[test]
    fn concurrent_updates() {
        use std::sync::Arc;
        use std::thread;

        let stats = Arc::new(WriteBufferStats::new());
        let mut handles = vec![];

        for _ in 0..10 {
            let s = Arc::clone(&stats);
            handles.push(thread::spawn(move || {
                for _ in 0..100 {
                    s.record_add(false);
                }
            }));
        }

        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(stats.total_writes(), 1000);
    }
}
