//! Periodic purge of soft-deleted nouns.
//!
//! A pass pages through storage, collects nouns that carry the soft-delete
//! marker and are older than `max_age`, and removes each one in a fixed
//! order:
//!
//! 1. storage (`delete_noun`): on failure the noun is left alone and retried
//!    by the next pass
//! 2. vector index (`remove_item`): failure is a [`ConsistencyWarning`]
//! 3. metadata index (`remove_from_index`): failure is a [`ConsistencyWarning`]
//!
//! Index failures are not retried because the storage record is already
//! gone; they are reported so a reconciliation job can act on them.
//!
//! Each batch runs under a [`Priority::Normal`] permit from the shared
//! [`BackpressureController`]. If admission is refused, the rest of the pass
//! is deferred and counted in [`CleanupReport::deferred`].
//!
//! A pass scans at most `max_scan_per_pass` nouns, starting where the
//! previous pass stopped and wrapping to the start once the listing is
//! exhausted, so every noun is eventually inspected.
//!
//! Passes never overlap. A pass requested while another is running returns
//! a report with `skipped` set.

use crate::backpressure::{BackpressureController, Priority};
use crate::clock::{millis, Clock};
use crate::config::CleanupConfig;
use crate::error::CoreResult;
use crate::scheduler::Ticker;
use crate::stats::{CleanupStats, CleanupStatsSnapshot};
use parking_lot::RwLock;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use trellis_storage::{deleted_at, IndexRemover, NounStore, Pagination, VectorRemover};
use uuid::Uuid;

/// Scheduling state of a [`PeriodicCleanup`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CleanupState {
    /// No pass is scheduled.
    Stopped,
    /// Waiting for the next scheduled pass.
    Scheduled,
    /// A pass is in progress.
    Running,
}

/// Index a removal warning refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexKind {
    /// The vector index.
    Vector,
    /// The metadata index.
    Metadata,
}

impl fmt::Display for IndexKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Vector => f.write_str("vector"),
            Self::Metadata => f.write_str("metadata"),
        }
    }
}

/// A noun left behind in an index after its storage record was deleted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsistencyWarning {
    /// Noun id.
    pub id: String,
    /// Index that still references it.
    pub index: IndexKind,
    /// What went wrong.
    pub reason: String,
}

/// Outcome of one cleanup pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// Nouns inspected.
    pub scanned: usize,
    /// Nouns found eligible.
    pub eligible: usize,
    /// Nouns removed from storage.
    pub deleted: usize,
    /// Storage deletions or listings that failed.
    pub storage_errors: usize,
    /// Index removals that failed.
    pub warnings: Vec<ConsistencyWarning>,
    /// Eligible nouns left for the next pass because admission was refused.
    pub deferred: usize,
    /// Wall time spent.
    pub duration: Duration,
    /// True if the pass did not run because another one was in progress.
    pub skipped: bool,
}

impl CleanupReport {
    fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }
}

struct Inner {
    storage: Arc<dyn NounStore>,
    vectors: Arc<dyn VectorRemover>,
    metadata: Arc<dyn IndexRemover>,
    backpressure: Arc<BackpressureController>,
    clock: Arc<dyn Clock>,
    config: RwLock<CleanupConfig>,
    running: AtomicBool,
    /// Listing offset the next pass starts from.
    cursor: AtomicUsize,
    stats: CleanupStats,
    ticker: Ticker,
}

/// Resets the running flag when a pass ends, however it ends.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Scheduled removal of expired soft-deleted nouns.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct PeriodicCleanup {
    inner: Arc<Inner>,
}

impl PeriodicCleanup {
    /// Creates a stopped cleanup service.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidConfig`](crate::CoreError::InvalidConfig)
    /// if `config` is unusable.
    pub fn new(
        storage: Arc<dyn NounStore>,
        vectors: Arc<dyn VectorRemover>,
        metadata: Arc<dyn IndexRemover>,
        backpressure: Arc<BackpressureController>,
        clock: Arc<dyn Clock>,
        config: CleanupConfig,
    ) -> CoreResult<Self> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(Inner {
                storage,
                vectors,
                metadata,
                backpressure,
                clock,
                config: RwLock::new(config),
                running: AtomicBool::new(false),
                cursor: AtomicUsize::new(0),
                stats: CleanupStats::new(),
                ticker: Ticker::new(),
            }),
        })
    }

    /// Schedules passes every `cleanup_interval`, the first one interval
    /// from now.
    ///
    /// No-op when disabled or already started. Must be called from within
    /// a tokio runtime.
    pub fn start(&self) -> bool {
        let config = self.inner.config.read().clone();
        if !config.enabled {
            info!("periodic cleanup disabled, not scheduling");
            return false;
        }

        let weak = Arc::downgrade(&self.inner);
        let started = self.inner.ticker.start(config.cleanup_interval, move || {
            let weak = weak.clone();
            async move {
                if let Some(inner) = weak.upgrade() {
                    PeriodicCleanup { inner }.run_now().await;
                }
            }
        });
        if started {
            self.schedule_next(config.cleanup_interval);
            info!(interval = ?config.cleanup_interval, "periodic cleanup started");
        }
        started
    }

    /// Cancels scheduled passes. A pass in progress runs to completion.
    pub fn stop(&self) -> bool {
        let stopped = self.inner.ticker.stop();
        if stopped {
            self.inner.stats.set_next_run(None);
            info!("periodic cleanup stopped");
        }
        stopped
    }

    /// Current scheduling state.
    pub fn state(&self) -> CleanupState {
        if self.inner.running.load(Ordering::Acquire) {
            CleanupState::Running
        } else if self.inner.ticker.is_running() {
            CleanupState::Scheduled
        } else {
            CleanupState::Stopped
        }
    }

    /// Current configuration.
    pub fn config(&self) -> CleanupConfig {
        self.inner.config.read().clone()
    }

    /// Replaces the configuration.
    ///
    /// Thresholds apply from the next pass. A changed interval or `enabled`
    /// flag reschedules a started service.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidConfig`](crate::CoreError::InvalidConfig)
    /// and keeps the old configuration if `config` is unusable.
    pub fn update_config(&self, config: CleanupConfig) -> CoreResult<()> {
        config.validate()?;
        let previous = std::mem::replace(&mut *self.inner.config.write(), config.clone());

        let schedule_changed = previous.cleanup_interval != config.cleanup_interval
            || previous.enabled != config.enabled;
        if schedule_changed && self.inner.ticker.is_running() {
            self.stop();
            self.start();
        }
        debug!(?config, "cleanup configuration updated");
        Ok(())
    }

    /// Returns a snapshot of the cleanup statistics.
    pub fn stats(&self) -> CleanupStatsSnapshot {
        self.inner.stats.snapshot()
    }

    /// Runs a pass now, unless one is already running.
    pub async fn run_now(&self) -> CleanupReport {
        if self
            .inner
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("cleanup pass already running, skipping");
            return CleanupReport::skipped();
        }
        let _guard = RunningGuard(&self.inner.running);

        let started = Instant::now();
        let config = self.inner.config.read().clone();
        let now = self.inner.clock.now_millis();
        let mut report = CleanupReport::default();

        let start = self.inner.cursor.load(Ordering::Acquire);
        let (eligible, end) = self.scan(&config, start, now, &mut report).await;
        report.eligible = eligible.len();

        for (i, chunk) in eligible.chunks(config.batch_size).enumerate() {
            if i > 0 {
                tokio::task::yield_now().await;
                if !config.batch_delay.is_zero() {
                    tokio::time::sleep(config.batch_delay).await;
                }
            }

            let op_id = format!("cleanup:{}", Uuid::new_v4());
            if let Err(err) = self
                .inner
                .backpressure
                .request_permission(&op_id, Priority::Normal)
                .await
            {
                report.deferred = eligible.len() - i * config.batch_size;
                warn!(deferred = report.deferred, error = %err, "cleanup admission rejected, deferring");
                break;
            }
            let errors_before = report.storage_errors;
            for id in chunk {
                self.purge(id, &mut report).await;
            }
            self.inner
                .backpressure
                .release_permission(&op_id, report.storage_errors == errors_before);
        }
        report.duration = started.elapsed();

        // Deletions all fall inside the scanned window and shift the rest
        // of the listing down. A deferred pass rescans the same window.
        let next = match end {
            Some(_) if report.deferred > 0 => start,
            Some(end) => end.saturating_sub(report.deleted),
            None => 0,
        };
        self.inner.cursor.store(next, Ordering::Release);

        self.inner.stats.record_pass(
            report.eligible as u64,
            report.deleted as u64,
            report.storage_errors as u64,
            report.warnings.len() as u64,
            now,
        );
        if self.inner.ticker.is_running() {
            self.schedule_next(config.cleanup_interval);
        }

        info!(
            scanned = report.scanned,
            eligible = report.eligible,
            deleted = report.deleted,
            storage_errors = report.storage_errors,
            warnings = report.warnings.len(),
            deferred = report.deferred,
            next_offset = next,
            duration_ms = millis(report.duration),
            "cleanup pass completed"
        );
        report
    }

    /// Collects eligible ids from `start`, bounded by `max_scan_per_pass`.
    ///
    /// Returns the offset to resume from, or `None` once the listing is
    /// exhausted.
    async fn scan(
        &self,
        config: &CleanupConfig,
        start: usize,
        now: u64,
        report: &mut CleanupReport,
    ) -> (Vec<String>, Option<usize>) {
        let max_age = millis(config.max_age);
        let mut eligible = Vec::new();
        let mut offset = start;

        while report.scanned < config.max_scan_per_pass {
            let limit = config
                .scan_page_size
                .min(config.max_scan_per_pass - report.scanned);
            let page = match self.inner.storage.get_nouns(Pagination::new(offset, limit)).await {
                Ok(page) => page,
                Err(err) => {
                    error!(offset, error = %err, "cleanup scan failed");
                    report.storage_errors += 1;
                    return (eligible, Some(offset));
                }
            };

            if page.items.is_empty() && offset > 0 && report.scanned == 0 {
                debug!(offset, "listing shrank below the scan cursor, restarting");
                offset = 0;
                continue;
            }

            for noun in &page.items {
                report.scanned += 1;
                let expired = deleted_at(&noun.metadata)
                    .is_some_and(|at| now.saturating_sub(at) > max_age);
                if expired {
                    eligible.push(noun.id.clone());
                }
            }

            if !page.has_more || page.items.is_empty() {
                return (eligible, None);
            }
            offset = page.next_offset.unwrap_or(offset + page.items.len());
        }
        (eligible, Some(offset))
    }

    async fn purge(&self, id: &str, report: &mut CleanupReport) {
        if let Err(err) = self.inner.storage.delete_noun(id).await {
            error!(id, error = %err, "storage deletion failed, will retry next pass");
            report.storage_errors += 1;
            return;
        }
        report.deleted += 1;

        let vector_failure = match self.inner.vectors.remove_item(id).await {
            Ok(true) => None,
            Ok(false) => Some("not present in vector index".to_string()),
            Err(err) => Some(err.to_string()),
        };
        if let Some(reason) = vector_failure {
            self.warn(id, IndexKind::Vector, reason, report);
        }

        if let Err(err) = self.inner.metadata.remove_from_index(id).await {
            self.warn(id, IndexKind::Metadata, err.to_string(), report);
        }
    }

    fn warn(&self, id: &str, index: IndexKind, reason: String, report: &mut CleanupReport) {
        warn!(id, %index, %reason, "index removal failed after storage deletion");
        report.warnings.push(ConsistencyWarning {
            id: id.to_string(),
            index,
            reason,
        });
    }

    fn schedule_next(&self, interval: Duration) {
        let next = self
            .inner
            .clock
            .now_millis()
            .saturating_add(millis(interval));
        self.inner.stats.set_next_run(Some(next));
    }
}

impl fmt::Debug for PeriodicCleanup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeriodicCleanup")
            .field("state", &self.state())
            .field("config", &*self.inner.config.read())
            .finish()
    }
}
