//! Component configuration.

use crate::error::{CoreError, CoreResult};
use std::time::Duration;

/// Maximum number of items taken by a single flush.
pub const MAX_FLUSH_BATCH: usize = 500;

/// Configuration for a [`WriteBuffer`](crate::WriteBuffer).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteBufferConfig {
    /// Buffer length that triggers an immediate flush.
    pub max_buffer_size: usize,

    /// Time since the last flush after which a time-based flush is proposed.
    pub flush_interval: Duration,

    /// Minimum buffer length for a time-based flush.
    pub min_flush_size: usize,

    /// Flush attempts per item before it is dropped as permanently failed.
    pub max_retries: u32,

    /// Maximum number of items taken by one flush.
    pub max_flush_batch: usize,
}

impl Default for WriteBufferConfig {
    fn default() -> Self {
        let mut config = Self {
            max_buffer_size: 0,
            flush_interval: Duration::ZERO,
            min_flush_size: 0,
            max_retries: 3,
            max_flush_batch: MAX_FLUSH_BATCH,
        };
        config.apply_tier(LoadTier::Low);
        config
    }
}

impl WriteBufferConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the buffer length that forces a flush.
    #[must_use]
    pub const fn max_buffer_size(mut self, size: usize) -> Self {
        self.max_buffer_size = size;
        self
    }

    /// Sets the time-based flush interval.
    #[must_use]
    pub const fn flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    /// Sets the minimum size for a time-based flush.
    #[must_use]
    pub const fn min_flush_size(mut self, size: usize) -> Self {
        self.min_flush_size = size;
        self
    }

    /// Sets the per-item retry budget.
    #[must_use]
    pub const fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Sets the per-flush item cap.
    #[must_use]
    pub const fn max_flush_batch(mut self, size: usize) -> Self {
        self.max_flush_batch = size;
        self
    }

    /// Overwrites the tier-controlled fields with the preset for `tier`.
    pub fn apply_tier(&mut self, tier: LoadTier) {
        let (size, interval, min) = tier.preset();
        self.max_buffer_size = size;
        self.flush_interval = interval;
        self.min_flush_size = min;
    }

    /// Checks the configuration for unusable values.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidConfig`] naming the first bad field.
    pub fn validate(&self) -> CoreResult<()> {
        if self.max_buffer_size == 0 {
            return Err(CoreError::invalid_config("max_buffer_size must be positive"));
        }
        if self.flush_interval.is_zero() {
            return Err(CoreError::invalid_config("flush_interval must be positive"));
        }
        if self.min_flush_size > self.max_buffer_size {
            return Err(CoreError::invalid_config(
                "min_flush_size must not exceed max_buffer_size",
            ));
        }
        if self.max_retries == 0 {
            return Err(CoreError::invalid_config("max_retries must be positive"));
        }
        if self.max_flush_batch == 0 {
            return Err(CoreError::invalid_config("max_flush_batch must be positive"));
        }
        Ok(())
    }
}

/// Load tiers selected by [`WriteBuffer::adjust_for_load`](crate::WriteBuffer::adjust_for_load).
///
/// Higher tiers hold more items and flush more often.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LoadTier {
    /// Fewer than 100 pending requests.
    Low,
    /// Fewer than 1 000 pending requests.
    Moderate,
    /// Fewer than 10 000 pending requests.
    High,
    /// Everything above.
    Extreme,
}

impl LoadTier {
    /// Picks the tier for a pending-request count.
    pub const fn for_pending(pending: usize) -> Self {
        if pending < 100 {
            Self::Low
        } else if pending < 1_000 {
            Self::Moderate
        } else if pending < 10_000 {
            Self::High
        } else {
            Self::Extreme
        }
    }

    /// `(max_buffer_size, flush_interval, min_flush_size)` for this tier.
    pub const fn preset(self) -> (usize, Duration, usize) {
        match self {
            Self::Low => (1_000, Duration::from_millis(1_000), 100),
            Self::Moderate => (2_000, Duration::from_millis(500), 200),
            Self::High => (5_000, Duration::from_millis(250), 500),
            Self::Extreme => (10_000, Duration::from_millis(100), 1_000),
        }
    }
}

/// Configuration for the [`BackpressureController`](crate::BackpressureController).
#[derive(Debug, Clone, PartialEq)]
pub struct BackpressureConfig {
    /// Initial number of concurrent permits.
    pub max_concurrent: usize,

    /// Floor for adaptive shrinking.
    pub min_concurrent: usize,

    /// Ceiling for adaptive growth.
    pub max_concurrent_ceiling: usize,

    /// Waiters beyond this are rejected with [`CoreError::Overloaded`].
    pub max_queue_length: usize,

    /// Releases per adaptation window.
    pub adaptation_window: u32,

    /// Failure ratio above which permits shrink.
    pub shrink_threshold: f64,

    /// Failure ratio below which permits grow while requests are queued.
    pub grow_threshold: f64,
}

impl Default for BackpressureConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 100,
            min_concurrent: 1,
            max_concurrent_ceiling: 1_000,
            max_queue_length: 10_000,
            adaptation_window: 100,
            shrink_threshold: 0.10,
            grow_threshold: 0.01,
        }
    }
}

impl BackpressureConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the initial permit count.
    #[must_use]
    pub const fn max_concurrent(mut self, permits: usize) -> Self {
        self.max_concurrent = permits;
        self
    }

    /// Sets the adaptive bounds.
    #[must_use]
    pub const fn concurrency_bounds(mut self, min: usize, ceiling: usize) -> Self {
        self.min_concurrent = min;
        self.max_concurrent_ceiling = ceiling;
        self
    }

    /// Sets the queue limit.
    #[must_use]
    pub const fn max_queue_length(mut self, length: usize) -> Self {
        self.max_queue_length = length;
        self
    }

    /// Sets the adaptation window.
    #[must_use]
    pub const fn adaptation_window(mut self, releases: u32) -> Self {
        self.adaptation_window = releases;
        self
    }

    /// Checks the configuration for unusable values.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidConfig`] naming the first bad field.
    pub fn validate(&self) -> CoreResult<()> {
        if self.min_concurrent == 0 {
            return Err(CoreError::invalid_config("min_concurrent must be positive"));
        }
        if self.max_concurrent < self.min_concurrent
            || self.max_concurrent > self.max_concurrent_ceiling
        {
            return Err(CoreError::invalid_config(
                "max_concurrent must lie within [min_concurrent, max_concurrent_ceiling]",
            ));
        }
        if self.adaptation_window == 0 {
            return Err(CoreError::invalid_config("adaptation_window must be positive"));
        }
        if !(0.0..=1.0).contains(&self.shrink_threshold)
            || !(0.0..=1.0).contains(&self.grow_threshold)
        {
            return Err(CoreError::invalid_config("thresholds must be ratios in [0, 1]"));
        }
        Ok(())
    }
}

/// Configuration for [`PeriodicCleanup`](crate::PeriodicCleanup).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupConfig {
    /// Soft-deleted items older than this are purged.
    pub max_age: Duration,

    /// Items deleted per batch.
    pub batch_size: usize,

    /// Delay between scheduled passes.
    pub cleanup_interval: Duration,

    /// Whether `start` schedules passes at all.
    pub enabled: bool,

    /// Page size for the storage listing.
    pub scan_page_size: usize,

    /// Upper bound on nouns inspected in one pass.
    pub max_scan_per_pass: usize,

    /// Pause between batches.
    pub batch_delay: Duration,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            max_age: Duration::from_secs(60 * 60),
            batch_size: 100,
            cleanup_interval: Duration::from_secs(15 * 60),
            enabled: true,
            scan_page_size: 1_000,
            max_scan_per_pass: 100_000,
            batch_delay: Duration::from_millis(10),
        }
    }
}

impl CleanupConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the age threshold.
    #[must_use]
    pub const fn max_age(mut self, age: Duration) -> Self {
        self.max_age = age;
        self
    }

    /// Sets the batch size.
    #[must_use]
    pub const fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    /// Sets the interval between passes.
    #[must_use]
    pub const fn cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }

    /// Enables or disables scheduling.
    #[must_use]
    pub const fn enabled(mut self, value: bool) -> Self {
        self.enabled = value;
        self
    }

    /// Sets the listing page size.
    #[must_use]
    pub const fn scan_page_size(mut self, size: usize) -> Self {
        self.scan_page_size = size;
        self
    }

    /// Sets the per-pass scan bound.
    #[must_use]
    pub const fn max_scan_per_pass(mut self, count: usize) -> Self {
        self.max_scan_per_pass = count;
        self
    }

    /// Sets the pause between batches.
    #[must_use]
    pub const fn batch_delay(mut self, delay: Duration) -> Self {
        self.batch_delay = delay;
        self
    }

    /// Checks the configuration for unusable values.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidConfig`] naming the first bad field.
    pub fn validate(&self) -> CoreResult<()> {
        if self.batch_size == 0 {
            return Err(CoreError::invalid_config("batch_size must be positive"));
        }
        if self.scan_page_size == 0 {
            return Err(CoreError::invalid_config("scan_page_size must be positive"));
        }
        if self.max_scan_per_pass == 0 {
            return Err(CoreError::invalid_config("max_scan_per_pass must be positive"));
        }
        if self.enabled && self.cleanup_interval.is_zero() {
            return Err(CoreError::invalid_config("cleanup_interval must be positive"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_write_buffer_config_is_low_tier() {
        let config = WriteBufferConfig::default();
        assert_eq!(config.max_buffer_size, 1_000);
        assert_eq!(config.flush_interval, Duration::from_secs(1));
        assert_eq!(config.min_flush_size, 100);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.max_flush_batch, MAX_FLUSH_BATCH);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn tier_boundaries() {
        assert_eq!(LoadTier::for_pending(0), LoadTier::Low);
        assert_eq!(LoadTier::for_pending(99), LoadTier::Low);
        assert_eq!(LoadTier::for_pending(100), LoadTier::Moderate);
        assert_eq!(LoadTier::for_pending(999), LoadTier::Moderate);
        assert_eq!(LoadTier::for_pending(1_000), LoadTier::High);
        assert_eq!(LoadTier::for_pending(10_000), LoadTier::Extreme);
    }

    #[test]
    fn apply_tier_keeps_retry_settings() {
        let mut config = WriteBufferConfig::new().max_retries(7);
        config.apply_tier(LoadTier::Extreme);
        assert_eq!(config.max_buffer_size, 10_000);
        assert_eq!(config.flush_interval, Duration::from_millis(100));
        assert_eq!(config.min_flush_size, 1_000);
        assert_eq!(config.max_retries, 7);
    }

    #[test]
    fn write_buffer_validation() {
        assert!(WriteBufferConfig::new().max_buffer_size(0).validate().is_err());
        assert!(WriteBufferConfig::new()
            .max_buffer_size(10)
            .min_flush_size(20)
            .validate()
            .is_err());
        assert!(WriteBufferConfig::new().max_retries(0).validate().is_err());
    }

    #[test]
    fn backpressure_defaults() {
        let config = BackpressureConfig::default();
        assert_eq!(config.max_concurrent, 100);
        assert_eq!(config.max_queue_length, 10_000);
        assert_eq!(config.adaptation_window, 100);
        assert!(config.validate().is_ok());
        assert!(BackpressureConfig::new()
            .max_concurrent(5_000)
            .validate()
            .is_err());
    }

    #[test]
    fn cleanup_builder_pattern() {
        let config = CleanupConfig::new()
            .max_age(Duration::from_millis(1_000))
            .batch_size(10)
            .enabled(false);

        assert_eq!(config.max_age, Duration::from_secs(1));
        assert_eq!(config.batch_size, 10);
        assert!(!config.enabled);
        assert_eq!(config.cleanup_interval, Duration::from_secs(900));
        assert!(config.validate().is_ok());
        assert!(config.batch_size(0).validate().is_err());
    }
}
