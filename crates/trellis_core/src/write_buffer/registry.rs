//! Per-category buffer registry.

use super::{BulkWriter, FlushResult, WriteBuffer};
use crate::backpressure::BackpressureController;
use crate::clock::Clock;
use crate::config::{LoadTier, WriteBufferConfig};
use crate::error::CoreResult;
use crate::stats::WriteBufferStatsSnapshot;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::info;

/// Owns one [`WriteBuffer`] per category.
///
/// Every buffer shares the registry's backpressure controller and clock and
/// starts from the registry's default configuration.
pub struct WriteBufferRegistry<T> {
    backpressure: Arc<BackpressureController>,
    clock: Arc<dyn Clock>,
    default_config: WriteBufferConfig,
    buffers: RwLock<HashMap<String, WriteBuffer<T>>>,
}

impl<T> WriteBufferRegistry<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Creates an empty registry.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidConfig`](crate::CoreError::InvalidConfig)
    /// if `default_config` is unusable.
    pub fn new(
        backpressure: Arc<BackpressureController>,
        clock: Arc<dyn Clock>,
        default_config: WriteBufferConfig,
    ) -> CoreResult<Self> {
        default_config.validate()?;
        Ok(Self {
            backpressure,
            clock,
            default_config,
            buffers: RwLock::new(HashMap::new()),
        })
    }

    /// Returns the buffer for `category`, creating and starting it with
    /// `writer` if it does not exist yet.
    ///
    /// `writer` is ignored when the buffer already exists. Must be called
    /// from within a tokio runtime.
    pub fn get_or_create(&self, category: &str, writer: Arc<dyn BulkWriter<T>>) -> WriteBuffer<T> {
        if let Some(buffer) = self.buffers.read().get(category) {
            return buffer.clone();
        }

        let mut buffers = self.buffers.write();
        if let Some(buffer) = buffers.get(category) {
            return buffer.clone();
        }
        let buffer = WriteBuffer::from_validated(
            category.to_string(),
            writer,
            Arc::clone(&self.backpressure),
            Arc::clone(&self.clock),
            self.default_config.clone(),
        );
        buffer.start();
        buffers.insert(category.to_string(), buffer.clone());
        buffer
    }

    /// Returns the buffer for `category`, if any.
    pub fn get(&self, category: &str) -> Option<WriteBuffer<T>> {
        self.buffers.read().get(category).cloned()
    }

    /// Registered categories, sorted.
    pub fn categories(&self) -> Vec<String> {
        let mut categories: Vec<String> = self.buffers.read().keys().cloned().collect();
        categories.sort();
        categories
    }

    /// Drains every buffer.
    pub async fn flush_all(&self) -> BTreeMap<String, FlushResult> {
        let mut results = BTreeMap::new();
        for (category, buffer) in self.snapshot() {
            results.insert(category, buffer.force_flush().await);
        }
        results
    }

    /// Applies the tier for `pending` to every buffer.
    pub fn adjust_all_for_load(&self, pending: usize) -> LoadTier {
        let tier = LoadTier::for_pending(pending);
        for (_, buffer) in self.snapshot() {
            buffer.adjust_for_load(pending);
        }
        tier
    }

    /// Stops every trigger loop and drains every buffer.
    pub async fn stop_all(&self) -> BTreeMap<String, FlushResult> {
        let buffers = self.snapshot();
        info!(buffers = buffers.len(), "stopping all write buffers");
        let mut results = BTreeMap::new();
        for (category, buffer) in buffers {
            results.insert(category, buffer.shutdown().await);
        }
        results
    }

    /// Per-category statistics.
    pub fn stats(&self) -> BTreeMap<String, WriteBufferStatsSnapshot> {
        self.snapshot()
            .into_iter()
            .map(|(category, buffer)| {
                let stats = buffer.get_stats();
                (category, stats)
            })
            .collect()
    }

    /// Number of registered buffers.
    pub fn len(&self) -> usize {
        self.buffers.read().len()
    }

    /// Returns true if no buffer is registered.
    pub fn is_empty(&self) -> bool {
        self.buffers.read().is_empty()
    }

    fn snapshot(&self) -> Vec<(String, WriteBuffer<T>)> {
        let mut buffers: Vec<(String, WriteBuffer<T>)> = self
            .buffers
            .read()
            .iter()
            .map(|(category, buffer)| (category.clone(), buffer.clone()))
            .collect();
        buffers.sort_by(|a, b| a.0.cmp(&b.0));
        buffers
    }
}

impl<T> std::fmt::Debug for WriteBufferRegistry<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteBufferRegistry")
            .field("buffers", &self.buffers.read().len())
            .field("default_config", &self.default_config)
            .finish()
    }
}
