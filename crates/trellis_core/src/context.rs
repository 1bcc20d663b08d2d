//! Shared wiring for core components.

use crate::backpressure::BackpressureController;
use crate::cleanup::PeriodicCleanup;
use crate::clock::{Clock, SystemClock};
use crate::config::{BackpressureConfig, CleanupConfig, WriteBufferConfig};
use crate::error::CoreResult;
use crate::write_buffer::WriteBufferRegistry;
use std::sync::Arc;
use trellis_storage::{IndexRemover, NounStore, VectorRemover};

/// Process-wide collaborators shared by buffers and cleanup.
///
/// Holds the single [`BackpressureController`] and the [`Clock`]; every
/// registry and cleanup service built from the same context shares them.
#[derive(Debug, Clone)]
pub struct CoreContext {
    backpressure: Arc<BackpressureController>,
    clock: Arc<dyn Clock>,
}

impl CoreContext {
    /// Creates a context on the system clock.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidConfig`](crate::CoreError::InvalidConfig)
    /// if `config` is unusable.
    pub fn new(config: BackpressureConfig) -> CoreResult<Self> {
        Ok(Self {
            backpressure: Arc::new(BackpressureController::new(config)?),
            clock: Arc::new(SystemClock),
        })
    }

    /// Replaces the clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// The shared backpressure controller.
    pub fn backpressure(&self) -> &Arc<BackpressureController> {
        &self.backpressure
    }

    /// The shared clock.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Creates a buffer registry sharing this context.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidConfig`](crate::CoreError::InvalidConfig)
    /// if `default_config` is unusable.
    pub fn write_buffers<T>(&self, default_config: WriteBufferConfig) -> CoreResult<WriteBufferRegistry<T>>
    where
        T: Clone + Send + Sync + 'static,
    {
        WriteBufferRegistry::new(
            Arc::clone(&self.backpressure),
            Arc::clone(&self.clock),
            default_config,
        )
    }

    /// Creates a cleanup service on this context's clock, admitting its
    /// batches through the shared controller.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidConfig`](crate::CoreError::InvalidConfig)
    /// if `config` is unusable.
    pub fn cleanup(
        &self,
        storage: Arc<dyn NounStore>,
        vectors: Arc<dyn VectorRemover>,
        metadata: Arc<dyn IndexRemover>,
        config: CleanupConfig,
    ) -> CoreResult<PeriodicCleanup> {
        PeriodicCleanup::new(
            storage,
            vectors,
            metadata,
            Arc::clone(&self.backpressure),
            Arc::clone(&self.clock),
            config,
        )
    }
}

impl Default for CoreContext {
    fn default() -> Self {
        Self {
            backpressure: Arc::new(BackpressureController::default()),
            clock: Arc::new(SystemClock),
        }
    }
}
