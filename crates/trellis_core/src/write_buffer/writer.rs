//! Bulk write seam.

use crate::error::CoreResult;
use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;

/// Destination of flushed batches.
///
/// A batch maps item id to its latest value. An `Err` fails the whole batch;
/// every item in it is retried or dropped by the buffer.
#[async_trait]
pub trait BulkWriter<T>: Send + Sync {
    /// Writes one batch.
    async fn write_batch(&self, items: HashMap<String, T>) -> CoreResult<()>;
}

/// Adapts an async closure into a [`BulkWriter`].
///
/// ```
/// use std::collections::HashMap;
/// use trellis_core::{BulkWriter, CoreResult, FnWriter};
///
/// let writer = FnWriter::new(|items: HashMap<String, u32>| async move {
///     assert!(!items.is_empty());
///     CoreResult::Ok(())
/// });
/// # let _ = &writer as &dyn BulkWriter<u32>;
/// ```
pub struct FnWriter<F> {
    func: F,
}

impl<F> FnWriter<F> {
    /// Wraps `func`.
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

#[async_trait]
impl<T, F, Fut> BulkWriter<T> for FnWriter<F>
where
    T: Send + 'static,
    F: Fn(HashMap<String, T>) -> Fut + Send + Sync,
    Fut: Future<Output = CoreResult<()>> + Send + 'static,
{
    async fn write_batch(&self, items: HashMap<String, T>) -> CoreResult<()> {
        (self.func)(items).await
    }
}

impl<F> std::fmt::Debug for FnWriter<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnWriter").finish_non_exhaustive()
    }
}
