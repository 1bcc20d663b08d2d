//! Stress runs for the write path.
//!
//! These drive many concurrent writers through one buffer and report what
//! reached the bulk writer.

use crate::fixtures::FlakyWriter;
use std::sync::Arc;
use std::time::{Duration, Instant};
use trellis_core::{
    BackpressureController, CoreError, CoreResult, SystemClock, WriteBuffer, WriteBufferConfig,
};

/// Result of a stress test run.
#[derive(Debug, Clone)]
pub struct StressTestResult {
    /// Total `add` calls.
    pub total_ops: usize,
    /// Distinct ids whose final value reached the writer.
    pub delivered_ids: usize,
    /// Items dropped after exhausting their retries.
    pub failed_ops: usize,
    /// Total duration.
    pub duration: Duration,
    /// Operations per second.
    pub ops_per_second: f64,
}

impl StressTestResult {
    /// Creates a new result.
    pub fn new(total: usize, delivered: usize, failed: usize, duration: Duration) -> Self {
        let ops_per_second = if duration.as_secs_f64() > 0.0 {
            total as f64 / duration.as_secs_f64()
        } else {
            0.0
        };

        Self {
            total_ops: total,
            delivered_ids: delivered,
            failed_ops: failed,
            duration,
            ops_per_second,
        }
    }

    /// Prints a summary of the test.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {} ===", name);
        println!("Total operations: {}", self.total_ops);
        println!("Delivered ids: {}", self.delivered_ids);
        println!("Failed: {}", self.failed_ops);
        println!("Duration: {:?}", self.duration);
        println!("Throughput: {:.2} ops/sec", self.ops_per_second);
    }
}

/// Configuration for stress tests.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Number of `add` calls per task.
    pub operations: usize,
    /// Number of concurrent tasks.
    pub tasks: usize,
    /// Number of distinct ids.
    pub id_count: usize,
    /// Buffer configuration.
    pub buffer: WriteBufferConfig,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            operations: 1_000,
            tasks: 4,
            id_count: 200,
            buffer: WriteBufferConfig::new().max_buffer_size(64).min_flush_size(1),
        }
    }
}

/// Runs concurrent adds through one buffer, then drains it.
///
/// Each task writes `(task, op)` pairs; the writer keeps the last value per
/// id. Must be called from within a tokio runtime.
///
/// # Errors
///
/// Returns an error if `config.buffer` is invalid or a task panics.
pub async fn stress_concurrent_adds(
    writer: Arc<FlakyWriter<(usize, usize)>>,
    config: &StressConfig,
) -> CoreResult<StressTestResult> {
    let buffer = WriteBuffer::new(
        "stress",
        writer.clone(),
        Arc::new(BackpressureController::default()),
        Arc::new(SystemClock),
        config.buffer.clone(),
    )?;

    let start = Instant::now();
    let handles: Vec<_> = (0..config.tasks)
        .map(|task| {
            let buffer = buffer.clone();
            let operations = config.operations;
            let id_count = config.id_count.max(1);
            tokio::spawn(async move {
                for op in 0..operations {
                    let id = format!("id-{}", (task * operations + op) % id_count);
                    buffer.add(id, (task, op)).await;
                }
            })
        })
        .collect();

    for handle in handles {
        if let Err(e) = handle.await {
            return Err(CoreError::write_failed(format!("stress task failed: {e}")));
        }
    }
    buffer.shutdown().await;

    let stats = buffer.get_stats();
    Ok(StressTestResult::new(
        config.tasks * config.operations,
        writer.written().len(),
        stats.failed_writes as usize,
        start.elapsed(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_adds_deliver_every_id() {
        let writer = Arc::new(FlakyWriter::new());
        let config = StressConfig {
            operations: 500,
            tasks: 4,
            id_count: 100,
            ..Default::default()
        };

        let result = stress_concurrent_adds(Arc::clone(&writer), &config).await.unwrap();
        assert_eq!(result.total_ops, 2_000);
        assert_eq!(result.delivered_ids, 100);
        assert_eq!(result.failed_ops, 0);
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let writer = Arc::new(FlakyWriter::new());
        writer.fail_next(2);
        let config = StressConfig {
            operations: 100,
            tasks: 2,
            id_count: 50,
            buffer: WriteBufferConfig::new()
                .max_buffer_size(16)
                .min_flush_size(1)
                .max_retries(5),
        };

        let result = stress_concurrent_adds(Arc::clone(&writer), &config).await.unwrap();
        assert_eq!(result.delivered_ids, 50);
        assert_eq!(result.failed_ops, 0);
        assert!(writer.attempts() > writer.batches().len());
    }
}
