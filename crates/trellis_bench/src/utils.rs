//! Benchmark utilities.

use async_trait::async_trait;
use rand::Rng;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use trellis_core::{BulkWriter, CoreResult};

/// Generate a random entity body with `fields` top-level fields.
pub fn random_body(fields: usize) -> Value {
    let mut rng = rand::thread_rng();
    let map: Map<String, Value> = (0..fields)
        .map(|i| {
            let value = match i % 4 {
                0 => json!(rng.gen::<u32>()),
                1 => json!(format!("text-{}", rng.gen::<u16>())),
                2 => json!({ "nested": rng.gen::<bool>(), "score": rng.gen::<f32>() }),
                _ => json!([rng.gen::<u8>(), rng.gen::<u8>(), rng.gen::<u8>()]),
            };
            (format!("field_{i}"), value)
        })
        .collect();
    Value::Object(map)
}

/// Generate ids drawn from a pool of `distinct` values.
pub fn generate_ids(count: usize, distinct: usize) -> Vec<String> {
    let mut rng = rand::thread_rng();
    (0..count)
        .map(|_| format!("id-{}", rng.gen_range(0..distinct.max(1))))
        .collect()
}

/// Bulk writer that accepts every batch and discards it.
#[derive(Debug, Default)]
pub struct NullWriter;

#[async_trait]
impl<T> BulkWriter<T> for NullWriter
where
    T: Send + Sync + 'static,
{
    async fn write_batch(&self, items: HashMap<String, T>) -> CoreResult<()> {
        drop(items);
        Ok(())
    }
}
