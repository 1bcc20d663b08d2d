//! Property-based test generators using proptest.
//!
//! Provides strategies for JSON entity bodies and buffered write sequences.

use proptest::prelude::*;
use serde_json::{Map, Number, Value};

/// Strategy for short field names.
pub fn field_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9_]{0,11}").expect("Invalid regex")
}

/// Strategy for JSON scalars.
///
/// Floats are finite; the canonical codec rejects NaN and infinities.
pub fn json_scalar_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::from),
        any::<u64>().prop_map(Value::from),
        (-1.0e9f64..1.0e9f64)
            .prop_filter_map("finite", Number::from_f64)
            .prop_map(Value::Number),
        prop::string::string_regex("[ -~]{0,16}")
            .expect("Invalid regex")
            .prop_map(Value::String),
    ]
}

/// Strategy for arbitrary JSON values up to a small depth.
pub fn json_value_strategy() -> impl Strategy<Value = Value> {
    json_scalar_strategy().prop_recursive(3, 32, 6, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..6).prop_map(Value::Array),
            prop::collection::btree_map(field_name_strategy(), inner, 0..6)
                .prop_map(|fields| Value::Object(fields.into_iter().collect::<Map<_, _>>())),
        ]
    })
}

/// Strategy for entity bodies: always a JSON object.
pub fn entity_body_strategy() -> impl Strategy<Value = Value> {
    prop::collection::btree_map(field_name_strategy(), json_value_strategy(), 0..8)
        .prop_map(|fields| Value::Object(fields.into_iter().collect()))
}

/// Strategy for ids drawn from a small pool so sequences repeat ids.
pub fn write_id_strategy(pool: usize) -> impl Strategy<Value = String> {
    (0..pool.max(1)).prop_map(|i| format!("id-{i}"))
}

/// One buffered write.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteOp {
    /// Target id.
    pub id: String,
    /// Written value; a sequence number makes every write distinct.
    pub value: u64,
}

/// Strategy for a sequence of writes over `pool` ids.
///
/// Values are the position in the sequence, so "the last write for an id"
/// is the one with the largest value.
pub fn write_sequence_strategy(
    pool: usize,
    max_len: usize,
) -> impl Strategy<Value = Vec<WriteOp>> {
    prop::collection::vec(write_id_strategy(pool), 1..max_len.max(2)).prop_map(|ids| {
        ids.into_iter()
            .enumerate()
            .map(|(i, id)| WriteOp { id, value: i as u64 })
            .collect()
    })
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Creates a configuration for thorough tests.
    #[must_use]
    pub fn thorough() -> Self {
        Self {
            cases: 1024,
            max_shrink_iters: 10000,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}
