//! # Trellis Codec
//!
//! Canonical encoding of JSON entity bodies for Trellis.
//!
//! Versioning decides whether a body changed by comparing content hashes,
//! so the byte form of a body must not depend on how it was built. This
//! crate provides that form:
//! - Equal JSON values produce identical bytes
//! - Object key insertion order is irrelevant
//! - The SHA-256 of the bytes is a stable [`ContentHash`]
//!
//! ## Canonical Rules
//!
//! - Object keys sorted by encoded form (length-first, then bytewise)
//! - Integers use shortest encoding
//! - Non-integral numbers are 64-bit floats; NaN and infinities are rejected
//! - Strings must be UTF-8
//! - No indefinite-length items, byte strings or tags
//!
//! Persisted bookkeeping records (blob envelopes, index entries) go through
//! [`encode_record`] / [`decode_record`] instead, which are plain ciborium.
//!
//! ## Usage
//!
//! ```
//! use serde_json::json;
//! use trellis_codec::{content_hash, from_canonical_bytes, to_canonical_bytes};
//!
//! let body = json!({"name": "alice", "age": 31});
//! let bytes = to_canonical_bytes(&body).unwrap();
//! assert_eq!(from_canonical_bytes(&bytes).unwrap(), body);
//!
//! let reordered = json!({"age": 31, "name": "alice"});
//! assert_eq!(content_hash(&body).unwrap(), content_hash(&reordered).unwrap());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod decoder;
mod encoder;
mod error;
mod hash;
mod record;

pub use decoder::{from_canonical_bytes, CanonicalDecoder};
pub use encoder::{to_canonical_bytes, CanonicalEncoder};
pub use error::{CodecError, CodecResult};
pub use hash::{content_hash, ContentHash};
pub use record::{decode_record, encode_record};

/// Canonical ordering of encoded object keys: length first, then bytewise.
pub(crate) fn compare_canonical_keys(a: &[u8], b: &[u8]) -> std::cmp::Ordering {
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::Value;

    fn arb_json() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(Value::from),
            (-1.0e9f64..1.0e9).prop_map(Value::from),
            "[a-z]{0,8}".prop_map(Value::String),
        ];
        leaf.prop_recursive(3, 32, 6, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..6).prop_map(Value::Array),
                prop::collection::btree_map("[a-z_]{1,6}", inner, 0..6)
                    .prop_map(|m| Value::Object(m.into_iter().collect())),
            ]
        })
    }

    proptest! {
        #[test]
        fn decode_inverts_encode(value in arb_json()) {
            let bytes = to_canonical_bytes(&value).unwrap();
            prop_assert_eq!(from_canonical_bytes(&bytes).unwrap(), value);
        }

        #[test]
        fn encoding_is_deterministic(value in arb_json()) {
            let reparsed: Value = serde_json::from_str(&value.to_string()).unwrap();
            prop_assert_eq!(
                to_canonical_bytes(&value).unwrap(),
                to_canonical_bytes(&reparsed).unwrap()
            );
        }
    }

    #[test]
    fn key_ordering_is_length_first() {
        use std::cmp::Ordering;
        assert_eq!(compare_canonical_keys(b"\x61z", b"\x62aa"), Ordering::Less);
        assert_eq!(compare_canonical_keys(b"\x61a", b"\x61b"), Ordering::Less);
        assert_eq!(compare_canonical_keys(b"\x61a", b"\x61a"), Ordering::Equal);
    }
}
