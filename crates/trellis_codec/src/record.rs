//! CBOR envelopes for persisted records.
//!
//! Records are plain serde structs written with ciborium. Unlike entity
//! bodies they are never hashed, so field order only has to round-trip.

use crate::error::{CodecError, CodecResult};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Serializes a record to CBOR.
///
/// # Errors
///
/// Returns [`CodecError::Record`] if serialization fails.
pub fn encode_record<T: Serialize>(record: &T) -> CodecResult<Vec<u8>> {
    let mut out = Vec::new();
    ciborium::ser::into_writer(record, &mut out).map_err(|e| CodecError::Record {
        operation: "encode",
        message: e.to_string(),
    })?;
    Ok(out)
}

/// Deserializes a record from CBOR.
///
/// # Errors
///
/// Returns [`CodecError::Record`] if the bytes do not describe a `T`.
pub fn decode_record<T: DeserializeOwned>(bytes: &[u8]) -> CodecResult<T> {
    ciborium::de::from_reader(bytes).map_err(|e| CodecError::Record {
        operation: "decode",
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        name: String,
        count: u32,
        tag: Option<String>,
    }

    #[test]
    fn record_round_trip() {
        let sample = Sample {
            name: "v1".into(),
            count: 3,
            tag: None,
        };
        let bytes = encode_record(&sample).unwrap();
        let back: Sample = decode_record(&bytes).unwrap();
        assert_eq!(back, sample);
    }

    #[test]
    fn decode_garbage_fails() {
        let result: CodecResult<Sample> = decode_record(&[0xff, 0x00]);
        assert!(matches!(
            result,
            Err(CodecError::Record {
                operation: "decode",
                ..
            })
        ));
    }
}
