//! Canonical encoder for JSON entity bodies.

use crate::error::{CodecError, CodecResult};
use serde_json::{Map, Number, Value};

/// Encode a JSON value to canonical CBOR bytes.
///
/// The output is deterministic: two bodies that are equal as JSON values
/// always produce identical bytes, whatever order their object keys were
/// inserted in. Rules (RFC 8949 §4.2.1 plus a float rule):
/// - Object keys are sorted by their encoded form (length-first, then bytewise)
/// - Integers use the shortest possible encoding
/// - Non-integral numbers are always encoded as 64-bit floats
/// - No indefinite-length encoding
///
/// # Errors
///
/// Returns an error if a number cannot be represented.
pub fn to_canonical_bytes(value: &Value) -> CodecResult<Vec<u8>> {
    let mut encoder = CanonicalEncoder::new();
    encoder.encode(value)?;
    Ok(encoder.into_bytes())
}

/// A canonical encoder producing hash-stable bytes.
pub struct CanonicalEncoder {
    buffer: Vec<u8>,
}

impl CanonicalEncoder {
    /// Create a new encoder.
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Create a new encoder with the specified capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
        }
    }

    /// Encode a value.
    pub fn encode(&mut self, value: &Value) -> CodecResult<()> {
        match value {
            Value::Null => {
                // CBOR null is simple value 22 (0xf6)
                self.buffer.push(0xf6);
                Ok(())
            }
            Value::Bool(b) => {
                self.buffer.push(if *b { 0xf5 } else { 0xf4 });
                Ok(())
            }
            Value::Number(n) => self.encode_number(n),
            Value::String(s) => {
                self.encode_text(s);
                Ok(())
            }
            Value::Array(items) => self.encode_array(items),
            Value::Object(map) => self.encode_object(map),
        }
    }

    /// Consume this encoder and return the encoded bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    /// Get a reference to the encoded bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    #[allow(clippy::cast_sign_loss)]
    fn encode_number(&mut self, n: &Number) -> CodecResult<()> {
        if let Some(u) = n.as_u64() {
            self.encode_unsigned(0, u);
        } else if let Some(i) = n.as_i64() {
            // as_u64 failed, so i is negative; CBOR encodes -(i+1)
            let abs_minus_one = (-(i + 1)) as u64;
            self.encode_unsigned(1, abs_minus_one);
        } else {
            let f = n
                .as_f64()
                .ok_or_else(|| CodecError::encoding_failed(format!("unrepresentable number {n}")))?;
            if !f.is_finite() {
                return Err(CodecError::NonFiniteFloat);
            }
            self.buffer.push(0xfb);
            self.buffer.extend_from_slice(&f.to_bits().to_be_bytes());
        }
        Ok(())
    }

    #[allow(clippy::cast_possible_truncation)]
    fn encode_unsigned(&mut self, major_type: u8, value: u64) {
        let mt = major_type << 5;

        if value < 24 {
            self.buffer.push(mt | (value as u8));
        } else if u8::try_from(value).is_ok() {
            self.buffer.push(mt | 24);
            self.buffer.push(value as u8);
        } else if u16::try_from(value).is_ok() {
            self.buffer.push(mt | 25);
            self.buffer.extend_from_slice(&(value as u16).to_be_bytes());
        } else if u32::try_from(value).is_ok() {
            self.buffer.push(mt | 26);
            self.buffer.extend_from_slice(&(value as u32).to_be_bytes());
        } else {
            self.buffer.push(mt | 27);
            self.buffer.extend_from_slice(&value.to_be_bytes());
        }
    }

    fn encode_text(&mut self, text: &str) {
        self.encode_unsigned(3, text.len() as u64);
        self.buffer.extend_from_slice(text.as_bytes());
    }

    fn encode_array(&mut self, items: &[Value]) -> CodecResult<()> {
        self.encode_unsigned(4, items.len() as u64);
        for item in items {
            self.encode(item)?;
        }
        Ok(())
    }

    fn encode_object(&mut self, map: &Map<String, Value>) -> CodecResult<()> {
        let mut encoded: Vec<(Vec<u8>, &Value)> = Vec::with_capacity(map.len());
        for (key, value) in map {
            let mut key_encoder = CanonicalEncoder::with_capacity(key.len() + 9);
            key_encoder.encode_text(key);
            encoded.push((key_encoder.into_bytes(), value));
        }

        encoded.sort_by(|a, b| crate::compare_canonical_keys(&a.0, &b.0));

        self.encode_unsigned(5, map.len() as u64);
        for (encoded_key, value) in encoded {
            self.buffer.extend_from_slice(&encoded_key);
            self.encode(value)?;
        }
        Ok(())
    }
}

impl Default for CanonicalEncoder {
    fn default() -> Self {
        Self::new()
    }
}
