//! Span payload encoding for model rows.
//!
//! JSON payloads always begin with `{`. Binary payloads begin with
//! [`BINARY_MARKER`] followed by the bincode form of the span, so a reader
//! can tell the two apart from the first byte alone, regardless of the
//! encoding the writer was configured with.

use crate::core::{Result, Span, TraceStoreError};
use serde::{Deserialize, Serialize};

/// Leading byte of a binary payload.
pub const BINARY_MARKER: u8 = 0x01;

/// Payload encoding used when writing model rows
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    #[default]
    Json,
    Binary,
}

/// Serializes a span with the given encoding.
pub fn encode_span(span: &Span, encoding: Encoding) -> Result<Vec<u8>> {
    match encoding {
        Encoding::Json => Ok(serde_json::to_vec(span)?),
        Encoding::Binary => {
            let mut payload = Vec::with_capacity(256);
            payload.push(BINARY_MARKER);
            bincode::serialize_into(&mut payload, span)?;
            Ok(payload)
        }
    }
}

/// Deserializes a payload, detecting its encoding from the first byte.
pub fn decode_span(payload: &[u8]) -> Result<Span> {
    match payload.first() {
        Some(b'{') => Ok(serde_json::from_slice(payload)?),
        Some(&BINARY_MARKER) => Ok(bincode::deserialize(&payload[1..])?),
        Some(other) => Err(TraceStoreError::serialization(format!(
            "unrecognized payload marker 0x{other:02x}"
        ))),
        None => Err(TraceStoreError::serialization("empty span payload")),
    }
}
