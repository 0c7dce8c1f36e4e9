//! Document payload codec
//!
//! The store treats payloads as opaque blobs tagged with a content type.
//! The codec is injected at store construction; [`JsonCodec`] is the
//! default. Index projections operate on the decoded
//! [`serde_json::Value`] form, so any codec must round-trip through it.

use crate::error::Result;

/// Encodes documents to the stored blob form and back.
pub trait Codec: Send + Sync {
    /// Content tag recorded alongside the payload (informational).
    fn content_type(&self) -> &'static str;

    fn encode(&self, value: &serde_json::Value) -> Result<Vec<u8>>;

    fn decode(&self, bytes: &[u8]) -> Result<serde_json::Value>;
}

/// Plain JSON codec.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn content_type(&self) -> &'static str {
        "application/json"
    }

    fn encode(&self, value: &serde_json::Value) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    fn decode(&self, bytes: &[u8]) -> Result<serde_json::Value> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_codec_round_trips() {
        let codec = JsonCodec;
        let value = serde_json::json!({"id": 1, "name": "a", "tags": ["x", "y"]});
        let bytes = codec.encode(&value).unwrap();
        assert_eq!(codec.decode(&bytes).unwrap(), value);
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(JsonCodec.decode(b"not json").is_err());
    }
}
