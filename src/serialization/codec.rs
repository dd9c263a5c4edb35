//! Value codecs used by the cache engine.

use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Strategy for turning cached values into bytes and back.
///
/// The engine is generic over its codec so the storage format is chosen once
/// at the composition root rather than per call.
pub trait CacheCodec: Send + Sync + Clone + 'static {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Encode a value.
    ///
    /// # Errors
    /// Returns `Error::SerializationError` if the value cannot be encoded.
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>>;

    /// Decode a value.
    ///
    /// # Errors
    /// Returns `Error::DeserializationError` on malformed input.
    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T>;
}

/// Compact binary codec (default).
#[derive(Clone, Copy, Debug, Default)]
pub struct PostcardCodec;

impl CacheCodec for PostcardCodec {
    fn name(&self) -> &'static str {
        "postcard"
    }

    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>> {
        postcard::to_allocvec(value).map_err(|e| Error::SerializationError(e.to_string()))
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        postcard::from_bytes(bytes).map_err(|e| Error::DeserializationError(e.to_string()))
    }
}

/// JSON codec, for payloads other services read directly from the store.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonCodec;

impl CacheCodec for JsonCodec {
    fn name(&self) -> &'static str {
        "json"
    }

    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>> {
        serde_json::to_vec(value).map_err(|e| Error::SerializationError(e.to_string()))
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        serde_json::from_slice(bytes).map_err(|e| Error::DeserializationError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct Lead {
        name: String,
        score: u32,
    }

    #[test]
    fn test_json_codec_is_readable() {
        let bytes = JsonCodec
            .encode(&Lead {
                name: "Dana".to_string(),
                score: 7,
            })
            .unwrap();
        assert_eq!(
            std::str::from_utf8(&bytes).unwrap(),
            r#"{"name":"Dana","score":7}"#
        );
    }

    #[test]
    fn test_decode_wrong_shape_fails() {
        let bytes = JsonCodec.encode(&"just a string").unwrap();
        let result: Result<Lead> = JsonCodec.decode(&bytes);
        assert!(matches!(result, Err(Error::DeserializationError(_))));
    }

    #[test]
    fn test_postcard_smaller_than_json() {
        let lead = Lead {
            name: "Dana".to_string(),
            score: 7,
        };
        let postcard = PostcardCodec.encode(&lead).unwrap();
        let json = JsonCodec.encode(&lead).unwrap();
        assert!(postcard.len() < json.len());
        assert_eq!(PostcardCodec.decode::<Lead>(&postcard).unwrap(), lead);
    }
}
