//! The serializer plug-in contract: encode/decode typed values to the
//! opaque bytes the checkpoint store persists.

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SerializeError {
    #[error("failed to encode value: {0}")]
    Encode(#[from] EncodeFailure),
    #[error("failed to decode value: {0}")]
    Decode(#[from] DecodeFailure),
}

#[derive(Debug, Error)]
#[error("{0}")]
pub struct EncodeFailure(String);

#[derive(Debug, Error)]
#[error("{0}")]
pub struct DecodeFailure(String);

/// Encodes/decodes typed values for the checkpoint blob.
///
/// Must round-trip the user state and the (cursor, compensation-stack)
/// tuple; the default [`JsonSerializer`] does so via `serde_json`.
pub trait Serializer: Send + Sync {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, SerializeError>;
    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, SerializeError>;
}

/// Default `serde_json`-backed serializer.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, SerializeError> {
        serde_json::to_vec(value).map_err(|e| SerializeError::Encode(EncodeFailure(e.to_string())))
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, SerializeError> {
        serde_json::from_slice(bytes).map_err(|e| SerializeError::Decode(DecodeFailure(e.to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        a: u32,
        b: String,
    }

    #[test]
    fn json_serializer_round_trips() {
        let serializer = JsonSerializer;
        let value = Sample {
            a: 7,
            b: "hi".into(),
        };
        let bytes = serializer.encode(&value).unwrap();
        let decoded: Sample = serializer.decode(&bytes).unwrap();
        assert_eq!(value, decoded);
    }

    #[test]
    fn decode_failure_is_reported() {
        let serializer = JsonSerializer;
        let err = serializer.decode::<Sample>(b"not json").unwrap_err();
        assert!(matches!(err, SerializeError::Decode(_)));
    }
}
