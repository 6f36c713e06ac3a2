//! Value encoding for the backing store
//!
//! L2 holds opaque bytes. Values are written in one of three encodings and
//! read back through a fixed probe order:
//!
//! 1. **Structured**: the payload parses as JSON
//! 2. **Binary**: the payload starts with [`BINARY_MAGIC`] followed by a
//!    big-endian `u32` length and exactly that many bytes
//! 3. **Raw**: anything else (UTF-8 becomes text, otherwise bytes)
//!
//! Text that would be misread by an earlier probe (valid JSON, or starting with
//! the binary magic) is written as a JSON string, so it comes back as
//! `CacheValue::Json(Value::String(..))`.

use crate::error::{CacheError, CacheResult};
use serde::de::{DeserializeOwned, IgnoredAny};
use serde::Serialize;
use serde_json::Value;

/// Prefix marking a binary envelope
pub const BINARY_MAGIC: &[u8; 4] = b"TCB1";
const HEADER_LEN: usize = BINARY_MAGIC.len() + 4;

/// A cached value as seen by callers
#[derive(Debug, Clone, PartialEq)]
pub enum CacheValue {
    Json(Value),
    Bytes(Vec<u8>),
    Text(String),
}

impl CacheValue {
    /// Serialize any `Serialize` type into a JSON cache value
    pub fn from_serializable<T: Serialize>(key: &str, value: &T) -> CacheResult<Self> {
        serde_json::to_value(value)
            .map(CacheValue::Json)
            .map_err(|e| CacheError::serialization(key, e))
    }

    /// Deserialize the value into `T`
    pub fn to_typed<T: DeserializeOwned>(&self, key: &str) -> CacheResult<T> {
        let result = match self {
            CacheValue::Json(value) => T::deserialize(value),
            CacheValue::Text(text) => serde_json::from_str(text),
            CacheValue::Bytes(bytes) => serde_json::from_slice(bytes),
        };
        result.map_err(|e| CacheError::serialization(key, e))
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            CacheValue::Json(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            CacheValue::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// Text content, including text that round-tripped as a JSON string
    pub fn as_text(&self) -> Option<&str> {
        match self {
            CacheValue::Text(text) | CacheValue::Json(Value::String(text)) => Some(text),
            _ => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            CacheValue::Json(_) => "json",
            CacheValue::Bytes(_) => "bytes",
            CacheValue::Text(_) => "text",
        }
    }
}

impl From<Value> for CacheValue {
    fn from(value: Value) -> Self {
        CacheValue::Json(value)
    }
}

impl From<Vec<u8>> for CacheValue {
    fn from(value: Vec<u8>) -> Self {
        CacheValue::Bytes(value)
    }
}

impl From<String> for CacheValue {
    fn from(value: String) -> Self {
        CacheValue::Text(value)
    }
}

impl From<&str> for CacheValue {
    fn from(value: &str) -> Self {
        CacheValue::Text(value.to_string())
    }
}

/// Wire form of a value, tagged with how it was (or will be) decoded
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodedValue {
    Structured(Vec<u8>),
    Binary(Vec<u8>),
    Raw(Vec<u8>),
}

impl EncodedValue {
    /// Classify payload bytes using the probe order
    pub fn probe(bytes: Vec<u8>) -> Self {
        if serde_json::from_slice::<IgnoredAny>(&bytes).is_ok() {
            EncodedValue::Structured(bytes)
        } else if bytes.starts_with(BINARY_MAGIC) {
            EncodedValue::Binary(bytes)
        } else {
            EncodedValue::Raw(bytes)
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            EncodedValue::Structured(b) | EncodedValue::Binary(b) | EncodedValue::Raw(b) => b,
        }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            EncodedValue::Structured(b) | EncodedValue::Binary(b) | EncodedValue::Raw(b) => b,
        }
    }

    /// Decode into a caller-facing value
    pub fn decode(self, key: &str) -> CacheResult<CacheValue> {
        match self {
            EncodedValue::Structured(bytes) => serde_json::from_slice(&bytes)
                .map(CacheValue::Json)
                .map_err(|e| CacheError::serialization(key, e)),
            EncodedValue::Binary(bytes) => unwrap_envelope(key, &bytes).map(CacheValue::Bytes),
            EncodedValue::Raw(bytes) => Ok(match String::from_utf8(bytes) {
                Ok(text) => CacheValue::Text(text),
                Err(e) => CacheValue::Bytes(e.into_bytes()),
            }),
        }
    }
}

/// Encode a value for the backing store
pub fn encode(key: &str, value: &CacheValue) -> CacheResult<EncodedValue> {
    match value {
        CacheValue::Json(json) => serde_json::to_vec(json)
            .map(EncodedValue::Structured)
            .map_err(|e| CacheError::serialization(key, e)),
        CacheValue::Bytes(bytes) => wrap_envelope(key, bytes).map(EncodedValue::Binary),
        CacheValue::Text(text) => {
            let raw = text.as_bytes();
            if matches!(EncodedValue::probe(raw.to_vec()), EncodedValue::Raw(_)) {
                Ok(EncodedValue::Raw(raw.to_vec()))
            } else {
                serde_json::to_vec(text)
                    .map(EncodedValue::Structured)
                    .map_err(|e| CacheError::serialization(key, e))
            }
        }
    }
}

/// Probe and decode payload bytes read from the backing store
pub fn decode(key: &str, bytes: Vec<u8>) -> CacheResult<CacheValue> {
    EncodedValue::probe(bytes).decode(key)
}

fn wrap_envelope(key: &str, payload: &[u8]) -> CacheResult<Vec<u8>> {
    let len = u32::try_from(payload.len())
        .map_err(|_| CacheError::serialization(key, "binary payload exceeds 4 GiB"))?;

    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    out.extend_from_slice(BINARY_MAGIC);
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(payload);
    Ok(out)
}

fn unwrap_envelope(key: &str, bytes: &[u8]) -> CacheResult<Vec<u8>> {
    if bytes.len() < HEADER_LEN {
        return Err(CacheError::serialization(key, "truncated binary envelope header"));
    }

    let mut len_bytes = [0u8; 4];
    len_bytes.copy_from_slice(&bytes[BINARY_MAGIC.len()..HEADER_LEN]);
    let declared = u32::from_be_bytes(len_bytes) as usize;
    let payload = &bytes[HEADER_LEN..];

    if payload.len() != declared {
        return Err(CacheError::serialization(
            key,
            format!(
                "binary envelope declares {declared} bytes but carries {}",
                payload.len()
            ),
        ));
    }
    Ok(payload.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_round_trip() {
        let value = CacheValue::Json(json!({"price": 150.25}));
        let encoded = encode("AAPL", &value).unwrap();
        assert!(matches!(encoded, EncodedValue::Structured(_)));
        assert_eq!(decode("AAPL", encoded.into_bytes()).unwrap(), value);
    }

    #[test]
    fn test_binary_envelope_round_trip() {
        let value = CacheValue::Bytes(vec![0xff, 0x00, 0x7b, 0x22]);
        let encoded = encode("blob", &value).unwrap();
        assert!(encoded.as_bytes().starts_with(BINARY_MAGIC));
        assert_eq!(decode("blob", encoded.into_bytes()).unwrap(), value);
    }

    #[test]
    fn test_plain_text_stays_raw() {
        let value = CacheValue::Text("hello world".to_string());
        let encoded = encode("greeting", &value).unwrap();
        assert_eq!(encoded, EncodedValue::Raw(b"hello world".to_vec()));
        assert_eq!(decode("greeting", encoded.into_bytes()).unwrap(), value);
    }

    #[test]
    fn test_json_looking_text_is_quoted() {
        let encoded = encode("n", &CacheValue::Text("42".to_string())).unwrap();
        assert_eq!(encoded.as_bytes(), b"\"42\"");
        assert_eq!(
            decode("n", encoded.into_bytes()).unwrap(),
            CacheValue::Json(json!("42"))
        );
    }

    #[test]
    fn test_foreign_payloads_follow_probe_order() {
        assert_eq!(
            decode("k", b"{\"a\":1}".to_vec()).unwrap(),
            CacheValue::Json(json!({"a": 1}))
        );
        assert_eq!(
            decode("k", vec![0xc3, 0x28]).unwrap(),
            CacheValue::Bytes(vec![0xc3, 0x28])
        );
        assert_eq!(
            decode("k", b"plain".to_vec()).unwrap(),
            CacheValue::Text("plain".to_string())
        );
    }

    #[test]
    fn test_corrupt_envelope_is_serialization_error() {
        let mut bytes = BINARY_MAGIC.to_vec();
        bytes.extend_from_slice(&10u32.to_be_bytes());
        bytes.extend_from_slice(b"short");

        let err = decode("broken", bytes).unwrap_err();
        assert!(matches!(err, CacheError::SerializationError { .. }));
        assert!(!err.counts_against_breaker());
    }

    #[test]
    fn test_typed_helpers() {
        #[derive(serde::Serialize, serde::Deserialize, PartialEq, Debug)]
        struct Quote {
            symbol: String,
            price: f64,
        }

        let quote = Quote {
            symbol: "MSFT".to_string(),
            price: 410.5,
        };
        let value = CacheValue::from_serializable("MSFT", &quote).unwrap();
        assert_eq!(value.to_typed::<Quote>("MSFT").unwrap(), quote);
        assert!(value.to_typed::<Vec<u8>>("MSFT").is_err());
    }
}
