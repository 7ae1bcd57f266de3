//! Envelope encoding: JSON -> deflate -> base64
//!
//! Compression pays for itself on tree dumps, which are the largest frames
//! by far. Base64 keeps the envelope printable so it can be quoted verbatim
//! in logs and crash reports.

use std::io::{Read, Write};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::common::{Error, Result};

/// Pack a value into its printable wire form
pub fn pack<T: Serialize>(value: &T) -> Result<String> {
    let json = serde_json::to_vec(value)?;
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&json)?;
    let compressed = encoder.finish()?;
    Ok(BASE64.encode(compressed))
}

/// Unpack a value from its printable wire form
pub fn unpack<T: DeserializeOwned>(envelope: &str) -> Result<T> {
    let compressed = BASE64
        .decode(envelope.trim())
        .map_err(|e| Error::Internal(format!("invalid envelope base64: {e}")))?;
    let mut decoder = DeflateDecoder::new(compressed.as_slice());
    let mut json = Vec::new();
    decoder.read_to_end(&mut json)?;
    Ok(serde_json::from_slice(&json)?)
}

/// A dynamic value annotated with its remote type name.
///
/// Plain JSON loses the distinction between, say, `Int32` and `Int64`, or a
/// string and an enum member. Responses carry the remote type name alongside
/// the value so the driver can surface it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WrappedValue {
    #[serde(rename = "Type")]
    pub type_name: String,
    #[serde(rename = "Value")]
    pub value: serde_json::Value,
}

impl WrappedValue {
    pub fn wrap(type_name: impl Into<String>, value: serde_json::Value) -> Self {
        Self {
            type_name: type_name.into(),
            value,
        }
    }

    /// A null value of no particular type
    pub fn null() -> Self {
        Self::wrap("", serde_json::Value::Null)
    }

    pub fn is_null(&self) -> bool {
        self.value.is_null()
    }

    /// The value as a string sentinel, if it is one
    pub fn as_sentinel(&self) -> Option<&str> {
        self.value.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn envelope_round_trips() {
        let original = json!({
            "Kind": "TreeDump",
            "Nodes": [{"TargetId": 1, "Properties": {"Name": "root"}}],
        });
        let packed = pack(&original).unwrap();
        assert!(packed.is_ascii(), "envelope must stay printable");
        let back: serde_json::Value = unpack(&packed).unwrap();
        assert_eq!(original, back);
    }

    #[test]
    fn large_repetitive_payload_compresses() {
        let nodes: Vec<_> = (0..500)
            .map(|i| json!({"TargetId": i, "TypeName": "widgets.Button"}))
            .collect();
        let payload = json!({ "Nodes": nodes });
        let packed = pack(&payload).unwrap();
        let raw = serde_json::to_vec(&payload).unwrap();
        assert!(packed.len() < raw.len());
    }

    #[test]
    fn garbage_envelope_is_rejected() {
        assert!(unpack::<serde_json::Value>("not base64 !!!").is_err());
        // Valid base64 but not valid deflate.
        let bogus = BASE64.encode(b"plain bytes");
        assert!(unpack::<serde_json::Value>(&bogus).is_err());
    }

    #[test]
    fn wrapped_value_sentinel_access() {
        let w = WrappedValue::wrap("", json!("PendingResult"));
        assert_eq!(w.as_sentinel(), Some("PendingResult"));
        assert!(WrappedValue::null().is_null());
    }
}
