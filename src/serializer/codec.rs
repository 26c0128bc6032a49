//! Wire encoding per [`WireFormat`].

use crate::error::{Result, SyncError};
use crate::types::{State, StateValue, Timestamp, WireFormat, METADATA_KEY};
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::io;

/// Version string written into payload metadata blocks.
pub const SERIALIZER_VERSION: &str = "1.0";

/// Metadata block optionally attached to a serialized state.
#[derive(Clone, Debug, Serialize)]
pub struct EncoderMetadata {
    pub serializer_version: &'static str,
    pub format: &'static str,
    pub serialized_at: f64,
}

impl EncoderMetadata {
    pub fn new(format: WireFormat) -> Self {
        Self {
            serializer_version: SERIALIZER_VERSION,
            format: format.as_str(),
            serialized_at: Timestamp::now().as_secs_f64(),
        }
    }
}

/// A state plus its optional metadata block, serialized as one map.
struct Envelope<'a> {
    state: &'a State,
    metadata: Option<&'a EncoderMetadata>,
}

impl Serialize for Envelope<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let shadowed = self.metadata.is_some() && self.state.contains_key(METADATA_KEY);
        let len = self.state.len() - usize::from(shadowed) + usize::from(self.metadata.is_some());
        let mut map = serializer.serialize_map(Some(len))?;
        for (key, value) in self.state {
            if self.metadata.is_some() && key == METADATA_KEY {
                continue;
            }
            map.serialize_entry(key, value)?;
        }
        if let Some(metadata) = self.metadata {
            map.serialize_entry(METADATA_KEY, metadata)?;
        }
        map.end()
    }
}

/// Encode any serializable value in the given format.
///
/// MessagePack structs are written as maps so the payload shape matches the
/// JSON encodings.
pub fn encode<T: Serialize + ?Sized>(
    value: &T,
    format: WireFormat,
    operation: &'static str,
) -> Result<Vec<u8>> {
    match format {
        WireFormat::Json => {
            serde_json::to_vec_pretty(value).map_err(|e| SyncError::encode(operation, format, e))
        }
        WireFormat::CompactJson => {
            serde_json::to_vec(value).map_err(|e| SyncError::encode(operation, format, e))
        }
        WireFormat::MessagePack => {
            rmp_serde::to_vec_named(value).map_err(|e| SyncError::encode(operation, format, e))
        }
    }
}

/// Encode a state, optionally tagged with a metadata block.
pub fn encode_state(
    state: &State,
    format: WireFormat,
    include_metadata: bool,
    operation: &'static str,
) -> Result<Vec<u8>> {
    let metadata = include_metadata.then(|| EncoderMetadata::new(format));
    encode(
        &Envelope {
            state,
            metadata: metadata.as_ref(),
        },
        format,
        operation,
    )
}

/// Decode a payload into a plain wire value.
pub fn decode(
    payload: &[u8],
    format: WireFormat,
    operation: &'static str,
) -> Result<serde_json::Value> {
    match format {
        WireFormat::Json | WireFormat::CompactJson => {
            serde_json::from_slice(payload).map_err(|e| SyncError::decode(operation, format, e))
        }
        WireFormat::MessagePack => {
            rmp_serde::from_slice(payload).map_err(|e| SyncError::decode(operation, format, e))
        }
    }
}

/// Decode a payload into a state, dropping any metadata block.
pub fn decode_state(payload: &[u8], format: WireFormat, operation: &'static str) -> Result<State> {
    match decode(payload, format, operation)? {
        serde_json::Value::Object(mut map) => {
            map.shift_remove(METADATA_KEY);
            Ok(map
                .into_iter()
                .map(|(k, v)| (k, StateValue::from_wire(v)))
                .collect())
        }
        other => Err(SyncError::decode(
            operation,
            format,
            format!("expected a map at the top level, found {}", json_kind(&other)),
        )),
    }
}

pub(crate) fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "list",
        serde_json::Value::Object(_) => "map",
    }
}

/// Feeds serializer output straight into a hasher.
struct HashWriter(Sha256);

impl io::Write for HashWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// SHA-256 over the compact JSON encoding, keys in insertion order.
///
/// Key order is part of the content: two states that differ only in order
/// hash differently and never share a cached payload.
pub fn canonical_hash(state: &State) -> crate::types::Hash {
    let mut writer = HashWriter(Sha256::new());
    // A non-finite float stops the stream early; encoding reports it.
    let _ = serde_json::to_writer(&mut writer, state);
    crate::types::Hash(writer.0.finalize().into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{state_from_json, Hash, Message};
    use serde_json::json;

    #[test]
    fn test_compact_has_no_whitespace() {
        let state = state_from_json(json!({"a": [1, 2], "b": {"c": "d"}}));
        let bytes = encode_state(&state, WireFormat::CompactJson, false, "test").unwrap();
        assert_eq!(bytes, br#"{"a":[1,2],"b":{"c":"d"}}"#);
    }

    #[test]
    fn test_pretty_is_indented() {
        let state = state_from_json(json!({"a": 1}));
        let bytes = encode_state(&state, WireFormat::Json, false, "test").unwrap();
        assert_eq!(String::from_utf8(bytes).unwrap(), "{\n  \"a\": 1\n}");
    }

    #[test]
    fn test_metadata_is_stripped_on_decode() {
        let state = state_from_json(json!({"a": 1}));
        for format in [WireFormat::Json, WireFormat::CompactJson, WireFormat::MessagePack] {
            let bytes = encode_state(&state, format, true, "test").unwrap();
            let raw = decode(&bytes, format, "test").unwrap();
            assert_eq!(raw[METADATA_KEY]["serializer_version"], SERIALIZER_VERSION);
            assert_eq!(raw[METADATA_KEY]["format"], format.as_str());
            assert_eq!(decode_state(&bytes, format, "test").unwrap(), state);
        }
    }

    #[test]
    fn test_messagepack_keeps_messages() {
        let mut state = State::new();
        state.insert(
            "messages".into(),
            StateValue::List(vec![Message::human("q").into(), Message::tool("a", "t1").into()]),
        );
        let bytes = encode_state(&state, WireFormat::MessagePack, false, "test").unwrap();
        assert_eq!(decode_state(&bytes, WireFormat::MessagePack, "test").unwrap(), state);
    }

    #[test]
    fn test_top_level_must_be_map() {
        let err = decode_state(b"[1,2]", WireFormat::CompactJson, "deserialize").unwrap_err();
        assert!(matches!(err, SyncError::Deserialization { operation: "deserialize", .. }));
    }

    #[test]
    fn test_canonical_hash_matches_compact_bytes() {
        let state = state_from_json(json!({"z": 1, "a": [true, null]}));
        let compact = serde_json::to_vec(&state).unwrap();
        assert_eq!(canonical_hash(&state), Hash::from_bytes(&compact));
    }

    #[test]
    fn test_decode_keeps_key_order() {
        let state = state_from_json(json!({"z": 1, "m": 2, "a": 3}));
        for format in [WireFormat::Json, WireFormat::CompactJson, WireFormat::MessagePack] {
            let bytes = encode_state(&state, format, true, "test").unwrap();
            let decoded = decode_state(&bytes, format, "test").unwrap();
            let keys: Vec<&str> = decoded.keys().map(String::as_str).collect();
            assert_eq!(keys, vec!["z", "m", "a"]);
        }
    }

    #[test]
    fn test_key_order_changes_hash() {
        let forward = state_from_json(json!({"a": 1, "b": 2}));
        let reversed = state_from_json(json!({"b": 2, "a": 1}));
        assert_eq!(forward, reversed);
        assert_ne!(canonical_hash(&forward), canonical_hash(&reversed));
    }

    #[test]
    fn test_non_finite_float_fails_to_encode() {
        let mut state = State::new();
        state.insert("score".into(), StateValue::Float(f64::INFINITY));
        for format in [WireFormat::Json, WireFormat::CompactJson, WireFormat::MessagePack] {
            let err = encode_state(&state, format, false, "serialize").unwrap_err();
            assert!(matches!(err, SyncError::Serialization { operation: "serialize", .. }));
        }
    }
}
