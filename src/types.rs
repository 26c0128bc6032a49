//! Core types for state synchronization.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use indexmap::IndexMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::SyncError;

/// Conventional key holding a state's message log.
pub const MESSAGES_KEY: &str = "messages";

/// Conventional key holding nested child states, keyed by child id.
pub const CHILD_STATES_KEY: &str = "child_states";

/// Key of the metadata block the serializer may attach to a payload.
pub const METADATA_KEY: &str = "_metadata";

/// Reserved key carrying a writer-assigned version marker.
pub const VERSION_KEY: &str = "_version";

/// An execution state: an open mapping of field name to value.
///
/// Keys keep insertion order, which is also their wire order. Storage
/// trimming relies on it to tell recent child states from old ones.
/// Equality ignores order.
pub type State = IndexMap<String, StateValue>;

/// A pooled state handle. Identity is `Arc` pointer identity.
pub type SharedState = Arc<RwLock<State>>;

/// Content hash of a normalized state (SHA-256).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Hash(pub [u8; 32]);

impl Hash {
    /// Compute hash from bytes.
    pub fn from_bytes(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        Hash(hasher.finalize().into())
    }

    /// Convert to hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({}...)", &self.to_hex()[..8])
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Microseconds since Unix epoch.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Current time.
    pub fn now() -> Self {
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Timestamp(duration.as_micros() as i64)
    }

    /// Seconds since epoch as a float, the form used in diff payloads.
    pub fn as_secs_f64(&self) -> f64 {
        self.0 as f64 / 1_000_000.0
    }

    pub fn from_secs_f64(secs: f64) -> Self {
        Timestamp((secs * 1_000_000.0).round() as i64)
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}

/// Wire encoding for serialized states and diffs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WireFormat {
    /// Human-readable, indented JSON.
    #[default]
    Json,
    /// Minified JSON.
    CompactJson,
    /// MessagePack object graph. Not guaranteed portable across encoder
    /// versions.
    #[serde(rename = "msgpack")]
    MessagePack,
}

impl WireFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            WireFormat::Json => "json",
            WireFormat::CompactJson => "compact_json",
            WireFormat::MessagePack => "msgpack",
        }
    }
}

impl fmt::Display for WireFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WireFormat {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(WireFormat::Json),
            "compact_json" | "compact" => Ok(WireFormat::CompactJson),
            "msgpack" | "messagepack" | "binary" => Ok(WireFormat::MessagePack),
            _ => Err(SyncError::UnsupportedFormat {
                operation: "parse_format",
                format: s.to_string(),
            }),
        }
    }
}

/// A conversation message held in a state's message log.
///
/// The serde form is the plain field set used on the wire:
/// `{"type": "human", "content": "..."}`, with `tool_call_id` on tool
/// messages.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Message {
    Human {
        content: String,
    },
    Ai {
        content: String,
    },
    System {
        content: String,
    },
    Tool {
        content: String,
        #[serde(default)]
        tool_call_id: String,
    },
}

impl Message {
    pub fn human(content: impl Into<String>) -> Self {
        Message::Human {
            content: content.into(),
        }
    }

    pub fn ai(content: impl Into<String>) -> Self {
        Message::Ai {
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Message::System {
            content: content.into(),
        }
    }

    pub fn tool(content: impl Into<String>, tool_call_id: impl Into<String>) -> Self {
        Message::Tool {
            content: content.into(),
            tool_call_id: tool_call_id.into(),
        }
    }

    pub fn content(&self) -> &str {
        match self {
            Message::Human { content }
            | Message::Ai { content }
            | Message::System { content }
            | Message::Tool { content, .. } => content,
        }
    }

    /// Wire type tag.
    pub fn type_tag(&self) -> &'static str {
        match self {
            Message::Human { .. } => "human",
            Message::Ai { .. } => "ai",
            Message::System { .. } => "system",
            Message::Tool { .. } => "tool",
        }
    }

    pub fn tool_call_id(&self) -> Option<&str> {
        match self {
            Message::Tool { tool_call_id, .. } => Some(tool_call_id),
            _ => None,
        }
    }

    /// Equal iff content and type tag match.
    pub fn same_content(&self, other: &Message) -> bool {
        self.type_tag() == other.type_tag() && self.content() == other.content()
    }

    /// Rebuild a message from a wire map.
    ///
    /// Returns `None` unless the map has a known type tag, string content,
    /// and no fields a message cannot carry.
    pub fn from_wire(map: &serde_json::Map<String, serde_json::Value>) -> Option<Self> {
        if map
            .keys()
            .any(|k| !matches!(k.as_str(), "content" | "type" | "tool_call_id"))
        {
            return None;
        }
        let content = map.get("content")?.as_str()?.to_string();
        let tool_call_id = map.get("tool_call_id");
        match map.get("type")?.as_str()? {
            "human" if tool_call_id.is_none() => Some(Message::Human { content }),
            "ai" if tool_call_id.is_none() => Some(Message::Ai { content }),
            "system" if tool_call_id.is_none() => Some(Message::System { content }),
            "tool" => {
                let tool_call_id = match tool_call_id {
                    Some(id) => id.as_str()?.to_string(),
                    None => String::new(),
                };
                Some(Message::Tool {
                    content,
                    tool_call_id,
                })
            }
            _ => None,
        }
    }
}

/// Coarse type of a [`StateValue`], used to classify structural changes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValueKind {
    Null,
    Bool,
    Int,
    Float,
    String,
    List,
    Map,
    Message,
}

/// A loosely-typed state value.
#[derive(Clone, Debug, PartialEq, Default)]
pub enum StateValue {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    /// Must be finite to be serialized; NaN and infinities have no wire form.
    Float(f64),
    String(String),
    List(Vec<StateValue>),
    Map(State),
    Message(Message),
}

impl StateValue {
    pub fn kind(&self) -> ValueKind {
        match self {
            StateValue::Null => ValueKind::Null,
            StateValue::Bool(_) => ValueKind::Bool,
            StateValue::Int(_) => ValueKind::Int,
            StateValue::Float(_) => ValueKind::Float,
            StateValue::String(_) => ValueKind::String,
            StateValue::List(_) => ValueKind::List,
            StateValue::Map(_) => ValueKind::Map,
            StateValue::Message(_) => ValueKind::Message,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, StateValue::Null)
    }

    pub fn as_list(&self) -> Option<&Vec<StateValue>> {
        match self {
            StateValue::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&State> {
        match self {
            StateValue::Map(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            StateValue::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            StateValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_message(&self) -> Option<&Message> {
        match self {
            StateValue::Message(m) => Some(m),
            _ => None,
        }
    }

    /// Rebuild from a wire value, restoring messages from their type tags.
    pub fn from_wire(value: serde_json::Value) -> Self {
        use serde_json::Value;
        match value {
            Value::Null => StateValue::Null,
            Value::Bool(b) => StateValue::Bool(b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => StateValue::Int(i),
                None => StateValue::Float(n.as_f64().unwrap_or_default()),
            },
            Value::String(s) => StateValue::String(s),
            Value::Array(items) => {
                StateValue::List(items.into_iter().map(Self::from_wire).collect())
            }
            Value::Object(map) => match Message::from_wire(&map) {
                Some(message) => StateValue::Message(message),
                None => StateValue::Map(map_from_wire(map)),
            },
        }
    }

    /// Rough in-memory footprint in bytes, for memory accounting.
    pub fn approx_size(&self) -> usize {
        const SLOT: usize = std::mem::size_of::<StateValue>();
        match self {
            StateValue::String(s) => SLOT + s.len(),
            StateValue::List(items) => SLOT + items.iter().map(Self::approx_size).sum::<usize>(),
            StateValue::Map(map) => {
                SLOT + map
                    .iter()
                    .map(|(k, v)| k.len() + v.approx_size())
                    .sum::<usize>()
            }
            StateValue::Message(m) => {
                SLOT + m.content().len() + m.tool_call_id().map_or(0, str::len)
            }
            _ => SLOT,
        }
    }
}

fn map_from_wire(map: serde_json::Map<String, serde_json::Value>) -> State {
    map.into_iter()
        .map(|(k, v)| (k, StateValue::from_wire(v)))
        .collect()
}

/// Rebuild a state from a wire object. Returns `None` for non-objects.
pub fn state_from_wire(value: serde_json::Value) -> Option<State> {
    match value {
        serde_json::Value::Object(map) => Some(map_from_wire(map)),
        _ => None,
    }
}

/// Build a state from a JSON object literal. Non-object values give an
/// empty state.
pub fn state_from_json(value: serde_json::Value) -> State {
    state_from_wire(value).unwrap_or_default()
}

/// Rough in-memory footprint of a whole state.
pub fn approx_state_size(state: &State) -> usize {
    state
        .iter()
        .map(|(k, v)| k.len() + v.approx_size())
        .sum()
}

/// Serializes the normalized wire form: messages become plain field sets
/// with keys in sorted order, maps keep their insertion order. Non-finite
/// floats are an error.
impl Serialize for StateValue {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;
        match self {
            StateValue::Null => serializer.serialize_unit(),
            StateValue::Bool(b) => serializer.serialize_bool(*b),
            StateValue::Int(n) => serializer.serialize_i64(*n),
            StateValue::Float(f) if f.is_finite() => serializer.serialize_f64(*f),
            StateValue::Float(f) => Err(serde::ser::Error::custom(format!(
                "non-finite float {} has no wire form",
                f
            ))),
            StateValue::String(s) => serializer.serialize_str(s),
            StateValue::List(items) => serializer.collect_seq(items),
            StateValue::Map(map) => serializer.collect_map(map),
            StateValue::Message(message) => {
                let tool_call_id = message.tool_call_id();
                let len = if tool_call_id.is_some() { 3 } else { 2 };
                let mut map = serializer.serialize_map(Some(len))?;
                map.serialize_entry("content", message.content())?;
                if let Some(id) = tool_call_id {
                    map.serialize_entry("tool_call_id", id)?;
                }
                map.serialize_entry("type", message.type_tag())?;
                map.end()
            }
        }
    }
}

impl From<bool> for StateValue {
    fn from(b: bool) -> Self {
        StateValue::Bool(b)
    }
}

impl From<i64> for StateValue {
    fn from(n: i64) -> Self {
        StateValue::Int(n)
    }
}

impl From<i32> for StateValue {
    fn from(n: i32) -> Self {
        StateValue::Int(n as i64)
    }
}

impl From<f64> for StateValue {
    fn from(f: f64) -> Self {
        StateValue::Float(f)
    }
}

impl From<&str> for StateValue {
    fn from(s: &str) -> Self {
        StateValue::String(s.to_string())
    }
}

impl From<String> for StateValue {
    fn from(s: String) -> Self {
        StateValue::String(s)
    }
}

impl From<Message> for StateValue {
    fn from(m: Message) -> Self {
        StateValue::Message(m)
    }
}

impl From<Vec<StateValue>> for StateValue {
    fn from(items: Vec<StateValue>) -> Self {
        StateValue::List(items)
    }
}

impl From<State> for StateValue {
    fn from(map: State) -> Self {
        StateValue::Map(map)
    }
}

impl From<serde_json::Value> for StateValue {
    fn from(value: serde_json::Value) -> Self {
        StateValue::from_wire(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_hash_hex() {
        let hash = Hash::from_bytes(b"hello world");
        assert_eq!(hash.to_hex().len(), 64);
        assert_eq!(hash.to_string(), hash.to_hex());
        assert_ne!(hash, Hash::from_bytes(b"hello world!"));
    }

    #[test]
    fn test_wire_format_parse() {
        assert_eq!("json".parse::<WireFormat>().unwrap(), WireFormat::Json);
        assert_eq!(
            "compact_json".parse::<WireFormat>().unwrap(),
            WireFormat::CompactJson
        );
        assert_eq!(
            "binary".parse::<WireFormat>().unwrap(),
            WireFormat::MessagePack
        );
        let err = "yaml".parse::<WireFormat>().unwrap_err();
        assert!(matches!(err, SyncError::UnsupportedFormat { ref format, .. } if format == "yaml"));
    }

    #[test]
    fn test_message_wire_matches_serde_form() {
        let messages = vec![
            Message::human("hi"),
            Message::ai("hello"),
            Message::system("be brief"),
            Message::tool("42", "call_1"),
        ];
        for message in messages {
            let normalized = serde_json::to_value(StateValue::from(message.clone())).unwrap();
            assert_eq!(normalized, serde_json::to_value(&message).unwrap());
        }
    }

    #[test]
    fn test_encoding_keeps_insertion_order() {
        let state = state_from_json(json!({"b": 1, "a": {"z": null, "y": true}}));
        assert_eq!(
            serde_json::to_string(&state).unwrap(),
            r#"{"b":1,"a":{"z":null,"y":true}}"#
        );
        assert_eq!(
            state,
            state_from_json(json!({"a": {"y": true, "z": null}, "b": 1}))
        );
        let tool = StateValue::from(Message::tool("ok", "c1"));
        assert_eq!(
            serde_json::to_string(&tool).unwrap(),
            r#"{"content":"ok","tool_call_id":"c1","type":"tool"}"#
        );
    }

    #[test]
    fn test_tool_message_defaults_call_id() {
        let value = StateValue::from_wire(json!({"type": "tool", "content": "ok"}));
        assert_eq!(value, StateValue::Message(Message::tool("ok", "")));
    }

    #[test]
    fn test_map_with_extra_fields_is_not_a_message() {
        let value = StateValue::from_wire(json!({"type": "human", "content": "x", "extra": 1}));
        assert_eq!(value.kind(), ValueKind::Map);

        let value = StateValue::from_wire(json!({"type": "robot", "content": "x"}));
        assert_eq!(value.kind(), ValueKind::Map);
    }

    #[test]
    fn test_numbers_keep_their_kind() {
        assert_eq!(StateValue::from_wire(json!(3)), StateValue::Int(3));
        assert_eq!(StateValue::from_wire(json!(3.5)), StateValue::Float(3.5));
        assert!(serde_json::to_value(StateValue::Float(f64::NAN)).is_err());
        assert!(serde_json::to_value(StateValue::Float(f64::INFINITY)).is_err());
    }

    #[test]
    fn test_state_from_json() {
        let state = state_from_json(json!({
            "messages": [{"type": "ai", "content": "done"}],
            "step": 2
        }));
        assert_eq!(state["step"], StateValue::Int(2));
        assert_eq!(
            state["messages"],
            StateValue::List(vec![Message::ai("done").into()])
        );
        assert!(state_from_json(json!([1, 2])).is_empty());
    }

    #[test]
    fn test_timestamp_secs() {
        let ts = Timestamp(1_500_000);
        assert_eq!(ts.as_secs_f64(), 1.5);
        assert_eq!(Timestamp::from_secs_f64(1.5), ts);
    }
}
