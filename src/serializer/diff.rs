//! Structural diffs between state snapshots.
//!
//! A diff records added keys, modified keys and removed keys. Modified list
//! fields that only grew at the end are stored in append form
//! (`{"added": [...]}`) instead of as the whole list.
//!
//! A list field replaced by a map that itself looks like the append form is
//! written under `added` instead, so it cannot be misread on apply.
//!
//! Lists longer than the configured threshold are handled according to
//! [`LongListPolicy`]. Under the default `AppendOnly` policy only appended
//! suffixes of long lists are captured: shrinking, reordering or editing a
//! long list in place is not representable and is dropped from the diff.

use crate::config::LongListPolicy;
use crate::error::{Result, SyncError};
use crate::serializer::codec::json_kind;
use crate::types::{State, StateValue, Timestamp, WireFormat};
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use tracing::warn;

/// Change to a single key present in both snapshots.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldChange {
    /// Replace the whole value.
    Replace(StateValue),
    /// Append items to the end of a list.
    Append(Vec<StateValue>),
}

impl Serialize for FieldChange {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            FieldChange::Replace(value) => value.serialize(serializer),
            FieldChange::Append(items) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("added", items)?;
                map.end()
            }
        }
    }
}

/// Structural delta between two states.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StateDiff {
    pub added: State,
    pub modified: BTreeMap<String, FieldChange>,
    pub removed: Vec<String>,
    #[serde(serialize_with = "timestamp_secs")]
    pub timestamp: Timestamp,
}

fn timestamp_secs<S: Serializer>(ts: &Timestamp, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_f64(ts.as_secs_f64())
}

impl StateDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.removed.is_empty()
    }

    /// Rebuild a diff from its decoded wire form.
    ///
    /// A modified entry shaped `{"added": [...]}` becomes
    /// [`FieldChange::Append`]; [`StateDiff::apply`] turns it back into a
    /// literal map if the base field is not a list.
    pub fn from_wire(
        value: serde_json::Value,
        format: WireFormat,
        operation: &'static str,
    ) -> Result<Self> {
        let malformed = |msg: String| SyncError::decode(operation, format, msg);

        let mut map = match value {
            serde_json::Value::Object(map) => map,
            other => {
                return Err(malformed(format!(
                    "diff must be a map, found {}",
                    json_kind(&other)
                )))
            }
        };

        let added = match map.remove("added") {
            None | Some(serde_json::Value::Null) => State::new(),
            Some(serde_json::Value::Object(fields)) => fields
                .into_iter()
                .map(|(k, v)| (k, StateValue::from_wire(v)))
                .collect(),
            Some(other) => {
                return Err(malformed(format!(
                    "'added' must be a map, found {}",
                    json_kind(&other)
                )))
            }
        };

        let modified = match map.remove("modified") {
            None | Some(serde_json::Value::Null) => BTreeMap::new(),
            Some(serde_json::Value::Object(fields)) => fields
                .into_iter()
                .map(|(k, v)| (k, change_from_wire(v)))
                .collect(),
            Some(other) => {
                return Err(malformed(format!(
                    "'modified' must be a map, found {}",
                    json_kind(&other)
                )))
            }
        };

        let removed = match map.remove("removed") {
            None | Some(serde_json::Value::Null) => Vec::new(),
            Some(serde_json::Value::Array(keys)) => keys
                .into_iter()
                .map(|k| match k {
                    serde_json::Value::String(s) => Ok(s),
                    other => Err(malformed(format!(
                        "removed keys must be strings, found {}",
                        json_kind(&other)
                    ))),
                })
                .collect::<Result<Vec<_>>>()?,
            Some(other) => {
                return Err(malformed(format!(
                    "'removed' must be a list, found {}",
                    json_kind(&other)
                )))
            }
        };

        let timestamp = map
            .get("timestamp")
            .and_then(serde_json::Value::as_f64)
            .map(Timestamp::from_secs_f64)
            .unwrap_or_default();

        Ok(StateDiff {
            added,
            modified,
            removed,
            timestamp,
        })
    }

    /// Apply this diff to a copy of `base`.
    pub fn apply(&self, base: &State) -> State {
        let mut result = base.clone();

        for (key, value) in &self.added {
            result.insert(key.clone(), value.clone());
        }

        for (key, change) in &self.modified {
            match change {
                FieldChange::Replace(value) => {
                    result.insert(key.clone(), value.clone());
                }
                FieldChange::Append(items) => match result.get_mut(key) {
                    Some(StateValue::List(list)) => list.extend(items.iter().cloned()),
                    _ => {
                        // Not a list in the base, so this was a literal map.
                        let mut literal = State::new();
                        literal.insert("added".to_string(), StateValue::List(items.clone()));
                        result.insert(key.clone(), StateValue::Map(literal));
                    }
                },
            }
        }

        for key in &self.removed {
            result.shift_remove(key);
        }

        result
    }
}

fn change_from_wire(value: serde_json::Value) -> FieldChange {
    match value {
        serde_json::Value::Object(map)
            if map.len() == 1 && map.get("added").is_some_and(serde_json::Value::is_array) =>
        {
            let items = match map.into_iter().next() {
                Some((_, serde_json::Value::Array(items))) => items,
                _ => Vec::new(),
            };
            FieldChange::Append(items.into_iter().map(StateValue::from_wire).collect())
        }
        other => FieldChange::Replace(StateValue::from_wire(other)),
    }
}

/// Structural equality: messages compare by content and type tag only,
/// containers recursively, everything else by value.
pub fn values_equal(a: &StateValue, b: &StateValue) -> bool {
    match (a, b) {
        (StateValue::Message(x), StateValue::Message(y)) => x.same_content(y),
        (StateValue::List(x), StateValue::List(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(x, y)| values_equal(x, y))
        }
        (StateValue::Map(x), StateValue::Map(y)) => states_equal(x, y),
        _ => a == b,
    }
}

/// [`values_equal`] over whole states.
pub fn states_equal(a: &State, b: &State) -> bool {
    a.len() == b.len()
        && a
            .iter()
            .all(|(k, v)| b.get(k).is_some_and(|other| values_equal(v, other)))
}

/// Differ parameters taken from the serializer configuration.
#[derive(Clone, Copy, Debug)]
pub struct DiffOptions {
    pub long_list_threshold: usize,
    pub long_list_policy: LongListPolicy,
}

/// Compute the structural diff from `old` to `new`.
pub fn compute_diff(old: &State, new: &State, options: DiffOptions) -> StateDiff {
    let mut diff = StateDiff {
        added: State::new(),
        modified: BTreeMap::new(),
        removed: Vec::new(),
        timestamp: Timestamp::now(),
    };

    for (key, new_value) in new {
        let Some(old_value) = old.get(key) else {
            diff.added.insert(key.clone(), new_value.clone());
            continue;
        };
        if values_equal(old_value, new_value) {
            continue;
        }
        let change = match (old_value, new_value) {
            (StateValue::List(old_items), StateValue::List(new_items)) => {
                list_change(key, old_items, new_items, options)
            }
            (StateValue::List(_), value) if looks_like_append(value) => {
                diff.added.insert(key.clone(), new_value.clone());
                continue;
            }
            _ => Some(FieldChange::Replace(new_value.clone())),
        };
        if let Some(change) = change {
            diff.modified.insert(key.clone(), change);
        }
    }

    diff.removed = old
        .keys()
        .filter(|key| !new.contains_key(*key))
        .cloned()
        .collect();

    diff
}

/// True for a map whose wire form is indistinguishable from [`FieldChange::Append`].
fn looks_like_append(value: &StateValue) -> bool {
    match value {
        StateValue::Map(map) => {
            map.len() == 1 && matches!(map.get("added"), Some(StateValue::List(_)))
        }
        _ => false,
    }
}

fn list_change(
    key: &str,
    old: &[StateValue],
    new: &[StateValue],
    options: DiffOptions,
) -> Option<FieldChange> {
    let long = old.len().max(new.len()) > options.long_list_threshold;

    if long && options.long_list_policy == LongListPolicy::AppendOnly {
        if new.len() > old.len() {
            return Some(FieldChange::Append(new[old.len()..].to_vec()));
        }
        warn!(
            field = key,
            old_len = old.len(),
            new_len = new.len(),
            "dropping non-append change to long list from diff"
        );
        return None;
    }

    let extends = new.len() > old.len()
        && old.iter().zip(new).all(|(a, b)| values_equal(a, b));
    if extends {
        Some(FieldChange::Append(new[old.len()..].to_vec()))
    } else {
        Some(FieldChange::Replace(StateValue::List(new.to_vec())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{state_from_json, Message};
    use serde_json::json;

    const DEFAULTS: DiffOptions = DiffOptions {
        long_list_threshold: 100,
        long_list_policy: LongListPolicy::AppendOnly,
    };

    fn long_list(len: i64) -> StateValue {
        StateValue::List((0..len).map(StateValue::Int).collect())
    }

    #[test]
    fn test_added_modified_removed() {
        let old = state_from_json(json!({"a": 1, "b": "x", "gone": true}));
        let new = state_from_json(json!({"a": 2, "b": "x", "fresh": null}));
        let diff = compute_diff(&old, &new, DEFAULTS);

        assert_eq!(diff.added, state_from_json(json!({"fresh": null})));
        assert_eq!(
            diff.modified.get("a"),
            Some(&FieldChange::Replace(StateValue::Int(2)))
        );
        assert!(!diff.modified.contains_key("b"));
        assert_eq!(diff.removed, vec!["gone".to_string()]);
        assert_eq!(diff.apply(&old), new);
    }

    #[test]
    fn test_short_list_append_form() {
        let old = state_from_json(json!({"b": [1, 2]}));
        let new = state_from_json(json!({"b": [1, 2, 3]}));
        let diff = compute_diff(&old, &new, DEFAULTS);

        assert_eq!(
            diff.modified.get("b"),
            Some(&FieldChange::Append(vec![StateValue::Int(3)]))
        );
        let wire = serde_json::to_value(&diff).unwrap();
        assert_eq!(wire["modified"]["b"], json!({"added": [3]}));
    }

    #[test]
    fn test_short_list_edit_replaces() {
        let old = state_from_json(json!({"b": [1, 2, 3]}));
        let new = state_from_json(json!({"b": [3, 1]}));
        let diff = compute_diff(&old, &new, DEFAULTS);
        assert_eq!(
            diff.modified.get("b"),
            Some(&FieldChange::Replace(StateValue::List(vec![
                StateValue::Int(3),
                StateValue::Int(1)
            ])))
        );
        assert_eq!(diff.apply(&old), new);
    }

    #[test]
    fn test_long_list_shrink_is_dropped_by_default() {
        let mut old = State::new();
        old.insert("items".into(), long_list(150));
        let mut new = State::new();
        new.insert("items".into(), long_list(120));

        let diff = compute_diff(&old, &new, DEFAULTS);
        assert!(diff.is_empty());
        // The documented loss: applying gives back the old list.
        assert_ne!(diff.apply(&old), new);
    }

    #[test]
    fn test_long_list_full_replace_policy() {
        let options = DiffOptions {
            long_list_policy: LongListPolicy::FullReplace,
            ..DEFAULTS
        };
        let mut old = State::new();
        old.insert("items".into(), long_list(150));
        let mut new = State::new();
        new.insert("items".into(), long_list(120));

        let diff = compute_diff(&old, &new, options);
        assert_eq!(diff.apply(&old), new);

        let mut grown = State::new();
        grown.insert("items".into(), long_list(151));
        let diff = compute_diff(&old, &grown, options);
        assert_eq!(
            diff.modified.get("items"),
            Some(&FieldChange::Append(vec![StateValue::Int(150)]))
        );
    }

    #[test]
    fn test_long_list_append_is_captured() {
        let mut old = State::new();
        old.insert("items".into(), long_list(200));
        let mut new = State::new();
        new.insert("items".into(), long_list(203));

        let diff = compute_diff(&old, &new, DEFAULTS);
        assert_eq!(diff.apply(&old), new);
    }

    #[test]
    fn test_messages_compare_by_content_and_type() {
        let a = StateValue::Message(Message::tool("done", "call_1"));
        let b = StateValue::Message(Message::tool("done", "call_2"));
        let c = StateValue::Message(Message::ai("done"));
        assert!(values_equal(&a, &b));
        assert!(!values_equal(&a, &c));
    }

    #[test]
    fn test_wire_roundtrip_of_append_form() {
        let old = state_from_json(json!({"log": ["a"], "n": 1}));
        let new = state_from_json(json!({"log": ["a", "b"], "n": 2}));
        let diff = compute_diff(&old, &new, DEFAULTS);

        let wire = serde_json::to_value(&diff).unwrap();
        let decoded = StateDiff::from_wire(wire, WireFormat::CompactJson, "test").unwrap();
        assert_eq!(decoded.modified, diff.modified);
        assert_eq!(decoded.apply(&old), new);
    }

    #[test]
    fn test_append_form_on_non_list_base_is_literal() {
        let wire = json!({"added": {}, "modified": {"m": {"added": [1]}}, "removed": []});
        let diff = StateDiff::from_wire(wire, WireFormat::Json, "test").unwrap();
        let base = state_from_json(json!({"m": "text"}));
        assert_eq!(diff.apply(&base), state_from_json(json!({"m": {"added": [1]}})));
    }

    #[test]
    fn test_list_replaced_by_append_shaped_map() {
        let old = state_from_json(json!({"b": [1]}));
        let new = state_from_json(json!({"b": {"added": [2]}}));
        let diff = compute_diff(&old, &new, DEFAULTS);

        assert!(diff.modified.is_empty());
        assert_eq!(diff.added, new);

        let wire = serde_json::to_value(&diff).unwrap();
        let decoded = StateDiff::from_wire(wire, WireFormat::CompactJson, "test").unwrap();
        assert_eq!(decoded.apply(&old), new);
    }

    #[test]
    fn test_list_replaced_by_other_map_stays_modified() {
        let old = state_from_json(json!({"b": [1]}));
        let new = state_from_json(json!({"b": {"added": [2], "extra": true}}));
        let diff = compute_diff(&old, &new, DEFAULTS);
        assert!(diff.added.is_empty());
        assert_eq!(diff.apply(&old), new);
    }

    #[test]
    fn test_malformed_diff() {
        let err = StateDiff::from_wire(json!([1]), WireFormat::Json, "apply_diff").unwrap_err();
        assert!(matches!(err, SyncError::Deserialization { operation: "apply_diff", .. }));

        let err = StateDiff::from_wire(json!({"removed": "a"}), WireFormat::Json, "apply_diff")
            .unwrap_err();
        assert!(err.to_string().contains("'removed' must be a list"));
    }
}
