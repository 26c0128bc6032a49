//! Lossy trimming of states before they are handed to a storage backend.

use crate::types::{State, StateValue, CHILD_STATES_KEY, MESSAGES_KEY};

/// Accumulator fields dropped when empty.
pub const ACCUMULATOR_KEYS: &[&str] = &[MESSAGES_KEY, "tool_calls", "tool_results", "errors", "steps"];

/// Trim `state` for storage.
///
/// Drops null fields and empty accumulator lists, keeps only the last
/// `max_messages` messages, and keeps the `max_child_states` most recently
/// inserted child states.
pub fn optimize_for_storage(state: &State, max_messages: usize, max_child_states: usize) -> State {
    let mut trimmed = State::new();

    for (key, value) in state {
        if value.is_null() {
            continue;
        }
        if ACCUMULATOR_KEYS.contains(&key.as_str())
            && value.as_list().is_some_and(Vec::is_empty)
        {
            continue;
        }

        let value = match (key.as_str(), value) {
            (MESSAGES_KEY, StateValue::List(messages)) if messages.len() > max_messages => {
                let start = messages.len() - max_messages;
                StateValue::List(messages[start..].to_vec())
            }
            (CHILD_STATES_KEY, StateValue::Map(children)) if children.len() > max_child_states => {
                let skip = children.len() - max_child_states;
                StateValue::Map(
                    children
                        .iter()
                        .skip(skip)
                        .map(|(k, v)| (k.clone(), v.clone()))
                        .collect(),
                )
            }
            _ => value.clone(),
        };
        trimmed.insert(key.clone(), value);
    }

    trimmed
}
