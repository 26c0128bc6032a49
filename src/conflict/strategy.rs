//! Whole-state resolution strategies.

use crate::serializer::values_equal;
use crate::types::{State, StateValue};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Reconciles two divergent states into one.
///
/// Resolvers see the whole state pair at once. The enhanced manager then
/// copies the conflicting fields out of the result.
pub trait ConflictResolver: Send + Sync {
    fn resolve(&self, current: &State, new: &State) -> State;

    /// The built-in strategy this resolver implements, if any.
    fn strategy(&self) -> Option<ResolutionStrategy> {
        None
    }
}

/// Built-in resolution rules.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStrategy {
    /// The incoming state wins wholesale.
    #[default]
    LastWriteWins,
    /// The current state wins; only keys it lacks are taken from the
    /// incoming state.
    FirstWriteWins,
    /// Maps merge recursively, lists are unioned without duplicates and
    /// scalars take the incoming value.
    MergeChanges,
}

impl ResolutionStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionStrategy::LastWriteWins => "last_write_wins",
            ResolutionStrategy::FirstWriteWins => "first_write_wins",
            ResolutionStrategy::MergeChanges => "merge_changes",
        }
    }
}

impl fmt::Display for ResolutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ConflictResolver for ResolutionStrategy {
    fn resolve(&self, current: &State, new: &State) -> State {
        match self {
            ResolutionStrategy::LastWriteWins => new.clone(),
            ResolutionStrategy::FirstWriteWins => {
                let mut result = current.clone();
                for (key, value) in new {
                    if !result.contains_key(key) {
                        result.insert(key.clone(), value.clone());
                    }
                }
                result
            }
            ResolutionStrategy::MergeChanges => merge_maps(current, new),
        }
    }

    fn strategy(&self) -> Option<ResolutionStrategy> {
        Some(*self)
    }
}

fn merge_maps(current: &State, new: &State) -> State {
    let mut result = current.clone();
    for (key, incoming) in new {
        let merged = match result.get(key) {
            Some(existing) => merge_values(existing, incoming),
            None => incoming.clone(),
        };
        result.insert(key.clone(), merged);
    }
    result
}

fn merge_values(current: &StateValue, new: &StateValue) -> StateValue {
    match (current, new) {
        (StateValue::Map(a), StateValue::Map(b)) => StateValue::Map(merge_maps(a, b)),
        (StateValue::List(a), StateValue::List(b)) => {
            // Union in first-seen order.
            let mut union: Vec<StateValue> = Vec::with_capacity(a.len() + b.len());
            for item in a.iter().chain(b) {
                if !union.iter().any(|seen| values_equal(seen, item)) {
                    union.push(item.clone());
                }
            }
            StateValue::List(union)
        }
        _ => new.clone(),
    }
}
