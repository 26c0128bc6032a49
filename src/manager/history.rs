//! Per-state change history kept in a bounded ring.

use crate::types::{StateValue, Timestamp};
use serde::Serialize;
use std::collections::VecDeque;

/// How a field was changed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateKind {
    /// The field was set to `new_value`.
    Set,
    /// `new_value` holds only the items appended to an existing list.
    Append,
}

/// One field-level change event.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StateUpdate {
    pub field_path: String,
    pub kind: UpdateKind,
    /// Previous value for `Set` updates; `None` for new fields and appends.
    pub old_value: Option<StateValue>,
    pub new_value: StateValue,
    pub timestamp: Timestamp,
}

impl StateUpdate {
    pub fn set(field: impl Into<String>, old: Option<StateValue>, new: StateValue) -> Self {
        Self {
            field_path: field.into(),
            kind: UpdateKind::Set,
            old_value: old,
            new_value: new,
            timestamp: Timestamp::now(),
        }
    }

    pub fn append(field: impl Into<String>, appended: Vec<StateValue>) -> Self {
        Self {
            field_path: field.into(),
            kind: UpdateKind::Append,
            old_value: None,
            new_value: StateValue::List(appended),
            timestamp: Timestamp::now(),
        }
    }

    fn approx_size(&self) -> usize {
        self.field_path.len()
            + self.old_value.as_ref().map_or(0, StateValue::approx_size)
            + self.new_value.approx_size()
    }
}

/// Ring buffer of the most recent updates for one state id.
#[derive(Clone, Debug)]
pub struct ChangeHistory {
    records: VecDeque<StateUpdate>,
    capacity: usize,
}

impl ChangeHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: VecDeque::with_capacity(capacity.min(64)),
            capacity,
        }
    }

    /// Append a record, dropping the oldest when full.
    pub fn push(&mut self, record: StateUpdate) {
        if self.capacity == 0 {
            return;
        }
        while self.records.len() >= self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    /// Up to `limit` most recent records, oldest first.
    pub fn recent(&self, limit: usize) -> Vec<StateUpdate> {
        let skip = self.records.len().saturating_sub(limit);
        self.records.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn approx_size(&self) -> usize {
        self.records.iter().map(StateUpdate::approx_size).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ring_drops_oldest() {
        let mut history = ChangeHistory::new(3);
        for i in 0..5 {
            history.push(StateUpdate::set("n", None, StateValue::Int(i)));
        }
        assert_eq!(history.len(), 3);
        let values: Vec<_> = history
            .recent(10)
            .into_iter()
            .map(|u| u.new_value.as_int().unwrap())
            .collect();
        assert_eq!(values, vec![2, 3, 4]);
    }

    #[test]
    fn test_recent_limit() {
        let mut history = ChangeHistory::new(50);
        for i in 0..10 {
            history.push(StateUpdate::set("n", None, StateValue::Int(i)));
        }
        let recent = history.recent(2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].new_value, StateValue::Int(8));
        assert_eq!(recent[1].new_value, StateValue::Int(9));
        assert!(history.recent(0).is_empty());
    }
}
