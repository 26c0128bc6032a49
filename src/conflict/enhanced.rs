//! Versioning and conflict resolution on top of the pooled manager.

use crate::config::EnhancedConfig;
use crate::conflict::strategy::{ConflictResolver, ResolutionStrategy};
use crate::manager::OptimizedStateManager;
use crate::types::{State, StateValue, Timestamp, VERSION_KEY};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use tracing::{debug, warn};

/// Classification of a per-field divergence.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictType {
    FieldModification,
    ListOperation,
    StructureChange,
    /// Divergent `_version` fields. Never resolved automatically.
    VersionMismatch,
}

/// A detected divergence for one field.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Conflict {
    pub conflict_type: ConflictType,
    pub field_path: String,
    /// `None` when the field is absent on that side.
    pub current_value: Option<StateValue>,
    pub new_value: Option<StateValue>,
    pub timestamp: Timestamp,
    pub resolved: bool,
    /// Strategy that resolved this conflict. `None` while unresolved or
    /// when a custom resolver was used.
    pub strategy: Option<ResolutionStrategy>,
}

/// How one key differs between two states.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FieldDifference {
    pub old: Option<StateValue>,
    pub new: Option<StateValue>,
    /// An absent side counts as null.
    pub type_changed: bool,
}

/// Per-call options for conflict resolution.
#[derive(Clone, Debug, Default)]
pub struct ResolutionContext {
    /// Overrides the manager's resolver for this call.
    pub strategy: Option<ResolutionStrategy>,
    /// Free-form label of the writer, for logging.
    pub source: Option<String>,
}

/// A named snapshot of a state.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StateVersion {
    pub version_id: String,
    pub state: State,
    pub metadata: State,
    pub timestamp: Timestamp,
}

struct EnhancedInner {
    versions: VecDeque<StateVersion>,
    next_version: u64,
    conflicts: VecDeque<Conflict>,
}

/// Reconciles independently derived versions of a state.
pub struct EnhancedStateManager {
    config: EnhancedConfig,
    manager: Arc<OptimizedStateManager>,
    resolver: Box<dyn ConflictResolver>,
    inner: Mutex<EnhancedInner>,
}

impl EnhancedStateManager {
    /// Create a manager resolving with the configured built-in strategy.
    pub fn new(config: EnhancedConfig, manager: Arc<OptimizedStateManager>) -> Self {
        let resolver = Box::new(config.strategy);
        Self::with_resolver(config, manager, resolver)
    }

    /// Create a manager with a custom resolver. `config.strategy` is then
    /// only used by callers that read it back.
    pub fn with_resolver(
        config: EnhancedConfig,
        manager: Arc<OptimizedStateManager>,
        resolver: Box<dyn ConflictResolver>,
    ) -> Self {
        Self {
            config,
            manager,
            resolver,
            inner: Mutex::new(EnhancedInner {
                versions: VecDeque::new(),
                next_version: 1,
                conflicts: VecDeque::new(),
            }),
        }
    }

    pub fn config(&self) -> &EnhancedConfig {
        &self.config
    }

    /// The underlying pooled manager, for create, update and compress.
    pub fn manager(&self) -> &Arc<OptimizedStateManager> {
        &self.manager
    }

    /// Every key whose values differ structurally between `a` and `b`.
    pub fn compare_states(&self, a: &State, b: &State) -> BTreeMap<String, FieldDifference> {
        let serializer = self.manager.serializer();
        let keys = a.keys().chain(b.keys().filter(|k| !a.contains_key(*k)));

        let mut differences = BTreeMap::new();
        for key in keys {
            let old = a.get(key);
            let new = b.get(key);
            let equal = match (old, new) {
                (Some(x), Some(y)) => serializer.values_equal(x, y),
                _ => false,
            };
            if equal {
                continue;
            }
            let old_kind = old.map_or(StateValue::Null.kind(), StateValue::kind);
            let new_kind = new.map_or(StateValue::Null.kind(), StateValue::kind);
            differences.insert(
                key.clone(),
                FieldDifference {
                    old: old.cloned(),
                    new: new.cloned(),
                    type_changed: old_kind != new_kind,
                },
            );
        }
        differences
    }

    /// One conflict per differing key, in key order.
    pub fn detect_conflicts(&self, current: &State, new: &State) -> Vec<Conflict> {
        let timestamp = Timestamp::now();
        self.compare_states(current, new)
            .into_iter()
            .map(|(field_path, diff)| {
                let conflict_type = if field_path == VERSION_KEY {
                    ConflictType::VersionMismatch
                } else if diff.type_changed {
                    ConflictType::StructureChange
                } else if matches!(
                    (&diff.old, &diff.new),
                    (Some(StateValue::List(_)), Some(StateValue::List(_)))
                ) {
                    ConflictType::ListOperation
                } else {
                    ConflictType::FieldModification
                };
                Conflict {
                    conflict_type,
                    field_path,
                    current_value: diff.old,
                    new_value: diff.new,
                    timestamp,
                    resolved: false,
                    strategy: None,
                }
            })
            .collect()
    }

    /// Merge `new` into `current`.
    ///
    /// The resolver runs once over the whole pair and each conflicting field
    /// is taken from its result, in detection order. Version mismatches keep
    /// the `current` value and are returned unresolved. Every detected
    /// conflict is logged.
    pub fn update_state_with_conflict_resolution(
        &self,
        current: &State,
        new: &State,
        context: Option<&ResolutionContext>,
    ) -> (State, Vec<Conflict>) {
        let mut conflicts = self.detect_conflicts(current, new);
        let mut resolved = current.clone();
        if conflicts.is_empty() {
            return (resolved, Vec::new());
        }

        let (merged, strategy) = match context.and_then(|c| c.strategy) {
            Some(strategy) => (strategy.resolve(current, new), Some(strategy)),
            None => (
                self.resolver.resolve(current, new),
                self.resolver.strategy(),
            ),
        };

        let mut unresolved = Vec::new();
        for conflict in &mut conflicts {
            if conflict.conflict_type == ConflictType::VersionMismatch {
                unresolved.push(conflict.clone());
                continue;
            }
            match merged.get(&conflict.field_path) {
                Some(value) => {
                    resolved.insert(conflict.field_path.clone(), value.clone());
                }
                None => {
                    resolved.shift_remove(&conflict.field_path);
                }
            }
            conflict.resolved = true;
            conflict.strategy = strategy;
        }

        let source = context.and_then(|c| c.source.as_deref()).unwrap_or("-");
        if unresolved.is_empty() {
            debug!(
                source,
                conflicts = conflicts.len(),
                strategy = ?strategy,
                "resolved state conflicts"
            );
        } else {
            warn!(
                source,
                conflicts = conflicts.len(),
                unresolved = unresolved.len(),
                "state conflicts need manual resolution"
            );
        }

        self.record_conflicts(conflicts);
        (resolved, unresolved)
    }

    fn record_conflicts(&self, conflicts: Vec<Conflict>) {
        let capacity = self.config.max_conflict_history;
        if capacity == 0 {
            return;
        }
        let mut inner = self.inner.lock();
        for conflict in conflicts {
            if inner.conflicts.len() >= capacity {
                inner.conflicts.pop_front();
            }
            inner.conflicts.push_back(conflict);
        }
    }

    /// Snapshot `state` and return its id ("v1", "v2", ...).
    pub fn create_state_version(&self, state: &State, metadata: State) -> String {
        let mut inner = self.inner.lock();
        let version_id = format!("v{}", inner.next_version);
        inner.next_version += 1;

        while inner.versions.len() >= self.config.max_versions.max(1) {
            if let Some(dropped) = inner.versions.pop_front() {
                debug!(version = %dropped.version_id, "dropped oldest state version");
            }
        }
        inner.versions.push_back(StateVersion {
            version_id: version_id.clone(),
            state: state.clone(),
            metadata,
            timestamp: Timestamp::now(),
        });
        version_id
    }

    /// A copy of the stored version, if it is still retained.
    pub fn get_state_version(&self, version_id: &str) -> Option<StateVersion> {
        self.inner
            .lock()
            .versions
            .iter()
            .find(|v| v.version_id == version_id)
            .cloned()
    }

    /// Ids of retained versions, oldest first.
    pub fn list_versions(&self) -> Vec<String> {
        self.inner
            .lock()
            .versions
            .iter()
            .map(|v| v.version_id.clone())
            .collect()
    }

    /// Drop every retained version. Ids keep counting up.
    pub fn clear_versions(&self) {
        self.inner.lock().versions.clear();
    }

    /// Up to `limit` most recent logged conflicts, oldest first.
    pub fn get_conflict_history(&self, limit: usize) -> Vec<Conflict> {
        let inner = self.inner.lock();
        let skip = inner.conflicts.len().saturating_sub(limit);
        inner.conflicts.iter().skip(skip).cloned().collect()
    }

    pub fn clear_conflict_history(&self) {
        self.inner.lock().conflicts.clear();
    }
}
