//! Pooled state manager with incremental updates and change tracking.

use crate::config::ManagerConfig;
use crate::error::Result;
use crate::manager::history::{ChangeHistory, StateUpdate};
use crate::serializer::{SerializerStats, StateSerializer};
use crate::types::{approx_state_size, SharedState, State, StateValue, WireFormat};
use lru::LruCache;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tracing::{debug, trace};

/// Memory accounting snapshot.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct MemoryStats {
    pub pool_size: usize,
    pub max_pool_size: usize,
    pub compressed_states: usize,
    pub history_records: usize,
    pub pool_bytes: usize,
    pub compressed_bytes: usize,
    pub history_bytes: usize,
    pub total_bytes: usize,
    /// Bytes not allocated thanks to pool reuse, plus bytes trimmed by
    /// compression of the currently held compressed states.
    pub estimated_bytes_saved: usize,
}

/// Operation counters plus the serializer's own statistics.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ManagerStats {
    pub creates: u64,
    pub pool_reuses: u64,
    pub pool_evictions: u64,
    pub updates: u64,
    pub fields_changed: u64,
    pub incremental_appends: u64,
    pub diffs_applied: u64,
    pub compressions: u64,
    pub serializer: SerializerStats,
}

#[derive(Default)]
struct Counters {
    creates: u64,
    pool_reuses: u64,
    pool_evictions: u64,
    updates: u64,
    fields_changed: u64,
    incremental_appends: u64,
    diffs_applied: u64,
    compressions: u64,
    pooling_bytes_saved: usize,
}

struct CompressedState {
    state: State,
    raw_bytes: usize,
    compressed_bytes: usize,
}

struct ManagerInner {
    pool: Option<LruCache<String, SharedState>>,
    history: HashMap<String, ChangeHistory>,
    compressed: HashMap<String, CompressedState>,
    counters: Counters,
}

/// Amortizes allocation and change tracking across repeated updates to the
/// same logical state id.
///
/// The manager's lock is never held while calling into the serializer or
/// while holding a pooled state's own lock.
pub struct OptimizedStateManager {
    config: ManagerConfig,
    serializer: Arc<StateSerializer>,
    inner: Mutex<ManagerInner>,
}

impl OptimizedStateManager {
    pub fn new(config: ManagerConfig, serializer: Arc<StateSerializer>) -> Self {
        let pool = if config.enable_pooling {
            NonZeroUsize::new(config.max_pool_size).map(LruCache::new)
        } else {
            None
        };
        Self {
            config,
            serializer,
            inner: Mutex::new(ManagerInner {
                pool,
                history: HashMap::new(),
                compressed: HashMap::new(),
                counters: Counters::default(),
            }),
        }
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn serializer(&self) -> &Arc<StateSerializer> {
        &self.serializer
    }

    /// Create (or reuse) the state object for `id`.
    ///
    /// With pooling on, an existing pooled object is overwritten in place and
    /// the same `Arc` is returned. Without pooling a fresh object is made
    /// every time.
    pub fn create_state(&self, id: &str, initial: State) -> SharedState {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        inner.counters.creates += 1;

        let Some(pool) = inner.pool.as_mut() else {
            return Arc::new(RwLock::new(initial));
        };

        if let Some(existing) = pool.get(id).cloned() {
            drop(guard);
            let reused = {
                let mut state = existing.write();
                let reused = approx_state_size(&state);
                *state = initial;
                reused
            };
            let mut inner = self.inner.lock();
            inner.counters.pool_reuses += 1;
            inner.counters.pooling_bytes_saved += reused;
            trace!(state_id = id, "reused pooled state");
            return existing;
        }

        let fresh: SharedState = Arc::new(RwLock::new(initial));
        if let Some((evicted_id, _)) = pool.push(id.to_string(), Arc::clone(&fresh)) {
            inner.counters.pool_evictions += 1;
            debug!(state_id = %evicted_id, "evicted least recently used pooled state");
        }
        fresh
    }

    /// Look up the pooled object for `id` without changing its recency.
    pub fn get_state(&self, id: &str) -> Option<SharedState> {
        self.inner
            .lock()
            .pool
            .as_ref()
            .and_then(|pool| pool.peek(id))
            .cloned()
    }

    /// Apply `updates` field by field.
    ///
    /// With pooling on, `current` is updated in place and returned; otherwise
    /// a copy is updated. A list field whose new value strictly extends the
    /// current one only has the new suffix appended.
    pub fn update_state_incremental(
        &self,
        id: &str,
        current: &SharedState,
        updates: State,
    ) -> SharedState {
        let target = if self.config.enable_pooling {
            Arc::clone(current)
        } else {
            Arc::new(RwLock::new(current.read().clone()))
        };

        let mut records = Vec::new();
        let mut appends = 0u64;
        {
            let mut state = target.write();
            for (field, new_value) in updates {
                let record = match state.get_mut(&field) {
                    None => {
                        state.insert(field.clone(), new_value.clone());
                        StateUpdate::set(field, None, new_value)
                    }
                    Some(existing) if *existing == new_value => continue,
                    Some(existing) => match (existing, new_value) {
                        (StateValue::List(items), StateValue::List(new_items))
                            if new_items.len() > items.len()
                                && new_items.starts_with(items.as_slice()) =>
                        {
                            let suffix = new_items[items.len()..].to_vec();
                            items.extend(suffix.iter().cloned());
                            appends += 1;
                            StateUpdate::append(field, suffix)
                        }
                        (existing, new_value) => {
                            let old = std::mem::replace(existing, new_value.clone());
                            StateUpdate::set(field, Some(old), new_value)
                        }
                    },
                };
                records.push(record);
            }
        }

        let mut inner = self.inner.lock();
        inner.counters.updates += 1;
        inner.counters.fields_changed += records.len() as u64;
        inner.counters.incremental_appends += appends;
        if self.config.track_changes && !records.is_empty() {
            let limit = self.config.history_limit;
            let history = inner
                .history
                .entry(id.to_string())
                .or_insert_with(|| ChangeHistory::new(limit));
            for record in records {
                history.push(record);
            }
        }
        drop(inner);

        trace!(state_id = id, appends, "applied incremental update");
        target
    }

    /// Apply an encoded diff to a copy of `base`.
    pub fn apply_state_diff(
        &self,
        id: &str,
        base: &State,
        payload: &[u8],
        format: WireFormat,
    ) -> Result<State> {
        let result = self.serializer.apply_diff(base, payload, format)?;
        self.inner.lock().counters.diffs_applied += 1;
        trace!(state_id = id, "applied state diff");
        Ok(result)
    }

    /// Storage-trimmed copy of `state`. The result is kept for memory
    /// accounting when `cache_compressed` is on.
    pub fn compress_state(&self, id: &str, state: &State) -> State {
        let compressed = self.serializer.optimize_state_for_storage(state);

        let mut inner = self.inner.lock();
        inner.counters.compressions += 1;
        if self.config.cache_compressed {
            let raw_bytes = approx_state_size(state);
            let compressed_bytes = approx_state_size(&compressed);
            inner.compressed.insert(
                id.to_string(),
                CompressedState {
                    state: compressed.clone(),
                    raw_bytes,
                    compressed_bytes,
                },
            );
        }
        compressed
    }

    /// The cached compressed form of `id`, if any.
    pub fn get_compressed_state(&self, id: &str) -> Option<State> {
        self.inner
            .lock()
            .compressed
            .get(id)
            .map(|entry| entry.state.clone())
    }

    /// Up to `limit` most recent updates for `id`, oldest first. Unknown ids
    /// give an empty list.
    pub fn get_state_history(&self, id: &str, limit: usize) -> Vec<StateUpdate> {
        self.inner
            .lock()
            .history
            .get(id)
            .map(|history| history.recent(limit))
            .unwrap_or_default()
    }

    pub fn get_memory_usage_stats(&self) -> MemoryStats {
        let (pooled, mut stats) = {
            let inner = self.inner.lock();
            let pooled: Vec<SharedState> = inner
                .pool
                .as_ref()
                .map(|pool| pool.iter().map(|(_, s)| Arc::clone(s)).collect())
                .unwrap_or_default();
            let compressed_bytes = inner.compressed.values().map(|c| c.compressed_bytes).sum();
            let compression_saved: usize = inner
                .compressed
                .values()
                .map(|c| c.raw_bytes.saturating_sub(c.compressed_bytes))
                .sum();
            let stats = MemoryStats {
                pool_size: pooled.len(),
                max_pool_size: if self.config.enable_pooling {
                    self.config.max_pool_size
                } else {
                    0
                },
                compressed_states: inner.compressed.len(),
                history_records: inner.history.values().map(ChangeHistory::len).sum(),
                pool_bytes: 0,
                compressed_bytes,
                history_bytes: inner.history.values().map(ChangeHistory::approx_size).sum(),
                total_bytes: 0,
                estimated_bytes_saved: inner.counters.pooling_bytes_saved + compression_saved,
            };
            (pooled, stats)
        };

        stats.pool_bytes = pooled
            .iter()
            .map(|shared| approx_state_size(&shared.read()))
            .sum();
        stats.total_bytes = stats.pool_bytes + stats.compressed_bytes + stats.history_bytes;
        stats
    }

    pub fn get_performance_stats(&self) -> ManagerStats {
        let mut stats = {
            let inner = self.inner.lock();
            let c = &inner.counters;
            ManagerStats {
                creates: c.creates,
                pool_reuses: c.pool_reuses,
                pool_evictions: c.pool_evictions,
                updates: c.updates,
                fields_changed: c.fields_changed,
                incremental_appends: c.incremental_appends,
                diffs_applied: c.diffs_applied,
                compressions: c.compressions,
                serializer: SerializerStats::default(),
            }
        };
        stats.serializer = self.serializer.get_performance_stats();
        stats
    }

    /// Drop the pooled object, history and compressed copy of one id, or of
    /// every id when `id` is `None`.
    pub fn cleanup(&self, id: Option<&str>) {
        let mut inner = self.inner.lock();
        match id {
            Some(id) => {
                if let Some(pool) = inner.pool.as_mut() {
                    pool.pop(id);
                }
                inner.history.remove(id);
                inner.compressed.remove(id);
                debug!(state_id = id, "cleaned up state");
            }
            None => {
                if let Some(pool) = inner.pool.as_mut() {
                    pool.clear();
                }
                inner.history.clear();
                inner.compressed.clear();
                inner.counters = Counters::default();
                debug!("cleaned up all states");
            }
        }
    }
}
