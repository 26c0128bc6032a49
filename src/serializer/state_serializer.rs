//! The serializer facade: cached encoding, decoding, diffs and trimming.

use crate::config::SerializerConfig;
use crate::error::{Result, SyncError};
use crate::serializer::cache::{Lookup, SerializationCache};
use crate::serializer::codec;
use crate::serializer::diff::{self, DiffOptions, StateDiff};
use crate::serializer::storage;
use crate::types::{Hash, State, StateValue, WireFormat};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, trace};

/// Serializer statistics.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct SerializerStats {
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub hit_rate: f64,
    pub cache_size: usize,
    pub max_cache_size: usize,
    pub cache_bytes: usize,
    pub evictions: u64,
    pub expirations: u64,
    pub serializations: u64,
    pub deserializations: u64,
    pub diffs: u64,
}

struct SerializerInner {
    cache: SerializationCache,
    serializations: u64,
    deserializations: u64,
    diffs: u64,
}

/// Encodes states to wire formats and back, with a content-addressed cache.
///
/// All methods take `&self`; the cache and counters sit behind one lock
/// that is never held while encoding or decoding.
pub struct StateSerializer {
    config: SerializerConfig,
    inner: Mutex<SerializerInner>,
}

impl StateSerializer {
    pub fn new(config: SerializerConfig) -> Self {
        let cache = SerializationCache::new(config.max_cache_size, config.cache_ttl);
        Self {
            config,
            inner: Mutex::new(SerializerInner {
                cache,
                serializations: 0,
                deserializations: 0,
                diffs: 0,
            }),
        }
    }

    pub fn config(&self) -> &SerializerConfig {
        &self.config
    }

    /// Content hash of a state, independent of format and metadata.
    pub fn content_hash(&self, state: &State) -> Hash {
        codec::canonical_hash(state)
    }

    /// Serialize a state.
    ///
    /// With caching on, identical content returns the cached payload for the
    /// same format and metadata flag byte for byte.
    pub fn serialize(
        &self,
        state: &State,
        format: WireFormat,
        enable_cache: bool,
        include_metadata: bool,
    ) -> Result<Vec<u8>> {
        let variant = (format, include_metadata);
        let cache_enabled = {
            let mut inner = self.inner.lock();
            inner.serializations += 1;
            inner.cache.is_enabled()
        };

        let cached_hash = if enable_cache && cache_enabled {
            let hash = codec::canonical_hash(state);
            let lookup = self.inner.lock().cache.lookup(&hash, variant);
            match lookup {
                Lookup::Hit(payload) => {
                    trace!(%hash, %format, "serialization cache hit");
                    return Ok(payload);
                }
                Lookup::HitWithoutVariant => {
                    trace!(%hash, %format, "serialization cache hit, encoding new variant");
                }
                Lookup::Miss => trace!(%hash, %format, "serialization cache miss"),
            }
            Some(hash)
        } else {
            None
        };

        let payload = codec::encode_state(state, format, include_metadata, "serialize")?;

        if let Some(hash) = cached_hash {
            self.inner.lock().cache.insert(hash, variant, payload.clone());
        }
        Ok(payload)
    }

    /// Deserialize a payload into a state.
    ///
    /// When `expected_fields` is given, every missing field is reported in a
    /// single [`SyncError::MissingFields`].
    pub fn deserialize(
        &self,
        payload: &[u8],
        format: WireFormat,
        expected_fields: Option<&[&str]>,
    ) -> Result<State> {
        self.inner.lock().deserializations += 1;

        let state = codec::decode_state(payload, format, "deserialize")?;

        if let Some(expected) = expected_fields {
            let missing: Vec<String> = expected
                .iter()
                .filter(|field| !state.contains_key(**field))
                .map(|field| field.to_string())
                .collect();
            if !missing.is_empty() {
                return Err(SyncError::MissingFields {
                    operation: "deserialize",
                    missing,
                });
            }
        }

        Ok(state)
    }

    fn diff_options(&self) -> DiffOptions {
        DiffOptions {
            long_list_threshold: self.config.long_list_threshold,
            long_list_policy: self.config.long_list_policy,
        }
    }

    /// Structural diff from `old` to `new`.
    pub fn compute_diff(&self, old: &State, new: &State) -> StateDiff {
        self.inner.lock().diffs += 1;
        diff::compute_diff(old, new, self.diff_options())
    }

    /// Structural diff from `old` to `new`, encoded in `format`.
    pub fn serialize_diff(&self, old: &State, new: &State, format: WireFormat) -> Result<Vec<u8>> {
        let diff = self.compute_diff(old, new);
        debug!(
            added = diff.added.len(),
            modified = diff.modified.len(),
            removed = diff.removed.len(),
            "computed state diff"
        );
        codec::encode(&diff, format, "serialize_diff")
    }

    /// Decode a diff payload.
    pub fn decode_diff(&self, payload: &[u8], format: WireFormat) -> Result<StateDiff> {
        let value = codec::decode(payload, format, "decode_diff")?;
        StateDiff::from_wire(value, format, "decode_diff")
    }

    /// Apply an encoded diff to a copy of `base`.
    pub fn apply_diff(&self, base: &State, payload: &[u8], format: WireFormat) -> Result<State> {
        let value = codec::decode(payload, format, "apply_diff")?;
        let diff = StateDiff::from_wire(value, format, "apply_diff")?;
        Ok(diff.apply(base))
    }

    /// Lossy trimmed copy of `state` for storage backends.
    pub fn optimize_state_for_storage(&self, state: &State) -> State {
        storage::optimize_for_storage(
            state,
            self.config.max_stored_messages,
            self.config.max_stored_child_states,
        )
    }

    /// The structural equality primitive used by diffs and conflict detection.
    pub fn values_equal(&self, a: &StateValue, b: &StateValue) -> bool {
        diff::values_equal(a, b)
    }

    /// Whether a live cache entry exists for this content. Does not touch
    /// recency or counters.
    pub fn is_cached(&self, state: &State) -> bool {
        let hash = codec::canonical_hash(state);
        self.inner.lock().cache.contains(&hash)
    }

    pub fn get_performance_stats(&self) -> SerializerStats {
        let inner = self.inner.lock();
        let counters = inner.cache.counters;
        let lookups = counters.hits + counters.misses;
        SerializerStats {
            cache_hits: counters.hits,
            cache_misses: counters.misses,
            hit_rate: if lookups > 0 {
                counters.hits as f64 / lookups as f64
            } else {
                0.0
            },
            cache_size: inner.cache.len(),
            max_cache_size: inner.cache.max_size(),
            cache_bytes: inner.cache.size_bytes(),
            evictions: counters.evictions,
            expirations: counters.expirations,
            serializations: inner.serializations,
            deserializations: inner.deserializations,
            diffs: inner.diffs,
        }
    }

    /// Evict every cache entry and reset all counters.
    pub fn clear_cache(&self) {
        let mut inner = self.inner.lock();
        inner.cache.clear();
        inner.serializations = 0;
        inner.deserializations = 0;
        inner.diffs = 0;
        debug!("serialization cache cleared");
    }
}

impl Default for StateSerializer {
    fn default() -> Self {
        Self::new(SerializerConfig::default())
    }
}
