//! Configuration for the serializer and state managers.

use crate::conflict::ResolutionStrategy;
use crate::error::{Result, SyncError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How diffs treat list fields longer than [`SerializerConfig::long_list_threshold`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LongListPolicy {
    /// Only an appended suffix is captured. Shrinks, reorders and in-place
    /// edits of long lists are dropped from the diff.
    #[default]
    AppendOnly,
    /// Long lists that are not strict extensions are replaced wholesale.
    FullReplace,
}

/// Serializer configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SerializerConfig {
    /// Maximum number of cached serializations. Zero disables the cache.
    pub max_cache_size: usize,

    /// Time-to-live of a cache entry, checked on read.
    #[serde(with = "duration_secs")]
    pub cache_ttl: Duration,

    /// Lists longer than this are diffed according to `long_list_policy`.
    pub long_list_threshold: usize,

    pub long_list_policy: LongListPolicy,

    /// Messages kept by storage optimization.
    pub max_stored_messages: usize,

    /// Child states kept by storage optimization.
    pub max_stored_child_states: usize,
}

impl Default for SerializerConfig {
    fn default() -> Self {
        Self {
            max_cache_size: 1000,
            cache_ttl: Duration::from_secs(3600),
            long_list_threshold: 100,
            long_list_policy: LongListPolicy::AppendOnly,
            max_stored_messages: 50,
            max_stored_child_states: 25,
        }
    }
}

impl SerializerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.cache_ttl.is_zero() && self.max_cache_size > 0 {
            return Err(SyncError::InvalidConfig(
                "cache_ttl must be non-zero when the cache is enabled".into(),
            ));
        }
        if self.max_stored_messages == 0 {
            return Err(SyncError::InvalidConfig(
                "max_stored_messages must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// State manager configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Reuse state objects per logical id.
    pub enable_pooling: bool,

    /// Maximum pooled objects before LRU eviction.
    pub max_pool_size: usize,

    /// Record field-level change history.
    pub track_changes: bool,

    /// Records kept per id in the history ring.
    pub history_limit: usize,

    /// Keep compressed states for memory accounting.
    pub cache_compressed: bool,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            enable_pooling: true,
            max_pool_size: 100,
            track_changes: true,
            history_limit: 50,
            cache_compressed: true,
        }
    }
}

impl ManagerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.enable_pooling && self.max_pool_size == 0 {
            return Err(SyncError::InvalidConfig(
                "max_pool_size must be at least 1 when pooling is enabled".into(),
            ));
        }
        if self.track_changes && self.history_limit == 0 {
            return Err(SyncError::InvalidConfig(
                "history_limit must be at least 1 when change tracking is enabled".into(),
            ));
        }
        Ok(())
    }
}

/// Conflict-resolving manager configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct EnhancedConfig {
    pub strategy: ResolutionStrategy,

    /// Conflicts kept in the in-memory log; oldest are dropped.
    pub max_conflict_history: usize,

    /// Versions kept; oldest are dropped. Version ids stay monotonic.
    pub max_versions: usize,
}

impl Default for EnhancedConfig {
    fn default() -> Self {
        Self {
            strategy: ResolutionStrategy::LastWriteWins,
            max_conflict_history: 1000,
            max_versions: 256,
        }
    }
}

impl EnhancedConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_versions == 0 {
            return Err(SyncError::InvalidConfig(
                "max_versions must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Aggregate configuration for a [`crate::SyncRegistry`].
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub serializer: SerializerConfig,
    pub manager: ManagerConfig,
    pub enhanced: EnhancedConfig,
}

impl SyncConfig {
    pub fn validate(&self) -> Result<()> {
        self.serializer.validate()?;
        self.manager.validate()?;
        self.enhanced.validate()
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}
