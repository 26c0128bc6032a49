//! # statesync
//!
//! State synchronization for agent workflows: a content-addressed
//! serialization cache with delta encoding, a pooling state manager with
//! incremental updates, and conflict resolution between divergent snapshots.
//!
//! ## Core Concepts
//!
//! - **Serializer**: Encodes states as JSON or MessagePack, caching payloads
//!   by content hash with LRU and TTL eviction
//! - **Diffs**: Structural per-key deltas where list growth is sent as an
//!   appended suffix
//! - **Pooling**: One live object per logical state id, updated in place
//! - **Conflicts**: Per-field divergence detection with pluggable resolvers
//!
//! ## Example
//!
//! ```ignore
//! use statesync::{state_from_json, SyncConfig, SyncRegistry, WireFormat};
//!
//! let registry = SyncRegistry::new(SyncConfig::default())?;
//!
//! let old = state_from_json(json!({"a": 1, "b": [1, 2]}));
//! let new = state_from_json(json!({"a": 2, "b": [1, 2, 3]}));
//!
//! // Ship only the delta
//! let delta = registry.serializer().serialize_diff(&old, &new, WireFormat::CompactJson)?;
//! assert_eq!(registry.serializer().apply_diff(&old, &delta, WireFormat::CompactJson)?, new);
//!
//! // Pool a live state and update it in place
//! let live = registry.manager().create_state("run-1", old);
//! registry.manager().update_state_incremental("run-1", &live, new);
//! ```

pub mod config;
pub mod conflict;
pub mod error;
pub mod manager;
pub mod registry;
pub mod serializer;
pub mod types;

// Re-exports
pub use config::{EnhancedConfig, LongListPolicy, ManagerConfig, SerializerConfig, SyncConfig};
pub use conflict::{
    Conflict, ConflictResolver, ConflictType, EnhancedStateManager, FieldDifference,
    ResolutionContext, ResolutionStrategy, StateVersion,
};
pub use error::{Result, SyncError};
pub use manager::{
    ChangeHistory, ManagerStats, MemoryStats, OptimizedStateManager, StateUpdate, UpdateKind,
};
pub use registry::SyncRegistry;
pub use serializer::{FieldChange, SerializerStats, StateDiff, StateSerializer};
pub use types::*;
