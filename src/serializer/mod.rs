//! State serialization with caching and differential encoding.
//!
//! States are encoded as pretty JSON, compact JSON or MessagePack. Encoded
//! payloads are cached by content hash with LRU and TTL eviction, and
//! structural diffs let callers ship only what changed between snapshots.

mod cache;
mod codec;
mod diff;
mod state_serializer;
mod storage;

pub use cache::{CacheCounters, CacheEntry, Lookup, SerializationCache, VariantKey};
pub use codec::{EncoderMetadata, SERIALIZER_VERSION};
pub use diff::{states_equal, values_equal, FieldChange, StateDiff};
pub use state_serializer::{SerializerStats, StateSerializer};
pub use storage::ACCUMULATOR_KEYS;
