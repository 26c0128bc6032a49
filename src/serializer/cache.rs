//! Content-addressed serialization cache with LRU and TTL eviction.

use crate::types::{Hash, WireFormat};
use lru::LruCache;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};
use tracing::trace;

/// Cached payload variant: wire format plus metadata flag.
pub type VariantKey = (WireFormat, bool);

/// One memoized serialization result.
///
/// Entries are keyed by content hash, so every format and metadata flag
/// for the same content shares one entry.
#[derive(Clone, Debug)]
pub struct CacheEntry {
    pub hash: Hash,
    payloads: HashMap<VariantKey, Vec<u8>>,
    pub created_at: Instant,
    pub access_count: u64,
    pub last_access: Instant,
}

impl CacheEntry {
    fn new(hash: Hash) -> Self {
        let now = Instant::now();
        Self {
            hash,
            payloads: HashMap::new(),
            created_at: now,
            access_count: 0,
            last_access: now,
        }
    }

    pub fn payload(&self, variant: VariantKey) -> Option<&[u8]> {
        self.payloads.get(&variant).map(Vec::as_slice)
    }

    pub fn size_bytes(&self) -> usize {
        self.payloads.values().map(Vec::len).sum()
    }

    fn is_expired(&self, ttl: Duration, now: Instant) -> bool {
        now.duration_since(self.created_at) > ttl
    }
}

/// Result of a cache lookup.
#[derive(Debug)]
pub enum Lookup {
    /// Live entry holding the requested variant.
    Hit(Vec<u8>),
    /// Live entry for the content, but not yet encoded in this variant.
    HitWithoutVariant,
    Miss,
}

/// Counters kept next to the cache table.
#[derive(Clone, Copy, Debug, Default)]
pub struct CacheCounters {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
}

/// LRU table of serialization results with lazy TTL expiry.
///
/// Not synchronized; the serializer wraps it in its own lock.
pub struct SerializationCache {
    entries: Option<LruCache<Hash, CacheEntry>>,
    max_size: usize,
    ttl: Duration,
    pub counters: CacheCounters,
}

impl SerializationCache {
    /// A zero `max_size` disables caching entirely.
    pub fn new(max_size: usize, ttl: Duration) -> Self {
        Self {
            entries: NonZeroUsize::new(max_size).map(LruCache::new),
            max_size,
            ttl,
            counters: CacheCounters::default(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.entries.is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.as_ref().map_or(0, LruCache::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Look up an entry, purging it if its TTL has elapsed.
    ///
    /// A live entry counts as a hit and has its recency, access count and
    /// last-access time refreshed.
    pub fn lookup(&mut self, hash: &Hash, variant: VariantKey) -> Lookup {
        let Some(entries) = self.entries.as_mut() else {
            return Lookup::Miss;
        };

        let now = Instant::now();
        let expired = match entries.peek(hash) {
            Some(entry) => entry.is_expired(self.ttl, now),
            None => {
                self.counters.misses += 1;
                return Lookup::Miss;
            }
        };

        if expired {
            entries.pop(hash);
            self.counters.expirations += 1;
            self.counters.misses += 1;
            trace!(%hash, "serialization cache entry expired");
            return Lookup::Miss;
        }

        self.counters.hits += 1;
        match entries.get_mut(hash) {
            Some(entry) => {
                entry.access_count += 1;
                entry.last_access = now;
                match entry.payload(variant) {
                    Some(payload) => Lookup::Hit(payload.to_vec()),
                    None => Lookup::HitWithoutVariant,
                }
            }
            None => Lookup::Miss,
        }
    }

    /// Store a payload variant, creating the entry if needed and evicting the
    /// least recently used entry at capacity.
    pub fn insert(&mut self, hash: Hash, variant: VariantKey, payload: Vec<u8>) {
        let Some(entries) = self.entries.as_mut() else {
            return;
        };

        if let Some(entry) = entries.get_mut(&hash) {
            entry.payloads.insert(variant, payload);
            return;
        }

        let mut entry = CacheEntry::new(hash);
        entry.payloads.insert(variant, payload);
        if let Some((evicted, _)) = entries.push(hash, entry) {
            if evicted != hash {
                self.counters.evictions += 1;
                trace!(hash = %evicted, "serialization cache evicted LRU entry");
            }
        }
    }

    /// Check for a live entry without touching recency or counters.
    pub fn contains(&self, hash: &Hash) -> bool {
        self.entries
            .as_ref()
            .and_then(|entries| entries.peek(hash))
            .is_some_and(|entry| !entry.is_expired(self.ttl, Instant::now()))
    }

    pub fn peek(&self, hash: &Hash) -> Option<&CacheEntry> {
        self.entries.as_ref().and_then(|entries| entries.peek(hash))
    }

    pub fn size_bytes(&self) -> usize {
        self.entries
            .as_ref()
            .map_or(0, |entries| entries.iter().map(|(_, e)| e.size_bytes()).sum())
    }

    /// Evict everything and reset counters.
    pub fn clear(&mut self) {
        if let Some(entries) = self.entries.as_mut() {
            entries.clear();
        }
        self.counters = CacheCounters::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const JSON: VariantKey = (WireFormat::Json, false);

    fn hash(n: u8) -> Hash {
        Hash::from_bytes(&[n])
    }

    #[test]
    fn test_hit_and_miss() {
        let mut cache = SerializationCache::new(4, Duration::from_secs(60));
        assert!(matches!(cache.lookup(&hash(1), JSON), Lookup::Miss));

        cache.insert(hash(1), JSON, b"one".to_vec());
        match cache.lookup(&hash(1), JSON) {
            Lookup::Hit(payload) => assert_eq!(payload, b"one"),
            other => panic!("expected hit, got {:?}", other),
        }
        assert_eq!(cache.counters.hits, 1);
        assert_eq!(cache.counters.misses, 1);
        assert_eq!(cache.peek(&hash(1)).unwrap().access_count, 1);
    }

    #[test]
    fn test_other_variant_shares_entry() {
        let mut cache = SerializationCache::new(4, Duration::from_secs(60));
        cache.insert(hash(1), JSON, b"one".to_vec());

        let binary = (WireFormat::MessagePack, false);
        assert!(matches!(cache.lookup(&hash(1), binary), Lookup::HitWithoutVariant));
        cache.insert(hash(1), binary, vec![0x81]);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.peek(&hash(1)).unwrap().size_bytes(), 4);
    }

    #[test]
    fn test_lru_eviction() {
        let mut cache = SerializationCache::new(2, Duration::from_secs(60));
        cache.insert(hash(1), JSON, vec![1]);
        cache.insert(hash(2), JSON, vec![2]);

        // Touch 1 so 2 becomes least recently used.
        cache.lookup(&hash(1), JSON);
        cache.insert(hash(3), JSON, vec![3]);

        assert_eq!(cache.len(), 2);
        assert!(cache.contains(&hash(1)));
        assert!(!cache.contains(&hash(2)));
        assert!(cache.contains(&hash(3)));
        assert_eq!(cache.counters.evictions, 1);
    }

    #[test]
    fn test_ttl_expiry_is_lazy() {
        let mut cache = SerializationCache::new(4, Duration::from_millis(20));
        cache.insert(hash(1), JSON, vec![1]);
        std::thread::sleep(Duration::from_millis(40));

        // Still occupying a slot until read.
        assert_eq!(cache.len(), 1);
        assert!(matches!(cache.lookup(&hash(1), JSON), Lookup::Miss));
        assert_eq!(cache.len(), 0);
        assert_eq!(cache.counters.expirations, 1);
    }

    #[test]
    fn test_zero_capacity_disables_cache() {
        let mut cache = SerializationCache::new(0, Duration::from_secs(60));
        assert!(!cache.is_enabled());
        cache.insert(hash(1), JSON, vec![1]);
        assert!(matches!(cache.lookup(&hash(1), JSON), Lookup::Miss));
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_clear_resets_counters() {
        let mut cache = SerializationCache::new(4, Duration::from_secs(60));
        cache.insert(hash(1), JSON, vec![1]);
        cache.lookup(&hash(1), JSON);
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.counters.hits, 0);
    }
}
