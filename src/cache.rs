//! Short-TTL memoization of decoded resolutions.
//!
//! Keyed by `(provider_id, content_ref)`, this absorbs duplicate bursts of
//! the same reference without repeating the chain walk. Writes are
//! first-finisher-wins: concurrent duplicate resolutions are allowed to
//! race, since the chain walk is idempotent and re-running it is cheaper
//! than a stalled critical section. Expired entries are swept on insert so
//! the store cannot grow without bound.

use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::decode::DecodedResolution;

struct CacheEntry {
    decoded: DecodedResolution,
    inserted: Instant,
}

/// TTL-indexed store of [`DecodedResolution`]s owned by the resolver.
pub struct DecodeCache {
    entries: DashMap<String, CacheEntry>,
    ttl: Duration,
}

impl DecodeCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// Fetch a live entry, if any.
    pub fn get(&self, key: &str) -> Option<DecodedResolution> {
        let entry = self.entries.get(key)?;
        if entry.inserted.elapsed() < self.ttl {
            Some(entry.decoded.clone())
        } else {
            None
        }
    }

    /// Insert unless a live entry already exists (first finisher wins),
    /// sweeping expired entries while holding no entry lock.
    pub fn insert(&self, key: &str, decoded: DecodedResolution) {
        self.entries.retain(|_, entry| entry.inserted.elapsed() < self.ttl);
        match self.entries.entry(key.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(mut occupied)
                if occupied.get().inserted.elapsed() >= self.ttl =>
            {
                occupied.insert(CacheEntry {
                    decoded,
                    inserted: Instant::now(),
                });
            }
            dashmap::mapref::entry::Entry::Occupied(_) => {}
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(CacheEntry {
                    decoded,
                    inserted: Instant::now(),
                });
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
