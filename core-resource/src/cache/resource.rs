use std::num::NonZeroUsize;

use bridge_traits::ResourceKey;
use lru::LruCache;

use super::entry::{CacheValue, CachedResource, Expiring};

/// Decoded bodies keyed by resource, bounded by LRU.
pub(crate) struct ResourceCache {
    entries: LruCache<ResourceKey, Expiring<CachedResource>>,
}

impl ResourceCache {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            entries: LruCache::new(capacity),
        }
    }

    /// `None` is a miss. Expired entries are evicted on read unless
    /// `ignore_expire` is set.
    pub fn get(&mut self, key: &ResourceKey, now: i64, ignore_expire: bool) -> Option<CachedResource> {
        let expired = self.entries.peek(key)?.is_expired(now);
        if expired && !ignore_expire {
            self.entries.pop(key);
            return None;
        }
        self.entries.get(key).map(|entry| entry.value.clone())
    }

    pub fn set(&mut self, key: ResourceKey, value: CachedResource, expires_at: i64) {
        self.entries.put(key, Expiring::new(value, expires_at));
    }

    /// Write a `Pending` marker unless a live entry exists. Returns whether
    /// the marker was written.
    pub fn claim(&mut self, key: &ResourceKey, now: i64, expires_at: i64) -> bool {
        if let Some(entry) = self.entries.peek(key) {
            if !entry.is_expired(now) {
                return false;
            }
        }
        self.entries
            .put(key.clone(), Expiring::new(CacheValue::Pending, expires_at));
        true
    }

    pub fn remove(&mut self, key: &ResourceKey) -> bool {
        self.entries.pop(key).is_some()
    }

    pub fn sweep(&mut self, now: i64) -> usize {
        let expired: Vec<ResourceKey> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            self.entries.pop(key);
        }
        expired.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
