//! Layered in-memory cache shared by every consumer in the process.
//!
//! Five stores sit behind one [`LayeredCache`]:
//!
//! - resource bodies, bounded by LRU, with a three-state slot ([`CacheValue`])
//! - search pages per list, expiring per list
//! - a temporary overlay of just-published items per list
//! - tombstones for resources deleted in this session
//! - the publish cache, optionally persisted to a [`KeyValueStore`]
//!
//! Reads never fail. A missing or expired entry is a miss.

mod entry;
mod publish;
mod resource;
mod search;
mod stats;
mod tombstones;

pub use entry::{CacheValue, CachedResource, ResolvedResource, ResourceData, ReturnType};
pub use publish::{publish_storage_key, PublishRecord};
pub use search::search_cache_key;
pub use stats::CacheStats;

use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use bridge_traits::{Clock, KeyValueStore, KeyValueStoreExt, QdnMetadata, ResourceKey};
use core_runtime::events::{CacheEvent, CoreEvent, EventBus};
use parking_lot::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::config::ResourceConfig;
use crate::error::Result;
use entry::expiry_after;
use publish::PublishCache;
use resource::ResourceCache;
use search::{SearchCache, SearchLookup};
use stats::StatsCounters;
use tombstones::Tombstones;

#[derive(Debug, Clone, Copy)]
struct CacheTtls {
    resource: Duration,
    search: Duration,
    publish: Duration,
    tombstone: Duration,
    temporary: Duration,
    publish_persist_window: Duration,
}

pub struct LayeredCache {
    ttls: CacheTtls,
    clock: Arc<dyn Clock>,
    resources: Mutex<ResourceCache>,
    searches: Mutex<SearchCache>,
    tombstones: Mutex<Tombstones>,
    publishes: Mutex<PublishCache>,
    counters: StatsCounters,
    event_bus: Option<EventBus>,
}

impl LayeredCache {
    pub fn new(config: &ResourceConfig, clock: Arc<dyn Clock>) -> Self {
        let capacity = NonZeroUsize::new(config.resource_cache_capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            ttls: CacheTtls {
                resource: config.resource_ttl,
                search: config.search_ttl,
                publish: config.publish_ttl,
                tombstone: config.tombstone_ttl,
                temporary: config.temporary_ttl,
                publish_persist_window: config.publish_persist_window,
            },
            clock,
            resources: Mutex::new(ResourceCache::new(capacity)),
            searches: Mutex::new(SearchCache::default()),
            tombstones: Mutex::new(Tombstones::default()),
            publishes: Mutex::new(PublishCache::default()),
            counters: StatsCounters::default(),
            event_bus: None,
        }
    }

    pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    fn now(&self) -> i64 {
        self.clock.unix_timestamp_millis()
    }

    fn emit(&self, event: CacheEvent) {
        if let Some(bus) = &self.event_bus {
            let _ = bus.emit(CoreEvent::Cache(event));
        }
    }

    // ------------------------------------------------------------------
    // Resource bodies
    // ------------------------------------------------------------------

    /// `None` on a miss. Expired entries are evicted unless `ignore_expire`.
    pub fn get_resource(&self, key: &ResourceKey, ignore_expire: bool) -> Option<CachedResource> {
        let value = self.resources.lock().get(key, self.now(), ignore_expire);
        self.counters.resource(value.is_some());
        value
    }

    /// Write a body or marker. `ttl` defaults to the resource TTL.
    pub fn set_resource(&self, key: ResourceKey, value: CachedResource, ttl: Option<Duration>) {
        let expires_at = expiry_after(self.now(), ttl.unwrap_or(self.ttls.resource));
        self.resources.lock().set(key, value, expires_at);
    }

    /// Atomically mark `key` as being fetched. Returns `false` if a live
    /// entry (pending, absent or present) already exists.
    pub fn claim_resource(&self, key: &ResourceKey) -> bool {
        let now = self.now();
        self.resources
            .lock()
            .claim(key, now, expiry_after(now, self.ttls.resource))
    }

    pub fn remove_resource(&self, key: &ResourceKey) -> bool {
        self.resources.lock().remove(key)
    }

    // ------------------------------------------------------------------
    // Search pages
    // ------------------------------------------------------------------

    pub fn get_search(&self, list_name: &str, cache_key: &str) -> Option<Vec<QdnMetadata>> {
        let lookup = self.searches.lock().get(list_name, cache_key, self.now());
        match lookup {
            SearchLookup::Hit(items) => {
                self.counters.search(true);
                Some(items)
            }
            SearchLookup::Miss => {
                self.counters.search(false);
                None
            }
            SearchLookup::Expired => {
                self.counters.search(false);
                debug!(list = list_name, "Search list expired");
                self.emit(CacheEvent::ListExpired {
                    list_name: list_name.to_string(),
                });
                None
            }
        }
    }

    pub fn set_search(
        &self,
        list_name: &str,
        cache_key: String,
        items: Vec<QdnMetadata>,
        ttl: Option<Duration>,
    ) {
        let expires_at = expiry_after(self.now(), ttl.unwrap_or(self.ttls.search));
        self.searches
            .lock()
            .set(list_name, cache_key, items, expires_at);
    }

    /// Whether a scroll offset saved against `list_name` still matches its
    /// content.
    pub fn is_list_expired(&self, list_name: &str) -> bool {
        self.searches.lock().is_list_expired(list_name, self.now())
    }

    pub fn invalidate_list(&self, list_name: &str) -> bool {
        self.searches.lock().invalidate(list_name)
    }

    // ------------------------------------------------------------------
    // Temporary overlay
    // ------------------------------------------------------------------

    /// Show `items` in `list_name` right away, ahead of the cached pages.
    pub fn add_temporary_resources(
        &self,
        list_name: &str,
        items: Vec<QdnMetadata>,
        ttl: Option<Duration>,
    ) {
        let count = items.len();
        let expires_at = expiry_after(self.now(), ttl.unwrap_or(self.ttls.temporary));
        self.searches
            .lock()
            .add_temporary(list_name, items, expires_at);
        self.emit(CacheEvent::TemporaryAdded {
            list_name: list_name.to_string(),
            count,
        });
    }

    pub fn temporary_resources(&self, list_name: &str) -> Vec<QdnMetadata> {
        self.searches.lock().temporary(list_name, self.now())
    }

    // ------------------------------------------------------------------
    // Tombstones
    // ------------------------------------------------------------------

    pub fn mark_deleted<I>(&self, keys: I)
    where
        I: IntoIterator<Item = ResourceKey>,
    {
        let now = self.now();
        self.tombstones
            .lock()
            .mark(keys, now, expiry_after(now, self.ttls.tombstone));
    }

    pub fn is_deleted(&self, key: &ResourceKey) -> bool {
        self.tombstones.lock().is_deleted(key, self.now())
    }

    pub fn filter_deleted(&self, items: Vec<QdnMetadata>) -> Vec<QdnMetadata> {
        let now = self.now();
        let tombstones = self.tombstones.lock();
        items
            .into_iter()
            .filter(|item| !tombstones.is_deleted(&item.key(), now))
            .collect()
    }

    /// Everything a list view shows: live overlay items first, then `items`,
    /// without duplicates, placeholders or tombstoned keys.
    pub fn render_list(&self, list_name: &str, items: Vec<QdnMetadata>) -> Vec<QdnMetadata> {
        let overlay = self.temporary_resources(list_name);

        let mut merged: Vec<QdnMetadata> = Vec::with_capacity(overlay.len() + items.len());
        for item in overlay.into_iter().chain(items) {
            if item.is_placeholder() {
                continue;
            }
            let key = item.key();
            match merged.iter_mut().find(|existing| existing.key() == key) {
                Some(existing) => {
                    if item.created > existing.created {
                        *existing = item;
                    }
                }
                None => merged.push(item),
            }
        }
        self.filter_deleted(merged)
    }

    // ------------------------------------------------------------------
    // Publish cache
    // ------------------------------------------------------------------

    pub fn get_publish(&self, key: &ResourceKey) -> Option<PublishRecord> {
        self.publishes.lock().get(key, self.now())
    }

    pub fn set_publish(&self, metadata: QdnMetadata, data: ResourceData) {
        let now = self.now();
        let record = PublishRecord {
            qortal_metadata: metadata,
            data,
            timestamp: now,
        };
        self.publishes
            .lock()
            .set(record, expiry_after(now, self.ttls.publish));
    }

    pub fn remove_publish(&self, key: &ResourceKey) -> bool {
        self.publishes.lock().remove(key)
    }

    /// Write live publish records to `store` as a JSON array.
    #[instrument(skip(self, store))]
    pub async fn persist_publish_cache(
        &self,
        store: &dyn KeyValueStore,
        username: &str,
        app_name_hashed: &str,
    ) -> Result<usize> {
        let records = self.publishes.lock().records(self.now());
        let key = publish_storage_key(username, app_name_hashed);
        store.set_json(&key, &records).await?;
        debug!(count = records.len(), "Persisted publish cache");
        Ok(records.len())
    }

    /// Load records persisted by [`persist_publish_cache`](Self::persist_publish_cache),
    /// keeping only those inside the freshness window. Corrupt data is
    /// discarded rather than reported.
    #[instrument(skip(self, store))]
    pub async fn restore_publish_cache(
        &self,
        store: &dyn KeyValueStore,
        username: &str,
        app_name_hashed: &str,
    ) -> Result<usize> {
        let key = publish_storage_key(username, app_name_hashed);
        let records: Vec<PublishRecord> = match store.get_json(&key).await {
            Ok(Some(records)) => records,
            Ok(None) => return Ok(0),
            Err(e) => {
                warn!(error = %e, "Discarding unreadable publish cache");
                store.delete(&key).await?;
                return Ok(0);
            }
        };

        let now = self.now();
        let window = expiry_after(0, self.ttls.publish_persist_window);
        let fresh: Vec<PublishRecord> = records
            .into_iter()
            .filter(|record| now - record.timestamp <= window)
            .collect();

        let count = fresh.len();
        {
            let mut publishes = self.publishes.lock();
            for record in fresh {
                let expires_at = record.timestamp.saturating_add(window);
                publishes.set(record, expires_at);
            }
        }
        debug!(count, "Restored publish cache");
        Ok(count)
    }

    // ------------------------------------------------------------------
    // Maintenance
    // ------------------------------------------------------------------

    /// Sweep every expiring store. Returns the number of entries removed.
    pub fn clear_expired(&self) -> usize {
        let now = self.now();
        let removed = self.resources.lock().sweep(now)
            + self.searches.lock().sweep(now)
            + self.tombstones.lock().prune(now)
            + self.publishes.lock().sweep(now);

        if removed > 0 {
            info!(removed, "Swept expired cache entries");
            self.emit(CacheEvent::ExpiredSwept { removed });
        }
        removed
    }

    /// Forget `keys` everywhere and hide them from lists until the
    /// tombstones expire.
    pub fn record_deletion(&self, keys: &[ResourceKey]) {
        self.mark_deleted(keys.iter().cloned());
        {
            let mut publishes = self.publishes.lock();
            for key in keys {
                publishes.remove(key);
            }
        }
        self.emit(CacheEvent::ResourcesDeleted {
            keys: keys.to_vec(),
        });
    }

    pub fn stats(&self) -> CacheStats {
        let resource_entries = self.resources.lock().len();
        let tombstones = self.tombstones.lock().len();
        self.counters.snapshot(resource_entries, tombstones)
    }
}

/// Identifiers already present in `items`, for cross-page deduplication.
pub fn identifiers_of(items: &[QdnMetadata]) -> HashSet<String> {
    items.iter().map(|item| item.identifier.clone()).collect()
}
