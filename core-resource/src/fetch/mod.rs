//! Fetch orchestration: bodies through the request queues, search pages
//! through the bridge, deletions as bulk placeholder publishes.

mod priority;
mod search;

pub use priority::{EntityQuery, PriorityPage, PriorityRequest, PrioritySource, SourceQuery};
pub use search::FetchOptions;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bridge_traits::{
    PublishResource, QdnBridge, QdnBridgeExt, QdnMetadata, ResourceKey, SearchParams,
};
use core_encoding::base64_utf8_to_object;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::cache::{
    CacheValue, CachedResource, LayeredCache, ResolvedResource, ResourceData, ReturnType,
};
use crate::config::ResourceConfig;
use crate::error::{ResourceError, Result};
use crate::gateway::GatewayClient;
use crate::queue::RequestQueue;
use priority::SourceCursor;

/// Result of an individual body fetch.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    Ready(Arc<ResolvedResource>),
    /// The body could not be fetched or decoded; cached until the entry expires.
    Unavailable,
    /// Another caller is already fetching this key.
    InFlight,
    /// A newer request for the same key, or a queue reset, superseded this one.
    Canceled,
}

impl FetchOutcome {
    fn from_cached(cached: CachedResource) -> Self {
        match cached {
            CacheValue::Present(resource) => FetchOutcome::Ready(resource),
            CacheValue::Absent => FetchOutcome::Unavailable,
            CacheValue::Pending => FetchOutcome::InFlight,
        }
    }

    pub fn ready(self) -> Option<Arc<ResolvedResource>> {
        match self {
            FetchOutcome::Ready(resource) => Some(resource),
            _ => None,
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, FetchOutcome::Ready(_))
    }
}

struct InFlight {
    id: u64,
    token: CancellationToken,
}

struct FetcherInner {
    bridge: Arc<dyn QdnBridge>,
    gateway: GatewayClient,
    cache: Arc<LayeredCache>,
    primary: RequestQueue,
    backup: RequestQueue,
    in_flight: Mutex<HashMap<ResourceKey, InFlight>>,
    cursors: Mutex<HashMap<(String, String), SourceCursor>>,
    next_fetch_id: AtomicU64,
    config: ResourceConfig,
    warm_cache: bool,
}

#[derive(Clone)]
pub struct ResourceFetcher {
    inner: Arc<FetcherInner>,
}

impl ResourceFetcher {
    pub fn new(
        bridge: Arc<dyn QdnBridge>,
        gateway: GatewayClient,
        cache: Arc<LayeredCache>,
        config: ResourceConfig,
    ) -> Self {
        Self {
            inner: Arc::new(FetcherInner {
                bridge,
                gateway,
                cache,
                primary: RequestQueue::new("primary", config.primary_concurrency),
                backup: RequestQueue::new("backup", config.backup_concurrency),
                in_flight: Mutex::new(HashMap::new()),
                cursors: Mutex::new(HashMap::new()),
                next_fetch_id: AtomicU64::new(1),
                config,
                warm_cache: true,
            }),
        }
    }

    /// Whether search results trigger background body fetches. Must be
    /// called before the fetcher is cloned.
    pub fn with_cache_warming(mut self, enabled: bool) -> Self {
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.warm_cache = enabled;
        }
        self
    }

    pub fn cache(&self) -> &Arc<LayeredCache> {
        &self.inner.cache
    }

    pub fn gateway(&self) -> &GatewayClient {
        &self.inner.gateway
    }

    pub fn primary_queue(&self) -> &RequestQueue {
        &self.inner.primary
    }

    pub fn backup_queue(&self) -> &RequestQueue {
        &self.inner.backup
    }

    /// Fetch and decode one resource body, served from cache when possible.
    ///
    /// Concurrent calls for the same key share one network fetch: later
    /// callers get [`FetchOutcome::InFlight`] while the first is pending.
    #[instrument(skip(self, key), fields(key = %key))]
    pub async fn fetch_individual(
        &self,
        key: &ResourceKey,
        return_type: ReturnType,
        include_metadata: bool,
    ) -> Result<FetchOutcome> {
        validate_fetch_key(key)?;

        if let Some(cached) = self.inner.cache.get_resource(key, false) {
            debug!("Resource cache hit");
            return Ok(FetchOutcome::from_cached(cached));
        }
        if !self.inner.cache.claim_resource(key) {
            return Ok(FetchOutcome::InFlight);
        }
        Ok(self.inner.resolve(key, return_type, include_metadata).await)
    }

    /// Fetch `key` again, cancelling any fetch already in flight for it.
    #[instrument(skip(self, key), fields(key = %key))]
    pub async fn refetch_individual(
        &self,
        key: &ResourceKey,
        return_type: ReturnType,
        include_metadata: bool,
    ) -> Result<FetchOutcome> {
        validate_fetch_key(key)?;
        self.inner
            .cache
            .set_resource(key.clone(), CacheValue::Pending, None);
        Ok(self.inner.resolve(key, return_type, include_metadata).await)
    }

    /// Cancel every body fetch in flight and drop those still queued.
    ///
    /// Registrations stay in place so each cancelled fetch still owns, and
    /// clears, its pending marker.
    pub fn cancel_all(&self) {
        let cleared = self.inner.primary.clear() + self.inner.backup.clear();
        let cancelled = {
            let in_flight = self.inner.in_flight.lock();
            for fetch in in_flight.values() {
                fetch.token.cancel();
            }
            in_flight.len()
        };
        debug!(cleared, cancelled, "Cancelled pending body fetches");
    }

    /// Delete resources by publishing a zero-length placeholder over each,
    /// in one bulk bridge call.
    ///
    /// On success every key is tombstoned and dropped from the publish cache.
    /// On failure nothing is recorded.
    #[instrument(skip(self, keys), fields(count = keys.len()))]
    pub async fn delete_resources(&self, keys: &[ResourceKey]) -> Result<()> {
        if let Some(incomplete) = keys.iter().find(|key| !key.is_complete()) {
            return Err(ResourceError::InvalidArgument(format!(
                "cannot delete `{}`: service, name and identifier are required",
                incomplete
            )));
        }
        if keys.is_empty() {
            return Ok(());
        }

        let placeholders: Vec<PublishResource> =
            keys.iter().map(PublishResource::placeholder).collect();
        self.inner
            .bridge
            .publish_multiple(placeholders, Some(self.inner.config.publish_timeout))
            .await?;

        for key in keys {
            self.inner
                .cache
                .set_resource(key.clone(), CacheValue::Absent, None);
        }
        self.inner.cache.record_deletion(keys);
        info!(count = keys.len(), "Deleted resources");
        Ok(())
    }

    /// Fire-and-forget body fetches for items not yet cached.
    fn warm(&self, items: &[QdnMetadata], return_type: ReturnType) {
        if !self.inner.warm_cache {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        for item in items {
            let key = item.key();
            if self.inner.cache.get_resource(&key, false).is_some() {
                continue;
            }
            let fetcher = self.clone();
            runtime.spawn(async move {
                if let Err(e) = fetcher.fetch_individual(&key, return_type, false).await {
                    debug!(key = %key, error = %e, "Cache warming skipped resource");
                }
            });
        }
    }

    /// Listed results drop placeholders and oversized resources.
    fn accept(&self, item: &QdnMetadata) -> bool {
        !item.is_placeholder() && item.size < self.inner.config.max_resource_size
    }
}

fn validate_fetch_key(key: &ResourceKey) -> Result<()> {
    if key.name.trim().is_empty() {
        return Err(ResourceError::InvalidArgument(format!(
            "cannot fetch `{}`: name is required",
            key
        )));
    }
    Ok(())
}

impl FetcherInner {
    fn register(&self, key: &ResourceKey) -> (u64, CancellationToken) {
        let id = self.next_fetch_id.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        let previous = self.in_flight.lock().insert(
            key.clone(),
            InFlight {
                id,
                token: token.clone(),
            },
        );
        if let Some(previous) = previous {
            debug!(key = %key, "Superseding in-flight fetch");
            previous.token.cancel();
        }
        (id, token)
    }

    /// Drop the registration if it is still ours. Returns whether it was.
    fn unregister(&self, key: &ResourceKey, id: u64) -> bool {
        let mut in_flight = self.in_flight.lock();
        if in_flight.get(key).is_some_and(|fetch| fetch.id == id) {
            in_flight.remove(key);
            true
        } else {
            false
        }
    }

    async fn resolve(
        &self,
        key: &ResourceKey,
        return_type: ReturnType,
        include_metadata: bool,
    ) -> FetchOutcome {
        let (id, token) = self.register(key);
        let outcome = self
            .resolve_with(key, return_type, include_metadata, &token)
            .await;
        let owned = self.unregister(key, id);

        if outcome == FetchOutcome::Canceled && owned {
            // Nobody else will settle the pending marker.
            self.cache.remove_resource(key);
        }
        outcome
    }

    async fn resolve_with(
        &self,
        key: &ResourceKey,
        return_type: ReturnType,
        include_metadata: bool,
        token: &CancellationToken,
    ) -> FetchOutcome {
        let metadata = if include_metadata {
            let lookup = tokio::select! {
                _ = token.cancelled() => return FetchOutcome::Canceled,
                lookup = self.bridge.search_resources(SearchParams::exact(key)) => lookup,
            };
            match lookup {
                Ok(items) => match items.into_iter().find(|item| item.key() == *key) {
                    Some(item) if item.is_placeholder() => {
                        debug!(key = %key, "Resource was deleted");
                        self.cache.set_resource(key.clone(), CacheValue::Absent, None);
                        return FetchOutcome::Unavailable;
                    }
                    found => found,
                },
                Err(e) => {
                    warn!(key = %key, error = %e, "Metadata lookup failed, fetching body anyway");
                    None
                }
            }
        } else {
            None
        };

        let body = match self.fetch_body(key, token).await {
            Ok(body) => body,
            Err(e) if e.is_cancelled() => return FetchOutcome::Canceled,
            Err(e) => {
                warn!(key = %key, error = %e, "Resource unavailable");
                self.cache.set_resource(key.clone(), CacheValue::Absent, None);
                return FetchOutcome::Unavailable;
            }
        };

        let data = match return_type {
            ReturnType::Base64 => ResourceData::Base64(body),
            ReturnType::Json => match base64_utf8_to_object::<serde_json::Value>(&body) {
                Ok(value) => ResourceData::Json(value),
                Err(e) => {
                    warn!(key = %key, error = %e, "Resource body is not valid JSON");
                    self.cache.set_resource(key.clone(), CacheValue::Absent, None);
                    return FetchOutcome::Unavailable;
                }
            },
        };

        if token.is_cancelled() {
            return FetchOutcome::Canceled;
        }

        let resolved = Arc::new(ResolvedResource {
            key: key.clone(),
            metadata: metadata.clone(),
            data: data.clone(),
        });
        self.cache
            .set_resource(key.clone(), CacheValue::Present(Arc::clone(&resolved)), None);
        let publish_metadata = metadata.unwrap_or_else(|| QdnMetadata::new(key.clone(), 0, 0));
        self.cache.set_publish(publish_metadata, data);

        FetchOutcome::Ready(resolved)
    }

    /// One attempt on the primary queue, then up to `body_retry_attempts`
    /// on the backup queue, each after `body_retry_delay`.
    async fn fetch_body(&self, key: &ResourceKey, token: &CancellationToken) -> Result<String> {
        let mut attempt: u32 = 0;
        loop {
            let queue = if attempt == 0 { &self.primary } else { &self.backup };
            let gateway = self.gateway.clone();
            let queued_key = key.clone();
            let queued_token = token.clone();
            let handle = queue.enqueue(move || async move {
                tokio::select! {
                    _ = queued_token.cancelled() => Err(ResourceError::Cancelled),
                    body = gateway.fetch_body_base64(&queued_key) => body,
                }
            });

            let result = tokio::select! {
                _ = token.cancelled() => return Err(ResourceError::Cancelled),
                result = handle => result,
            };
            let error = match result {
                Ok(Ok(body)) => return Ok(body),
                Ok(Err(e)) => e,
                Err(e) => return Err(e.into()),
            };
            if error.is_cancelled() {
                return Err(error);
            }

            attempt += 1;
            if attempt > self.config.body_retry_attempts {
                return Err(error);
            }
            warn!(
                key = %key,
                attempt,
                error = %error,
                delay_secs = self.config.body_retry_delay.as_secs(),
                "Body fetch failed, retrying on backup queue"
            );
            tokio::select! {
                _ = token.cancelled() => return Err(ResourceError::Cancelled),
                _ = tokio::time::sleep(self.config.body_retry_delay) => {}
            }
        }
    }
}
