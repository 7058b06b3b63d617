//! Core service façade and bootstrap helpers.
//!
//! [`QdnCore`] wires a [`CoreConfig`] into the shared caches, request queues,
//! status resolver, fetch orchestrator and encrypted playback. Desktop apps
//! typically enable the `desktop-shims` feature (which depends on
//! `bridge-desktop`) and call [`bootstrap_desktop`]; wallet shells build a
//! `CoreConfig` around their own bridge and call [`QdnCore::new`].

pub mod error;

pub use error::{Result, ServiceError};

use std::collections::HashSet;
use std::sync::Arc;

use bridge_traits::{HttpClient, KeyValueStore, QdnMetadata, ResourceKey, SearchParams};
use core_playback::{
    CtrDecryptor, EncryptedStreamService, EncryptionParams, MediaSink, PlaybackSession,
    ProxyRegistration, RangeProxy, StreamRequest, StreamingConfig,
};
use core_resource::{
    CacheStats, FetchOptions, FetchOutcome, GatewayClient, LayeredCache, PollConfig,
    PriorityPage, PriorityRequest, RequestQueue, ResourceConfig, ResourceFetcher, ReturnType,
    ScrollPositions, StatusHandle, StatusResolver,
};
use core_runtime::config::FeatureFlags;
use core_runtime::{CoreConfig, EventBus};
use tracing::{info, instrument, warn};

/// Primary façade exposed to host applications.
///
/// Cheap to clone; clones share every cache and queue.
#[derive(Clone)]
pub struct QdnCore {
    inner: Arc<CoreInner>,
}

struct CoreInner {
    features: FeatureFlags,
    event_bus: EventBus,
    http_client: Arc<dyn HttpClient>,
    gateway: GatewayClient,
    cache: Arc<LayeredCache>,
    fetcher: ResourceFetcher,
    resolver: StatusResolver,
    scroll: Option<ScrollPositions>,
    local_store: Option<Arc<dyn KeyValueStore>>,
    streaming: StreamingConfig,
    decryptor: Arc<CtrDecryptor>,
}

impl QdnCore {
    /// Build the core with default cache, queue and streaming settings.
    pub fn new(config: CoreConfig) -> Result<Self> {
        Self::with_settings(config, ResourceConfig::default(), StreamingConfig::default())
    }

    pub fn with_settings(
        config: CoreConfig,
        resources: ResourceConfig,
        streaming: StreamingConfig,
    ) -> Result<Self> {
        config.validate()?;
        resources.validate()?;
        streaming
            .validate()
            .map_err(core_playback::PlaybackError::InvalidConfig)?;

        let event_bus = EventBus::new(config.event_buffer_size);
        let gateway = GatewayClient::new(Arc::clone(&config.http_client), config.gateway_url.as_str());
        let cache = Arc::new(
            LayeredCache::new(&resources, Arc::clone(&config.clock)).with_event_bus(event_bus.clone()),
        );

        let status_queue = RequestQueue::new("status", resources.status_concurrency);
        let global_poll = PollConfig::global()
            .with_interval(resources.poll.interval)
            .with_retry_attempts(resources.poll.retry_attempts);
        let resolver = StatusResolver::new(Arc::new(gateway.clone()), gateway.clone(), status_queue)
            .with_poll_configs(resources.poll.clone(), global_poll)
            .with_event_bus(event_bus.clone());

        let fetcher = ResourceFetcher::new(
            Arc::clone(&config.bridge),
            gateway.clone(),
            Arc::clone(&cache),
            resources,
        )
        .with_cache_warming(config.features.enable_cache_warming);

        let scroll = config
            .session_store
            .clone()
            .map(|store| ScrollPositions::new(store, Arc::clone(&cache)));

        info!(gateway = %config.gateway_url, features = ?config.features, "QDN core initialized");

        Ok(Self {
            inner: Arc::new(CoreInner {
                features: config.features,
                event_bus,
                http_client: config.http_client,
                gateway,
                cache,
                fetcher,
                resolver,
                scroll,
                local_store: config.local_store,
                streaming,
                decryptor: Arc::new(CtrDecryptor::new()),
            }),
        })
    }

    pub fn events(&self) -> &EventBus {
        &self.inner.event_bus
    }

    pub fn cache(&self) -> &Arc<LayeredCache> {
        &self.inner.cache
    }

    pub fn fetcher(&self) -> &ResourceFetcher {
        &self.inner.fetcher
    }

    pub fn resolver(&self) -> &StatusResolver {
        &self.inner.resolver
    }

    /// Gateway URL of a resource, independent of its status.
    pub fn resource_url(&self, key: &ResourceKey) -> String {
        self.inner.gateway.resource_url(key)
    }

    // ------------------------------------------------------------------
    // Fetching
    // ------------------------------------------------------------------

    pub async fn fetch_individual_publish_json(
        &self,
        key: &ResourceKey,
        return_type: ReturnType,
        include_metadata: bool,
    ) -> Result<FetchOutcome> {
        Ok(self
            .inner
            .fetcher
            .fetch_individual(key, return_type, include_metadata)
            .await?)
    }

    pub async fn fetch_resources(
        &self,
        params: &SearchParams,
        list_name: &str,
        return_type: ReturnType,
        options: FetchOptions,
    ) -> Result<Vec<QdnMetadata>> {
        Ok(self
            .inner
            .fetcher
            .fetch_resources(params, list_name, return_type, options)
            .await?)
    }

    pub fn fetch_preloaded_resources(
        &self,
        params: &SearchParams,
        resources: &[QdnMetadata],
        list_name: &str,
        return_type: ReturnType,
    ) -> Vec<QdnMetadata> {
        self.inner
            .fetcher
            .fetch_preloaded_resources(params, resources, list_name, return_type)
    }

    pub async fn fetch_resources_with_priority(&self, request: &PriorityRequest) -> Result<PriorityPage> {
        Ok(self.inner.fetcher.fetch_resources_with_priority(request).await?)
    }

    /// Publish placeholders over `keys`, then hide them from every list.
    pub async fn delete_resource(&self, keys: &[ResourceKey]) -> Result<()> {
        Ok(self.inner.fetcher.delete_resources(keys).await?)
    }

    // ------------------------------------------------------------------
    // Lists
    // ------------------------------------------------------------------

    /// Show freshly published items in `list_name` before search catches up.
    pub fn add_new_resources(&self, list_name: &str, items: Vec<QdnMetadata>) {
        self.inner.cache.add_temporary_resources(list_name, items, None);
    }

    /// Overlay, dedupe and tombstone-filter a page for display.
    pub fn render_list(&self, list_name: &str, items: Vec<QdnMetadata>) -> Vec<QdnMetadata> {
        self.inner.cache.render_list(list_name, items)
    }

    /// Identifiers of a rendered page, for `existing_identifiers`.
    pub fn identifiers_of(&self, items: &[QdnMetadata]) -> HashSet<String> {
        core_resource::cache::identifiers_of(items)
    }

    pub fn is_list_expired(&self, list_name: &str) -> bool {
        self.inner.cache.is_list_expired(list_name)
    }

    pub fn clear_expired_cache(&self) -> usize {
        self.inner.cache.clear_expired()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.inner.cache.stats()
    }

    pub async fn save_scroll_position(&self, list_name: &str, offset: u64) -> Result<()> {
        match &self.inner.scroll {
            Some(scroll) => Ok(scroll.save(list_name, offset).await?),
            None => Ok(()),
        }
    }

    /// Saved offset, unless the list's cached pages have expired.
    pub async fn restore_scroll_position(&self, list_name: &str) -> Result<Option<u64>> {
        match &self.inner.scroll {
            Some(scroll) => Ok(scroll.restore(list_name).await?),
            None => Ok(None),
        }
    }

    pub async fn persist_publish_cache(&self, username: &str, app_name_hashed: &str) -> Result<usize> {
        let store = self.local_store()?;
        Ok(self
            .inner
            .cache
            .persist_publish_cache(store.as_ref(), username, app_name_hashed)
            .await?)
    }

    pub async fn restore_publish_cache(&self, username: &str, app_name_hashed: &str) -> Result<usize> {
        let store = self.local_store()?;
        Ok(self
            .inner
            .cache
            .restore_publish_cache(store.as_ref(), username, app_name_hashed)
            .await?)
    }

    fn local_store(&self) -> Result<&Arc<dyn KeyValueStore>> {
        self.inner
            .local_store
            .as_ref()
            .ok_or_else(|| ServiceError::CapabilityMissing {
                capability: "KeyValueStore".to_string(),
                message: "a local store is required to persist the publish cache".to_string(),
            })
    }

    // ------------------------------------------------------------------
    // Status
    // ------------------------------------------------------------------

    /// Poll `key` while the returned handle (or a clone for the same key)
    /// is alive.
    pub fn track_status(&self, key: ResourceKey) -> Result<StatusHandle> {
        ensure_enabled(self.inner.features.enable_status_polling, "status polling")?;
        Ok(self.inner.resolver.track(key))
    }

    /// Poll `key` until it is ready or fails, with no handle required.
    pub fn download_resource(&self, key: ResourceKey) -> Result<()> {
        ensure_enabled(self.inner.features.enable_status_polling, "status polling")?;
        self.inner.resolver.download(key);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Encrypted playback
    // ------------------------------------------------------------------

    /// Stream an encrypted resource into `sink`.
    #[instrument(skip(self, key, encryption, sink), fields(key = %key))]
    pub async fn play_encrypted(
        &self,
        key: ResourceKey,
        mime_type: Option<String>,
        encryption: Option<EncryptionParams>,
        sink: Arc<dyn MediaSink>,
    ) -> Result<PlaybackSession> {
        ensure_enabled(self.inner.features.enable_encrypted_streaming, "encrypted streaming")?;
        if encryption.is_none() {
            return Err(core_playback::PlaybackError::MissingEncryption(key.to_string()).into());
        }

        let total_size = match self.inner.gateway.content_length(&key).await {
            Ok(size) => size,
            Err(e) => {
                warn!(error = %e, "Size lookup failed, streaming until empty reads");
                None
            }
        };

        let service = Arc::new(
            EncryptedStreamService::new(Arc::clone(&self.inner.http_client), self.inner.streaming.clone())
                .with_decryptor(Arc::clone(&self.inner.decryptor))
                .with_event_bus(self.inner.event_bus.clone()),
        );
        let request = StreamRequest {
            url: self.inner.gateway.resource_url(&key),
            key: key.clone(),
            mime_type,
            encryption,
            total_size,
        };

        let session = PlaybackSession::new(key);
        session.start_direct(service, request, sink)?;
        Ok(session)
    }

    /// Serve an encrypted resource through a range proxy instead.
    #[instrument(skip(self, key, encryption), fields(key = %key))]
    pub async fn proxy_encrypted(
        &self,
        key: ResourceKey,
        mime_type: Option<String>,
        encryption: Option<EncryptionParams>,
    ) -> Result<PlaybackSession> {
        ensure_enabled(self.inner.features.enable_encrypted_streaming, "encrypted streaming")?;

        let registration = ProxyRegistration {
            url: self.inner.gateway.resource_url(&key),
            key: key.clone(),
            mime_type,
            encryption,
        };
        let proxy = RangeProxy::register(
            Arc::clone(&self.inner.http_client),
            Arc::clone(&self.inner.decryptor),
            self.inner.streaming.clone(),
            registration,
        )
        .await?;

        let session = PlaybackSession::new(key);
        session.attach_proxy(Arc::new(proxy))?;
        Ok(session)
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Stop polling and drop queued fetches.
    pub fn shutdown(&self) {
        self.inner.resolver.shutdown();
        self.inner.fetcher.cancel_all();
        info!("QDN core shut down");
    }
}

fn ensure_enabled(enabled: bool, feature: &'static str) -> Result<()> {
    if enabled {
        Ok(())
    } else {
        Err(ServiceError::FeatureDisabled(feature))
    }
}

/// Convenience bootstrapper for desktop hosts without a wallet shell.
///
/// Uses `reqwest` for the gateway, a direct-to-gateway bridge, an in-memory
/// session store and a SQLite local store in the platform data directory.
///
/// ```no_run
/// # async fn example() -> core_service::Result<()> {
/// let core = core_service::bootstrap_desktop("http://127.0.0.1:12391").await?;
/// let url = core.resource_url(&bridge_traits::ResourceKey::new(
///     bridge_traits::Service::Video,
///     "alice",
///     "clip1",
/// ));
/// # Ok(())
/// # }
/// ```
#[cfg(all(feature = "desktop-shims", not(target_arch = "wasm32")))]
pub async fn bootstrap_desktop(gateway_url: &str) -> Result<QdnCore> {
    use bridge_desktop::{GatewayQdnBridge, MemoryKeyValueStore, ReqwestHttpClient, SqliteKeyValueStore};

    let http: Arc<dyn HttpClient> = Arc::new(ReqwestHttpClient::new());
    let bridge = Arc::new(GatewayQdnBridge::new(Arc::clone(&http), gateway_url));
    let local = SqliteKeyValueStore::open_default()
        .await
        .map_err(|e| ServiceError::InitializationFailed(e.to_string()))?;

    let config = CoreConfig::builder()
        .bridge(bridge)
        .gateway_url(gateway_url)
        .http_client(http)
        .session_store(Arc::new(MemoryKeyValueStore::new()))
        .local_store(Arc::new(local))
        .build()?;
    QdnCore::new(config)
}
