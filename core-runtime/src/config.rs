//! # Core Configuration Module
//!
//! The configuration system uses a builder to construct a [`CoreConfig`]
//! holding every host capability and top-level setting the QDN core needs.
//! Validation is fail-fast: a missing capability is reported at `build()`
//! with a message naming what to inject.
//!
//! ## Required Dependencies
//!
//! - `QdnBridge` - host RPC for search, publish and status
//! - `HttpClient` - gateway access (desktop default: reqwest, behind `desktop-shims`)
//!
//! ## Optional Dependencies
//!
//! - session `KeyValueStore` - scroll positions (desktop default: in-memory)
//! - local `KeyValueStore` - persisted publish cache (desktop default: in-memory)
//! - `Clock` - defaults to [`SystemClock`]
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::CoreConfig;
//! use std::sync::Arc;
//!
//! let config = CoreConfig::builder()
//!     .bridge(Arc::new(MyBridge))
//!     .gateway_url("http://127.0.0.1:12391")
//!     .enable_encrypted_streaming(true)
//!     .build()?;
//! ```

use crate::error::{Error, Result};
use crate::events::DEFAULT_EVENT_BUFFER_SIZE;
use bridge_traits::{Clock, HttpClient, KeyValueStore, QdnBridge, SystemClock};
use std::sync::Arc;

/// Default address of a locally running node's gateway.
pub const DEFAULT_GATEWAY_URL: &str = "http://127.0.0.1:12391";

/// Core configuration for the QDN core.
#[derive(Clone)]
pub struct CoreConfig {
    /// Host RPC surface (required)
    pub bridge: Arc<dyn QdnBridge>,

    /// Gateway base URL without trailing slash
    pub gateway_url: String,

    /// Gateway HTTP client (required; desktop default with `desktop-shims`)
    pub http_client: Arc<dyn HttpClient>,

    /// Per-session storage; `None` disables scroll-position persistence
    pub session_store: Option<Arc<dyn KeyValueStore>>,

    /// Durable storage; `None` disables the persisted publish cache
    pub local_store: Option<Arc<dyn KeyValueStore>>,

    pub clock: Arc<dyn Clock>,

    /// Capacity of the event broadcast channel
    pub event_buffer_size: usize,

    pub features: FeatureFlags,
}

impl std::fmt::Debug for CoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreConfig")
            .field("bridge", &"QdnBridge { ... }")
            .field("gateway_url", &self.gateway_url)
            .field("http_client", &"HttpClient { ... }")
            .field(
                "session_store",
                &self.session_store.as_ref().map(|_| "KeyValueStore { ... }"),
            )
            .field(
                "local_store",
                &self.local_store.as_ref().map(|_| "KeyValueStore { ... }"),
            )
            .field("event_buffer_size", &self.event_buffer_size)
            .field("features", &self.features)
            .finish()
    }
}

/// Feature flags control optional functionality.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureFlags {
    /// Poll resource status until READY for resources handed to the UI
    pub enable_status_polling: bool,

    /// Warm the resource cache in the background after each search page
    pub enable_cache_warming: bool,

    /// Allow AES-CTR encrypted media playback
    pub enable_encrypted_streaming: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            enable_status_polling: true,
            enable_cache_warming: true,
            enable_encrypted_streaming: false,
        }
    }
}

impl CoreConfig {
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }

    /// Validates the configuration and returns an error if invalid.
    pub fn validate(&self) -> Result<()> {
        let url = self.gateway_url.trim();
        if url.is_empty() {
            return Err(Error::Config("Gateway URL cannot be empty".to_string()));
        }
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(Error::Config(format!(
                "Gateway URL must be http(s), got `{}`",
                url
            )));
        }

        if self.event_buffer_size == 0 {
            return Err(Error::Config(
                "Event buffer size must be greater than 0".to_string(),
            ));
        }

        if self.event_buffer_size > 100_000 {
            return Err(Error::Config(
                "Event buffer size exceeds maximum of 100,000".to_string(),
            ));
        }

        Ok(())
    }
}

fn bridge_missing_error() -> Error {
    Error::CapabilityMissing {
        capability: "QdnBridge".to_string(),
        message: "A QdnBridge implementation is required for search, publish and status. \
                 Wallet shells: inject the host RPC adapter. \
                 Desktop without a wallet: use bridge_desktop::GatewayQdnBridge."
            .to_string(),
    }
}

#[cfg(feature = "desktop-shims")]
fn provide_default_http_client() -> Result<Arc<dyn HttpClient>> {
    use bridge_desktop::ReqwestHttpClient;

    let client: Arc<dyn HttpClient> = Arc::new(ReqwestHttpClient::new());
    Ok(client)
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_http_client() -> Result<Arc<dyn HttpClient>> {
    Err(Error::CapabilityMissing {
        capability: "HttpClient".to_string(),
        message: "An HttpClient is required to reach the gateway. \
                 Desktop: enable the 'desktop-shims' feature to use ReqwestHttpClient. \
                 Other hosts: inject a platform-native client."
            .to_string(),
    })
}

#[cfg(feature = "desktop-shims")]
fn provide_default_store() -> Option<Arc<dyn KeyValueStore>> {
    use bridge_desktop::MemoryKeyValueStore;

    let store: Arc<dyn KeyValueStore> = Arc::new(MemoryKeyValueStore::new());
    Some(store)
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_store() -> Option<Arc<dyn KeyValueStore>> {
    None
}

/// Builder for constructing [`CoreConfig`] instances.
#[derive(Default)]
pub struct CoreConfigBuilder {
    bridge: Option<Arc<dyn QdnBridge>>,
    gateway_url: Option<String>,
    http_client: Option<Arc<dyn HttpClient>>,
    session_store: Option<Arc<dyn KeyValueStore>>,
    local_store: Option<Arc<dyn KeyValueStore>>,
    clock: Option<Arc<dyn Clock>>,
    event_buffer_size: Option<usize>,
    features: FeatureFlags,
}

impl CoreConfigBuilder {
    /// Sets the host bridge (required).
    pub fn bridge(mut self, bridge: Arc<dyn QdnBridge>) -> Self {
        self.bridge = Some(bridge);
        self
    }

    /// Sets the gateway base URL.
    ///
    /// Default: `http://127.0.0.1:12391`. A trailing slash is removed.
    pub fn gateway_url(mut self, url: impl Into<String>) -> Self {
        self.gateway_url = Some(url.into());
        self
    }

    /// Sets the HTTP client implementation.
    ///
    /// If not provided, `ReqwestHttpClient` is used when the `desktop-shims`
    /// feature is enabled.
    pub fn http_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.http_client = Some(client);
        self
    }

    pub fn session_store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.session_store = Some(store);
        self
    }

    pub fn local_store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.local_store = Some(store);
        self
    }

    /// Sets the time source; tests inject a `ManualClock`.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn event_buffer_size(mut self, size: usize) -> Self {
        self.event_buffer_size = Some(size);
        self
    }

    pub fn enable_status_polling(mut self, enabled: bool) -> Self {
        self.features.enable_status_polling = enabled;
        self
    }

    pub fn enable_cache_warming(mut self, enabled: bool) -> Self {
        self.features.enable_cache_warming = enabled;
        self
    }

    pub fn enable_encrypted_streaming(mut self, enabled: bool) -> Self {
        self.features.enable_encrypted_streaming = enabled;
        self
    }

    pub fn features(mut self, features: FeatureFlags) -> Self {
        self.features = features;
        self
    }

    /// Builds the configuration.
    ///
    /// # Errors
    ///
    /// - [`Error::CapabilityMissing`] when no bridge was set, or no HTTP
    ///   client was set and no desktop default is compiled in
    /// - [`Error::Config`] when validation fails
    pub fn build(self) -> Result<CoreConfig> {
        let bridge = self.bridge.ok_or_else(bridge_missing_error)?;

        let http_client = match self.http_client {
            Some(client) => client,
            None => provide_default_http_client()?,
        };

        let config = CoreConfig {
            bridge,
            gateway_url: self
                .gateway_url
                .unwrap_or_else(|| DEFAULT_GATEWAY_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            http_client,
            session_store: self.session_store.or_else(provide_default_store),
            local_store: self.local_store.or_else(provide_default_store),
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            event_buffer_size: self.event_buffer_size.unwrap_or(DEFAULT_EVENT_BUFFER_SIZE),
            features: self.features,
        };

        config.validate()?;

        Ok(config)
    }
}
