//! # Host Bridge Traits
//!
//! Contracts between the QDN core and the host environment.
//!
//! ## Traits
//!
//! - [`QdnBridge`](qdn::QdnBridge) - RPC surface for search, publish, status and account actions
//! - [`HttpClient`](http::HttpClient) - Gateway access, including byte-range reads
//! - [`KeyValueStore`](storage::KeyValueStore) - Durable string storage
//! - [`Clock`](time::Clock) - Time source for deterministic testing
//! - [`LoggerSink`](time::LoggerSink) - Forward structured logs to host logging
//!
//! ## Error Handling
//!
//! All bridge traits use [`BridgeError`](error::BridgeError). Adapters convert
//! their transport errors into it and keep the context (action, URL, key) in
//! the message.
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync` so the core can share one adapter
//! across spawned tasks.

pub mod error;
pub mod http;
pub mod qdn;
pub mod storage;
pub mod time;

pub use error::{BridgeError, Result};

pub use http::{HttpClient, HttpMethod, HttpRequest, HttpResponse, RetryPolicy};
pub use qdn::{
    BridgeRequest, BridgeResponse, PublishResource, QdnBridge, QdnBridgeExt, QdnMetadata,
    ResourceDetails, ResourceKey, ResourceStatus, SearchMode, SearchParams, Service, Status,
    UserAccount, PLACEHOLDER_SIZE,
};
pub use storage::{KeyValueStore, KeyValueStoreExt};
pub use time::{Clock, ConsoleLogger, LogEntry, LogLevel, LoggerSink, ManualClock, SystemClock};
