//! # Desktop Bridge Implementations
//!
//! Default implementations of bridge traits for desktop hosts
//! (macOS, Windows, Linux):
//! - `HttpClient` using `reqwest`
//! - `KeyValueStore` backed by SQLite, plus an in-memory variant
//! - `QdnBridge` that talks straight to the local gateway
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::{GatewayQdnBridge, ReqwestHttpClient, SqliteKeyValueStore};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> bridge_traits::Result<()> {
//!     let http = Arc::new(ReqwestHttpClient::new());
//!     let bridge = GatewayQdnBridge::new(http.clone(), "http://127.0.0.1:12391");
//!     let store = SqliteKeyValueStore::open_default().await?;
//!     // Hand these to `CoreConfig::builder()`
//!     Ok(())
//! }
//! ```

mod gateway_bridge;
mod http;
mod kv_store;

pub use gateway_bridge::GatewayQdnBridge;
pub use http::ReqwestHttpClient;
pub use kv_store::{MemoryKeyValueStore, SqliteKeyValueStore};
