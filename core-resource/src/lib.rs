//! # Core Resource
//!
//! Resolution and caching of QDN resources.
//!
//! ## Overview
//!
//! - [`queue::RequestQueue`]: bounded-concurrency FIFO, one per request class
//! - [`cache::LayeredCache`]: resource bodies, search pages, the optimistic
//!   overlay, tombstones and the publish cache
//! - [`status::StatusResolver`]: polls the local node until a resource is
//!   built and servable
//! - [`fetch::ResourceFetcher`]: individual and paginated fetches, weighted
//!   multi-source feeds and deletions
//! - [`gateway::GatewayClient`]: URLs and calls for the node's HTTP gateway
//!
//! All state is held in injectable service objects; nothing is global.

pub mod cache;
pub mod config;
pub mod error;
pub mod fetch;
pub mod gateway;
pub mod queue;
pub mod scroll;
pub mod status;

pub use cache::{CacheStats, CacheValue, LayeredCache, ResolvedResource, ResourceData, ReturnType};
pub use config::{PollConfig, ResourceConfig};
pub use error::{QueueError, ResourceError, Result};
pub use fetch::{
    EntityQuery, FetchOptions, FetchOutcome, PriorityPage, PriorityRequest, PrioritySource,
    ResourceFetcher, SourceQuery,
};
pub use gateway::{GatewayClient, ResourceProperties};
pub use queue::{QueueHandle, RequestQueue};
pub use scroll::ScrollPositions;
pub use status::{StatusHandle, StatusProbe, StatusResolver};
