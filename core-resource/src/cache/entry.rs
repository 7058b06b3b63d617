use std::sync::Arc;
use std::time::Duration;

use bridge_traits::{QdnMetadata, ResourceKey};
use serde::{Deserialize, Serialize};

/// State of one resource-cache slot.
///
/// `Pending` marks a fetch in flight, `Absent` a fetch that failed and
/// should not be retried until the entry expires.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheValue<T> {
    Pending,
    Absent,
    Present(T),
}

impl<T> CacheValue<T> {
    pub fn is_pending(&self) -> bool {
        matches!(self, CacheValue::Pending)
    }

    pub fn present(self) -> Option<T> {
        match self {
            CacheValue::Present(value) => Some(value),
            _ => None,
        }
    }
}

/// How a fetched body is decoded before caching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReturnType {
    /// base64 → bytes → UTF-8 → JSON value.
    Json,
    /// Keep the gateway's base64 string untouched.
    Base64,
}

/// A decoded resource body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResourceData {
    Base64(String),
    Json(serde_json::Value),
}

impl ResourceData {
    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            ResourceData::Json(value) => Some(value),
            ResourceData::Base64(_) => None,
        }
    }

    pub fn as_base64(&self) -> Option<&str> {
        match self {
            ResourceData::Base64(data) => Some(data),
            ResourceData::Json(_) => None,
        }
    }

    pub fn return_type(&self) -> ReturnType {
        match self {
            ResourceData::Base64(_) => ReturnType::Base64,
            ResourceData::Json(_) => ReturnType::Json,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedResource {
    pub key: ResourceKey,
    /// Present when the caller asked for metadata alongside the body.
    pub metadata: Option<QdnMetadata>,
    pub data: ResourceData,
}

pub type CachedResource = CacheValue<Arc<ResolvedResource>>;

/// A value with an absolute expiry in Unix milliseconds.
#[derive(Debug, Clone)]
pub(crate) struct Expiring<T> {
    pub value: T,
    pub expires_at: i64,
}

impl<T> Expiring<T> {
    pub fn new(value: T, expires_at: i64) -> Self {
        Self { value, expires_at }
    }

    /// Strictly after the expiry instant.
    pub fn is_expired(&self, now: i64) -> bool {
        now > self.expires_at
    }
}

pub(crate) fn expiry_after(now: i64, ttl: Duration) -> i64 {
    let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
    now.saturating_add(ttl_ms)
}
