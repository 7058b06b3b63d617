//! # Event Bus System
//!
//! Broadcasts typed events between the resource, cache and playback layers
//! using `tokio::sync::broadcast`. UI subtrees subscribe to the bus instead of
//! having status or deletion state threaded through them.
//!
//! ```text
//! ┌────────────────┐  emit   ┌───────────┐  subscribe  ┌────────────┐
//! │ Status resolver├────────>│           ├────────────>│ Subscriber │
//! └────────────────┘         │ EventBus  │             └────────────┘
//! ┌────────────────┐  emit   │           │  subscribe  ┌────────────┐
//! │ Layered cache  ├────────>│           ├────────────>│ Subscriber │
//! └────────────────┘         └───────────┘             └────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use bridge_traits::{ResourceKey, Service};
//! use core_runtime::events::{CoreEvent, EventBus, StatusEvent};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let bus = EventBus::new(100);
//! let mut rx = bus.subscribe();
//!
//! bus.emit(CoreEvent::Status(StatusEvent::Refetching {
//!     key: ResourceKey::new(Service::Video, "alice", "clip1"),
//! }))
//! .ok();
//!
//! assert!(matches!(rx.recv().await, Ok(CoreEvent::Status(_))));
//! # }
//! ```
//!
//! ## Error Handling
//!
//! - **`RecvError::Lagged(n)`**: the subscriber missed `n` events; it can keep
//!   receiving.
//! - **`RecvError::Closed`**: every sender was dropped; treat as shutdown.
//!
//! Emitting with no subscribers returns an error that callers ignore with
//! `.ok()`; events are advisory.

use bridge_traits::{ResourceKey, Status};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 256;

// ============================================================================
// Core Event Types
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload")]
pub enum CoreEvent {
    Status(StatusEvent),
    Cache(CacheEvent),
    Playback(PlaybackEvent),
}

impl CoreEvent {
    pub fn description(&self) -> &str {
        match self {
            CoreEvent::Status(e) => e.description(),
            CoreEvent::Cache(e) => e.description(),
            CoreEvent::Playback(e) => e.description(),
        }
    }

    pub fn severity(&self) -> EventSeverity {
        match self {
            CoreEvent::Status(StatusEvent::Failed { .. }) => EventSeverity::Error,
            CoreEvent::Playback(PlaybackEvent::Failed { .. }) => EventSeverity::Error,
            CoreEvent::Status(StatusEvent::Refetching { .. }) => EventSeverity::Warning,
            CoreEvent::Status(StatusEvent::Ready { .. }) => EventSeverity::Info,
            CoreEvent::Cache(CacheEvent::ResourcesDeleted { .. }) => EventSeverity::Info,
            CoreEvent::Playback(PlaybackEvent::Started { .. }) => EventSeverity::Info,
            _ => EventSeverity::Debug,
        }
    }

    /// Resource this event concerns, when it concerns exactly one.
    pub fn resource_key(&self) -> Option<&ResourceKey> {
        match self {
            CoreEvent::Status(StatusEvent::Changed { key, .. })
            | CoreEvent::Status(StatusEvent::Ready { key, .. })
            | CoreEvent::Status(StatusEvent::Refetching { key })
            | CoreEvent::Status(StatusEvent::Failed { key, .. })
            | CoreEvent::Playback(PlaybackEvent::Started { key, .. })
            | CoreEvent::Playback(PlaybackEvent::ChunkAppended { key, .. })
            | CoreEvent::Playback(PlaybackEvent::Ended { key, .. })
            | CoreEvent::Playback(PlaybackEvent::Failed { key, .. }) => Some(key),
            CoreEvent::Cache(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

// ============================================================================
// Status Events
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event")]
pub enum StatusEvent {
    /// A poll produced a new status snapshot.
    Changed {
        key: ResourceKey,
        status: Status,
        percent_loaded: f64,
        local_chunk_count: u64,
        total_chunk_count: u64,
    },
    Ready {
        key: ResourceKey,
        path: Option<String>,
        filename: Option<String>,
    },
    /// Progress stalled and a rebuild was forced.
    Refetching {
        key: ResourceKey,
    },
    Failed {
        key: ResourceKey,
        message: String,
    },
}

impl StatusEvent {
    fn description(&self) -> &str {
        match self {
            StatusEvent::Changed { .. } => "Resource status changed",
            StatusEvent::Ready { .. } => "Resource ready",
            StatusEvent::Refetching { .. } => "Resource download stalled, refetching",
            StatusEvent::Failed { .. } => "Resource failed to download",
        }
    }
}

// ============================================================================
// Cache Events
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum CacheEvent {
    ResourcesDeleted {
        keys: Vec<ResourceKey>,
    },
    TemporaryAdded {
        list_name: String,
        count: usize,
    },
    ListExpired {
        list_name: String,
    },
    ExpiredSwept {
        removed: usize,
    },
}

impl CacheEvent {
    fn description(&self) -> &str {
        match self {
            CacheEvent::ResourcesDeleted { .. } => "Resources deleted",
            CacheEvent::TemporaryAdded { .. } => "Temporary resources added",
            CacheEvent::ListExpired { .. } => "Search list expired",
            CacheEvent::ExpiredSwept { .. } => "Expired cache entries swept",
        }
    }
}

// ============================================================================
// Playback Events
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum PlaybackEvent {
    Started {
        key: ResourceKey,
        mime_type: String,
        total_size: Option<u64>,
    },
    ChunkAppended {
        key: ResourceKey,
        offset: u64,
        length: u64,
    },
    Ended {
        key: ResourceKey,
        bytes_appended: u64,
    },
    Failed {
        key: ResourceKey,
        message: String,
    },
}

impl PlaybackEvent {
    fn description(&self) -> &str {
        match self {
            PlaybackEvent::Started { .. } => "Encrypted stream started",
            PlaybackEvent::ChunkAppended { .. } => "Decrypted chunk appended",
            PlaybackEvent::Ended { .. } => "Encrypted stream ended",
            PlaybackEvent::Failed { .. } => "Encrypted stream failed",
        }
    }
}

// ============================================================================
// Event Bus
// ============================================================================

#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CoreEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn emit(&self, event: CoreEvent) -> Result<usize, SendError<CoreEvent>> {
        self.sender.send(event)
    }

    pub fn subscribe(&self) -> Receiver<CoreEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// Event Stream Wrapper
// ============================================================================

type EventFilter = Box<dyn Fn(&CoreEvent) -> bool + Send + Sync>;

/// Receiver with an optional predicate applied before delivery.
pub struct EventStream {
    receiver: Receiver<CoreEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    pub fn new(receiver: Receiver<CoreEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CoreEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    /// Only events about one resource.
    pub fn for_resource(self, key: ResourceKey) -> Self {
        self.filter(move |event| event.resource_key() == Some(&key))
    }

    pub async fn recv(&mut self) -> Result<CoreEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;

            let Some(filter) = &self.filter else {
                return Ok(event);
            };
            if filter(&event) {
                return Ok(event);
            }
        }
    }

    pub fn try_recv(&mut self) -> Option<Result<CoreEvent, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    let Some(filter) = &self.filter else {
                        return Some(Ok(event));
                    };
                    if filter(&event) {
                        return Some(Ok(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    return Some(Err(RecvError::Lagged(n)))
                }
                Err(broadcast::error::TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            }
        }
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_traits::Service;

    fn key(id: &str) -> ResourceKey {
        ResourceKey::new(Service::Video, "alice", id)
    }

    #[tokio::test]
    async fn test_event_emission_no_subscribers() {
        let bus = EventBus::new(10);
        let result = bus.emit(CoreEvent::Cache(CacheEvent::ExpiredSwept { removed: 0 }));
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_multiple_subscribers_receive_same_event() {
        let bus = EventBus::new(10);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        let event = CoreEvent::Status(StatusEvent::Ready {
            key: key("clip1"),
            path: None,
            filename: Some("clip.mp4".to_string()),
        });
        assert_eq!(bus.emit(event.clone()).unwrap(), 2);

        assert_eq!(rx1.recv().await.unwrap(), event);
        assert_eq!(rx2.recv().await.unwrap(), event);
    }

    #[tokio::test]
    async fn test_stream_for_resource_filters_other_keys() {
        let bus = EventBus::new(10);
        let mut stream = EventStream::new(bus.subscribe()).for_resource(key("wanted"));

        bus.emit(CoreEvent::Status(StatusEvent::Refetching { key: key("other") }))
            .unwrap();
        bus.emit(CoreEvent::Cache(CacheEvent::ListExpired {
            list_name: "home".to_string(),
        }))
        .unwrap();
        bus.emit(CoreEvent::Status(StatusEvent::Refetching { key: key("wanted") }))
            .unwrap();

        let event = stream.recv().await.unwrap();
        assert_eq!(event.resource_key(), Some(&key("wanted")));
        assert!(stream.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_lagged_subscriber() {
        let bus = EventBus::new(2);
        let mut rx = bus.subscribe();

        for removed in 0..5 {
            bus.emit(CoreEvent::Cache(CacheEvent::ExpiredSwept { removed }))
                .unwrap();
        }

        assert!(matches!(rx.recv().await, Err(RecvError::Lagged(_))));
        assert!(rx.recv().await.is_ok());
    }

    #[test]
    fn test_event_severity() {
        let failed = CoreEvent::Status(StatusEvent::Failed {
            key: key("x"),
            message: "retry budget exhausted".to_string(),
        });
        assert_eq!(failed.severity(), EventSeverity::Error);

        let chunk = CoreEvent::Playback(PlaybackEvent::ChunkAppended {
            key: key("x"),
            offset: 0,
            length: 10,
        });
        assert_eq!(chunk.severity(), EventSeverity::Debug);
        assert_eq!(chunk.description(), "Decrypted chunk appended");
    }

    #[test]
    fn test_event_serialization() {
        let event = CoreEvent::Cache(CacheEvent::TemporaryAdded {
            list_name: "home".to_string(),
            count: 2,
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "Cache");
        assert_eq!(json["payload"]["event"], "TemporaryAdded");

        let back: CoreEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }
}
