//! Per-list scroll offsets kept in the session store.

use std::sync::Arc;

use bridge_traits::KeyValueStore;
use tracing::debug;

use crate::cache::LayeredCache;
use crate::error::Result;

pub fn scroll_storage_key(list_name: &str) -> String {
    format!("scroll-position-{}", list_name)
}

pub struct ScrollPositions {
    store: Arc<dyn KeyValueStore>,
    cache: Arc<LayeredCache>,
}

impl ScrollPositions {
    pub fn new(store: Arc<dyn KeyValueStore>, cache: Arc<LayeredCache>) -> Self {
        Self { store, cache }
    }

    pub async fn save(&self, list_name: &str, offset: u64) -> Result<()> {
        self.store
            .set_string(&scroll_storage_key(list_name), &offset.to_string())
            .await?;
        Ok(())
    }

    /// The saved offset, unless the list's cached pages have expired and the
    /// offset would point into different content.
    pub async fn restore(&self, list_name: &str) -> Result<Option<u64>> {
        if self.cache.is_list_expired(list_name) {
            debug!(list = list_name, "Not restoring scroll position for expired list");
            return Ok(None);
        }
        let raw = self.store.get_string(&scroll_storage_key(list_name)).await?;
        Ok(raw.and_then(|value| value.trim().parse::<f64>().ok()).map(|y| y.max(0.0) as u64))
    }

    pub async fn forget(&self, list_name: &str) -> Result<()> {
        self.store.delete(&scroll_storage_key(list_name)).await?;
        Ok(())
    }
}
