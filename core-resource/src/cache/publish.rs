use std::collections::HashMap;

use bridge_traits::{QdnMetadata, ResourceKey};
use serde::{Deserialize, Serialize};

use super::entry::{Expiring, ResourceData, ReturnType};

/// Storage key of a user's persisted publish cache.
pub fn publish_storage_key(username: &str, app_name_hashed: &str) -> String {
    format!("qortal_publish_{}_{}", username, app_name_hashed)
}

/// A resource this client fetched or published recently.
///
/// Persisted with the body's `returnType` next to it, so a JSON body that is
/// a bare string does not come back as base64.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "StoredRecord", from = "StoredRecord")]
pub struct PublishRecord {
    pub qortal_metadata: QdnMetadata,
    pub data: ResourceData,
    /// When the record was written, Unix milliseconds.
    pub timestamp: i64,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredRecord {
    qortal_metadata: QdnMetadata,
    data: serde_json::Value,
    /// Missing in records written before the type was stored.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    return_type: Option<ReturnType>,
    timestamp: i64,
}

impl From<PublishRecord> for StoredRecord {
    fn from(record: PublishRecord) -> Self {
        let return_type = Some(record.data.return_type());
        let data = match record.data {
            ResourceData::Base64(data) => serde_json::Value::String(data),
            ResourceData::Json(value) => value,
        };
        Self {
            qortal_metadata: record.qortal_metadata,
            data,
            return_type,
            timestamp: record.timestamp,
        }
    }
}

impl From<StoredRecord> for PublishRecord {
    fn from(stored: StoredRecord) -> Self {
        let data = match (stored.return_type, stored.data) {
            (Some(ReturnType::Json), value) => ResourceData::Json(value),
            (_, serde_json::Value::String(data)) => ResourceData::Base64(data),
            (_, value) => ResourceData::Json(value),
        };
        Self {
            qortal_metadata: stored.qortal_metadata,
            data,
            timestamp: stored.timestamp,
        }
    }
}

#[derive(Default)]
pub(crate) struct PublishCache {
    entries: HashMap<ResourceKey, Expiring<PublishRecord>>,
}

impl PublishCache {
    /// Placeholder records read as absent.
    pub fn get(&mut self, key: &ResourceKey, now: i64) -> Option<PublishRecord> {
        let entry = self.entries.get(key)?;
        if entry.is_expired(now) {
            self.entries.remove(key);
            return None;
        }
        if entry.value.qortal_metadata.is_placeholder() {
            return None;
        }
        Some(entry.value.clone())
    }

    pub fn set(&mut self, record: PublishRecord, expires_at: i64) {
        self.entries
            .insert(record.qortal_metadata.key(), Expiring::new(record, expires_at));
    }

    pub fn remove(&mut self, key: &ResourceKey) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Live records, oldest first.
    pub fn records(&self, now: i64) -> Vec<PublishRecord> {
        let mut records: Vec<PublishRecord> = self
            .entries
            .values()
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.value.clone())
            .collect();
        records.sort_by_key(|record| record.timestamp);
        records
    }

    pub fn sweep(&mut self, now: i64) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        before - self.entries.len()
    }
}
