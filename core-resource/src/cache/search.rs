use std::collections::HashMap;

use bridge_traits::{QdnMetadata, SearchParams};

use super::entry::Expiring;

/// Deterministic key for one search: every parameter that affects the result
/// set, plus the duplicate-identifier flag. Values are percent-encoded so no
/// value can forge a separator.
pub fn search_cache_key(params: &SearchParams, filter_duplicate_identifiers: bool) -> String {
    let mut parts: Vec<String> = params
        .query_pairs()
        .into_iter()
        .map(|(name, value)| format!("{}={}", name, urlencoding::encode(&value)))
        .collect();
    parts.push(format!("dedup={}", filter_duplicate_identifiers));
    parts.join("&")
}

struct SearchList {
    pages: HashMap<String, Vec<QdnMetadata>>,
    expires_at: i64,
}

/// Search pages grouped per list, plus the optimistic overlay of
/// just-published items per list.
///
/// Page expiry is per list: every write pushes the whole list's expiry
/// forward. Overlay items expire individually.
#[derive(Default)]
pub(crate) struct SearchCache {
    lists: HashMap<String, SearchList>,
    temporary: HashMap<String, Vec<Expiring<QdnMetadata>>>,
}

pub(crate) enum SearchLookup {
    Hit(Vec<QdnMetadata>),
    Miss,
    /// The list had expired and was dropped by this read.
    Expired,
}

impl SearchCache {
    pub fn get(&mut self, list_name: &str, cache_key: &str, now: i64) -> SearchLookup {
        let Some(list) = self.lists.get(list_name) else {
            return SearchLookup::Miss;
        };
        if now > list.expires_at {
            self.lists.remove(list_name);
            return SearchLookup::Expired;
        }
        match list.pages.get(cache_key) {
            Some(items) => SearchLookup::Hit(items.clone()),
            None => SearchLookup::Miss,
        }
    }

    pub fn set(&mut self, list_name: &str, cache_key: String, items: Vec<QdnMetadata>, expires_at: i64) {
        let list = self
            .lists
            .entry(list_name.to_string())
            .or_insert_with(|| SearchList {
                pages: HashMap::new(),
                expires_at,
            });
        list.expires_at = expires_at;
        list.pages.insert(cache_key, items);
    }

    /// A list nobody has written is considered expired.
    pub fn is_list_expired(&self, list_name: &str, now: i64) -> bool {
        self.lists
            .get(list_name)
            .map_or(true, |list| now > list.expires_at)
    }

    pub fn invalidate(&mut self, list_name: &str) -> bool {
        self.lists.remove(list_name).is_some()
    }

    /// Merge `items` into the overlay; on a key clash the newer `created`
    /// wins and its expiry is refreshed.
    pub fn add_temporary(&mut self, list_name: &str, items: Vec<QdnMetadata>, expires_at: i64) {
        let overlay = self.temporary.entry(list_name.to_string()).or_default();
        for item in items {
            let key = item.key();
            match overlay.iter_mut().find(|existing| existing.value.key() == key) {
                Some(existing) => {
                    if item.created >= existing.value.created {
                        *existing = Expiring::new(item, expires_at);
                    }
                }
                None => overlay.push(Expiring::new(item, expires_at)),
            }
        }
    }

    /// Live overlay items, newest first.
    pub fn temporary(&mut self, list_name: &str, now: i64) -> Vec<QdnMetadata> {
        let Some(overlay) = self.temporary.get_mut(list_name) else {
            return Vec::new();
        };
        overlay.retain(|entry| !entry.is_expired(now));
        let mut items: Vec<QdnMetadata> = overlay.iter().map(|entry| entry.value.clone()).collect();
        items.sort_by(|a, b| b.created.cmp(&a.created));
        items
    }

    pub fn sweep(&mut self, now: i64) -> usize {
        let before = self.lists.len();
        self.lists.retain(|_, list| now <= list.expires_at);
        let mut removed = before - self.lists.len();

        for overlay in self.temporary.values_mut() {
            let len = overlay.len();
            overlay.retain(|entry| !entry.is_expired(now));
            removed += len - overlay.len();
        }
        self.temporary.retain(|_, overlay| !overlay.is_empty());
        removed
    }
}
