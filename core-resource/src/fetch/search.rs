use std::collections::HashSet;

use bridge_traits::{QdnBridgeExt, QdnMetadata, SearchParams};
use tracing::{debug, instrument};

use super::ResourceFetcher;
use crate::cache::{search_cache_key, ReturnType};
use crate::error::Result;

/// Knobs for [`ResourceFetcher::fetch_resources`].
#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    /// Drop queued and in-flight body fetches before searching.
    pub cancel_requests: bool,
    /// Keep only the first result per identifier, across names.
    pub filter_duplicate_identifiers: bool,
    /// Identifiers already shown, excluded when deduplicating.
    pub existing_identifiers: HashSet<String>,
}

impl FetchOptions {
    pub fn with_cancel_requests(mut self) -> Self {
        self.cancel_requests = true;
        self
    }

    pub fn with_duplicate_filter(mut self, existing: HashSet<String>) -> Self {
        self.filter_duplicate_identifiers = true;
        self.existing_identifiers = existing;
        self
    }
}

impl ResourceFetcher {
    /// Search for up to `params.limit` resources (all of them for `0`),
    /// paging backwards by creation time.
    ///
    /// Search failures are returned. Body fetches for the results start in
    /// the background and never fail this call.
    #[instrument(skip(self, params, options), fields(list = list_name))]
    pub async fn fetch_resources(
        &self,
        params: &SearchParams,
        list_name: &str,
        return_type: ReturnType,
        options: FetchOptions,
    ) -> Result<Vec<QdnMetadata>> {
        let cache_key = search_cache_key(params, options.filter_duplicate_identifiers);
        if let Some(cached) = self.inner.cache.get_search(list_name, &cache_key) {
            debug!(count = cached.len(), "Search cache hit");
            return Ok(cached);
        }

        if options.cancel_requests {
            self.cancel_all();
        }

        let target = params.limit;
        let mut seen = options.existing_identifiers;
        let mut collected: Vec<QdnMetadata> = Vec::new();
        let mut cursor = params.before;

        loop {
            let mut page_params = params.clone();
            page_params.before = cursor;
            page_params.limit = if target == 0 { 0 } else { target - collected.len() };

            let page = self.inner.bridge.search_resources(page_params.clone()).await?;
            let fetched = page.len();
            let oldest = page.last().map(|item| item.created);

            for item in page {
                if !self.accept(&item) {
                    continue;
                }
                if options.filter_duplicate_identifiers && !seen.insert(item.identifier.clone()) {
                    continue;
                }
                collected.push(item);
                if target > 0 && collected.len() >= target {
                    break;
                }
            }

            if target == 0 || fetched < page_params.limit || collected.len() >= target {
                break;
            }
            match oldest {
                Some(created) if cursor.map_or(true, |previous| created < previous) => {
                    cursor = Some(created);
                }
                _ => break,
            }
        }

        debug!(count = collected.len(), "Search complete");
        self.inner
            .cache
            .set_search(list_name, cache_key, collected.clone(), None);
        self.warm(&collected, return_type);
        Ok(collected)
    }

    /// Page through a list the caller already holds, using
    /// `params.offset`/`params.limit` instead of a search.
    #[instrument(skip(self, params, resources), fields(list = list_name, total = resources.len()))]
    pub fn fetch_preloaded_resources(
        &self,
        params: &SearchParams,
        resources: &[QdnMetadata],
        list_name: &str,
        return_type: ReturnType,
    ) -> Vec<QdnMetadata> {
        let cache_key = search_cache_key(params, false);
        if let Some(cached) = self.inner.cache.get_search(list_name, &cache_key) {
            return cached;
        }

        let offset = params.offset.unwrap_or(0);
        let limit = if params.limit == 0 { usize::MAX } else { params.limit };
        let page: Vec<QdnMetadata> = resources
            .iter()
            .skip(offset)
            .take(limit)
            .filter(|item| self.accept(item))
            .cloned()
            .collect();

        self.inner
            .cache
            .set_search(list_name, cache_key, page.clone(), None);
        self.warm(&page, return_type);
        page
    }
}
