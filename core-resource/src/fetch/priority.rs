//! Weighted merge of several search sources into one feed.

use std::collections::HashSet;

use bridge_traits::{QdnBridgeExt, QdnMetadata, ResourceKey, SearchParams};
use core_encoding::{build_search_prefix, ParentScope};
use futures::future::join_all;
use tracing::{debug, instrument};

use super::ResourceFetcher;
use crate::cache::ReturnType;
use crate::error::{ResourceError, Result};

/// Search parameters derived from an app's entity type, resolved to an
/// identifier prefix at fetch time.
#[derive(Debug, Clone)]
pub struct EntityQuery {
    pub app_name: String,
    pub public_salt: String,
    pub entity_type: String,
    pub parent: ParentScope,
    /// Everything except the identifier prefix.
    pub base: SearchParams,
}

impl EntityQuery {
    fn resolve(&self) -> Result<SearchParams> {
        let prefix = build_search_prefix(
            &self.app_name,
            &self.public_salt,
            &self.entity_type,
            &self.parent,
        )?;
        let mut params = self.base.clone();
        params.identifier = Some(prefix);
        params.prefix = true;
        Ok(params)
    }
}

#[derive(Debug, Clone)]
pub enum SourceQuery {
    Search(SearchParams),
    Entity(EntityQuery),
}

#[derive(Debug, Clone)]
pub struct PrioritySource {
    /// Stable name; pagination state is kept per list and source key.
    pub key: String,
    /// Relative share of the merged page. Must be at least 1.
    pub priority: u32,
    pub query: SourceQuery,
}

#[derive(Debug, Clone)]
pub struct PriorityRequest {
    pub list_name: String,
    pub target_limit: usize,
    pub sources: Vec<PrioritySource>,
    pub filter_duplicate_identifiers: bool,
    /// Identifiers already shown in earlier pages.
    pub existing_identifiers: HashSet<String>,
    /// Continue each source from where the previous page stopped instead of
    /// starting over.
    pub load_more: bool,
    pub return_type: ReturnType,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PriorityPage {
    pub items: Vec<QdnMetadata>,
    /// Every source has run out of results.
    pub exhausted: bool,
}

/// Pagination state of one source within one list.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct SourceCursor {
    pub before: Option<i64>,
    pub exhausted: bool,
}

pub(crate) struct SourceBatch {
    pub priority: u32,
    pub items: Vec<QdnMetadata>,
    /// The search returned fewer results than asked for.
    pub reached_end: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct SourceUsage {
    pub taken: usize,
    pub last_used: Option<i64>,
    pub consumed_all: bool,
}

/// `round(priority / total * target)` per source.
pub(crate) fn proportional_targets(priorities: &[u32], target: usize) -> Vec<usize> {
    let total: u64 = priorities.iter().map(|&p| u64::from(p)).sum();
    if total == 0 {
        return vec![0; priorities.len()];
    }
    priorities
        .iter()
        .map(|&p| ((f64::from(p) / total as f64) * target as f64).round() as usize)
        .collect()
}

struct Merger<'a> {
    batches: &'a [SourceBatch],
    filter_duplicate_identifiers: bool,
    positions: Vec<usize>,
    usage: Vec<SourceUsage>,
    seen_keys: HashSet<ResourceKey>,
    seen_identifiers: HashSet<String>,
    merged: Vec<QdnMetadata>,
}

impl<'a> Merger<'a> {
    /// Take the next unseen item from source `index`. `false` once drained.
    fn take_next(&mut self, index: usize) -> bool {
        let items = &self.batches[index].items;
        while self.positions[index] < items.len() {
            let item = &items[self.positions[index]];
            self.positions[index] += 1;

            let key = item.key();
            if self.seen_keys.contains(&key) {
                continue;
            }
            if self.filter_duplicate_identifiers && self.seen_identifiers.contains(&item.identifier) {
                continue;
            }
            self.seen_keys.insert(key);
            self.seen_identifiers.insert(item.identifier.clone());
            self.usage[index].taken += 1;
            self.usage[index].last_used = Some(item.created);
            self.merged.push(item.clone());
            return true;
        }
        false
    }
}

/// Round-robin over sources in weighted batches until each reaches its
/// proportional share, then top up from whatever is left.
pub(crate) fn merge_weighted(
    batches: &[SourceBatch],
    target: usize,
    filter_duplicate_identifiers: bool,
    existing_identifiers: &HashSet<String>,
) -> (Vec<QdnMetadata>, Vec<SourceUsage>) {
    let priorities: Vec<u32> = batches.iter().map(|batch| batch.priority).collect();
    let targets = proportional_targets(&priorities, target);

    let mut merger = Merger {
        batches,
        filter_duplicate_identifiers,
        positions: vec![0; batches.len()],
        usage: vec![SourceUsage::default(); batches.len()],
        seen_keys: HashSet::new(),
        seen_identifiers: if filter_duplicate_identifiers {
            existing_identifiers.clone()
        } else {
            HashSet::new()
        },
        merged: Vec::with_capacity(target),
    };

    loop {
        let mut progressed = false;
        for index in 0..batches.len() {
            let mut batch = 0;
            while batch < batches[index].priority
                && merger.usage[index].taken < targets[index]
                && merger.merged.len() < target
            {
                if !merger.take_next(index) {
                    break;
                }
                batch += 1;
                progressed = true;
            }
        }
        if !progressed || merger.merged.len() >= target {
            break;
        }
    }

    while merger.merged.len() < target {
        let mut progressed = false;
        for index in 0..batches.len() {
            if merger.merged.len() >= target {
                break;
            }
            progressed |= merger.take_next(index);
        }
        if !progressed {
            break;
        }
    }

    for (index, usage) in merger.usage.iter_mut().enumerate() {
        usage.consumed_all = merger.positions[index] >= batches[index].items.len();
    }
    (merger.merged, merger.usage)
}

impl SourceCursor {
    /// Advance past what the merged page actually used. A fully consumed
    /// batch moves to its oldest item so duplicates are not fetched again.
    fn advance(&mut self, batch: &SourceBatch, usage: &SourceUsage) {
        if usage.consumed_all {
            if let Some(oldest) = batch.items.last() {
                self.before = Some(oldest.created);
            }
            self.exhausted = batch.reached_end;
        } else if let Some(last_used) = usage.last_used {
            self.before = Some(last_used);
        }
    }
}

impl ResourceFetcher {
    /// Build one page from several weighted sources.
    ///
    /// Sources are searched in parallel, each from its own cursor. Cursors
    /// only move past items that made it into the page.
    #[instrument(skip(self, request), fields(list = %request.list_name, sources = request.sources.len()))]
    pub async fn fetch_resources_with_priority(
        &self,
        request: &PriorityRequest,
    ) -> Result<PriorityPage> {
        if request.sources.is_empty() {
            return Err(ResourceError::InvalidArgument(
                "at least one source is required".to_string(),
            ));
        }
        if request.target_limit == 0 {
            return Err(ResourceError::InvalidArgument(
                "target limit must be at least 1".to_string(),
            ));
        }
        if let Some(source) = request.sources.iter().find(|s| s.priority == 0) {
            return Err(ResourceError::InvalidArgument(format!(
                "source `{}` has zero priority",
                source.key
            )));
        }

        let cursor_keys: Vec<(String, String)> = request
            .sources
            .iter()
            .map(|source| (request.list_name.clone(), source.key.clone()))
            .collect();
        let cursors: Vec<SourceCursor> = {
            let mut all = self.inner.cursors.lock();
            if !request.load_more {
                for key in &cursor_keys {
                    all.remove(key);
                }
            }
            cursor_keys
                .iter()
                .map(|key| all.get(key).cloned().unwrap_or_default())
                .collect()
        };

        let mut active: Vec<usize> = Vec::new();
        let mut searches = Vec::new();
        for (index, source) in request.sources.iter().enumerate() {
            if cursors[index].exhausted {
                continue;
            }
            let mut params = match &source.query {
                SourceQuery::Search(params) => params.clone(),
                SourceQuery::Entity(entity) => entity.resolve()?,
            };
            params.before = cursors[index].before.or(params.before);
            params.limit = request.target_limit;
            active.push(index);
            searches.push(async move { self.inner.bridge.search_resources(params).await });
        }

        if active.is_empty() {
            return Ok(PriorityPage {
                items: Vec::new(),
                exhausted: true,
            });
        }

        let results = join_all(searches).await;
        let mut batches = Vec::with_capacity(active.len());
        for (&index, result) in active.iter().zip(results) {
            let fetched = result?;
            let reached_end = fetched.len() < request.target_limit;
            let items: Vec<QdnMetadata> = fetched.into_iter().filter(|item| self.accept(item)).collect();
            batches.push(SourceBatch {
                priority: request.sources[index].priority,
                items,
                reached_end,
            });
        }

        let (items, usage) = merge_weighted(
            &batches,
            request.target_limit,
            request.filter_duplicate_identifiers,
            &request.existing_identifiers,
        );

        let exhausted = {
            let mut all = self.inner.cursors.lock();
            for (position, &index) in active.iter().enumerate() {
                let mut cursor = cursors[index].clone();
                cursor.advance(&batches[position], &usage[position]);
                all.insert(cursor_keys[index].clone(), cursor);
            }
            cursor_keys
                .iter()
                .all(|key| all.get(key).is_some_and(|cursor| cursor.exhausted))
        };

        debug!(count = items.len(), exhausted, "Merged priority page");
        let page_key = priority_cache_key(request, &cursors);
        self.inner
            .cache
            .set_search(&request.list_name, page_key, items.clone(), None);
        self.warm(&items, request.return_type);

        Ok(PriorityPage { items, exhausted })
    }

    /// Forget pagination state for every source of `list_name`.
    pub fn reset_priority_cursors(&self, list_name: &str) {
        self.inner
            .cursors
            .lock()
            .retain(|(list, _), _| list != list_name);
    }
}

fn priority_cache_key(request: &PriorityRequest, cursors: &[SourceCursor]) -> String {
    let parts: Vec<String> = request
        .sources
        .iter()
        .zip(cursors)
        .map(|(source, cursor)| {
            format!(
                "{}:{}:{}",
                source.key,
                source.priority,
                cursor.before.map_or_else(|| "-".to_string(), |b| b.to_string())
            )
        })
        .collect();
    format!(
        "priority|{}|limit={}|dedup={}",
        parts.join(","),
        request.target_limit,
        request.filter_duplicate_identifiers
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_traits::Service;

    fn items(name: &str, count: usize, newest: i64) -> Vec<QdnMetadata> {
        (0..count)
            .map(|i| {
                QdnMetadata::new(
                    ResourceKey::new(Service::Video, name, format!("{}-{}", name, i)),
                    1_000,
                    newest - i as i64,
                )
            })
            .collect()
    }

    fn batch(priority: u32, items: Vec<QdnMetadata>, reached_end: bool) -> SourceBatch {
        SourceBatch {
            priority,
            items,
            reached_end,
        }
    }

    #[test]
    fn test_proportional_targets_round() {
        assert_eq!(proportional_targets(&[3, 1], 20), vec![15, 5]);
        assert_eq!(proportional_targets(&[1, 1, 1], 10), vec![3, 3, 3]);
        assert_eq!(proportional_targets(&[2, 1], 10), vec![7, 3]);
    }

    #[test]
    fn test_merge_respects_weights() {
        let batches = vec![
            batch(3, items("alice", 20, 1_000), false),
            batch(1, items("bob", 20, 1_000), false),
        ];
        let (merged, usage) = merge_weighted(&batches, 20, false, &HashSet::new());

        assert_eq!(merged.len(), 20);
        assert_eq!(usage[0].taken, 15);
        assert_eq!(usage[1].taken, 5);
        // first round: three from alice, then one from bob
        let names: Vec<&str> = merged.iter().take(4).map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["alice", "alice", "alice", "bob"]);
    }

    #[test]
    fn test_merge_fills_from_other_sources_when_one_runs_dry() {
        let batches = vec![
            batch(3, items("alice", 4, 1_000), true),
            batch(1, items("bob", 20, 1_000), false),
        ];
        let (merged, usage) = merge_weighted(&batches, 10, false, &HashSet::new());

        assert_eq!(merged.len(), 10);
        assert_eq!(usage[0].taken, 4);
        assert!(usage[0].consumed_all);
        assert_eq!(usage[1].taken, 6);
    }

    #[test]
    fn test_merge_drops_duplicate_identifiers_across_names() {
        let mut shared = items("bob", 3, 500);
        for item in shared.iter_mut() {
            item.identifier = item.identifier.replace("bob", "alice");
        }
        let batches = vec![
            batch(1, items("alice", 3, 1_000), true),
            batch(1, shared, true),
        ];

        let (with_filter, _) = merge_weighted(&batches, 10, true, &HashSet::new());
        assert_eq!(with_filter.len(), 3);

        let (without_filter, _) = merge_weighted(&batches, 10, false, &HashSet::new());
        assert_eq!(without_filter.len(), 6);
    }

    #[test]
    fn test_merge_never_repeats_a_key() {
        let same = items("alice", 5, 1_000);
        let batches = vec![batch(2, same.clone(), true), batch(1, same, true)];
        let (merged, _) = merge_weighted(&batches, 10, false, &HashSet::new());

        let keys: HashSet<ResourceKey> = merged.iter().map(QdnMetadata::key).collect();
        assert_eq!(keys.len(), merged.len());
        assert_eq!(merged.len(), 5);
    }

    #[test]
    fn test_cursor_stops_at_last_used_item() {
        let source = items("alice", 10, 1_000);
        let batches = vec![
            batch(1, source, false),
            batch(1, items("bob", 10, 1_000), false),
        ];
        let (_, usage) = merge_weighted(&batches, 6, false, &HashSet::new());

        let mut cursor = SourceCursor::default();
        cursor.advance(&batches[0], &usage[0]);
        // alice contributed 998..=1000
        assert_eq!(cursor.before, Some(998));
        assert!(!cursor.exhausted);
    }

    #[test]
    fn test_cursor_exhausts_when_end_reached_and_consumed() {
        let batches = vec![batch(1, items("alice", 2, 50), true)];
        let (_, usage) = merge_weighted(&batches, 10, false, &HashSet::new());

        let mut cursor = SourceCursor::default();
        cursor.advance(&batches[0], &usage[0]);
        assert_eq!(cursor.before, Some(49));
        assert!(cursor.exhausted);
    }

    #[test]
    fn test_entity_query_resolves_prefix() {
        let query = EntityQuery {
            app_name: "myapp".to_string(),
            public_salt: "salt".to_string(),
            entity_type: "video".to_string(),
            parent: ParentScope::Id("parent-1".to_string()),
            base: SearchParams::for_service(Service::Video),
        };
        let params = query.resolve().unwrap();
        assert_eq!(
            params.identifier.as_deref(),
            Some("N9u~H~rs-kh~urJ-tZIDB62~0Xaf0O-")
        );
        assert!(params.prefix);
    }
}
