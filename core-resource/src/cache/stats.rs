use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Point-in-time cache diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub resource_entries: usize,
    pub tombstones: usize,
    pub resource_hits: u64,
    pub resource_misses: u64,
    pub search_hits: u64,
    pub search_misses: u64,
}

impl CacheStats {
    /// Fraction of resource reads served from cache, 0.0 when unused.
    pub fn resource_hit_rate(&self) -> f64 {
        hit_rate(self.resource_hits, self.resource_misses)
    }

    pub fn search_hit_rate(&self) -> f64 {
        hit_rate(self.search_hits, self.search_misses)
    }
}

fn hit_rate(hits: u64, misses: u64) -> f64 {
    let total = hits + misses;
    if total == 0 {
        0.0
    } else {
        hits as f64 / total as f64
    }
}

#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    resource_hits: AtomicU64,
    resource_misses: AtomicU64,
    search_hits: AtomicU64,
    search_misses: AtomicU64,
}

impl StatsCounters {
    pub fn resource(&self, hit: bool) {
        let counter = if hit { &self.resource_hits } else { &self.resource_misses };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn search(&self, hit: bool) {
        let counter = if hit { &self.search_hits } else { &self.search_misses };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, resource_entries: usize, tombstones: usize) -> CacheStats {
        CacheStats {
            resource_entries,
            tombstones,
            resource_hits: self.resource_hits.load(Ordering::Relaxed),
            resource_misses: self.resource_misses.load(Ordering::Relaxed),
            search_hits: self.search_hits.load(Ordering::Relaxed),
            search_misses: self.search_misses.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_rate() {
        let counters = StatsCounters::default();
        assert_eq!(counters.snapshot(0, 0).resource_hit_rate(), 0.0);

        counters.resource(true);
        counters.resource(true);
        counters.resource(false);
        counters.search(false);

        let stats = counters.snapshot(2, 0);
        assert!((stats.resource_hit_rate() - 2.0 / 3.0).abs() < f64::EPSILON);
        assert_eq!(stats.search_hit_rate(), 0.0);
        assert_eq!(stats.search_misses, 1);
    }
}
