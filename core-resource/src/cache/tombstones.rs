use std::collections::HashMap;

use bridge_traits::ResourceKey;

/// Keys deleted in this session, hidden from every list until they expire.
#[derive(Default)]
pub(crate) struct Tombstones {
    entries: HashMap<ResourceKey, i64>,
}

impl Tombstones {
    /// Prunes expired tombstones before recording the new ones.
    pub fn mark<I>(&mut self, keys: I, now: i64, expires_at: i64)
    where
        I: IntoIterator<Item = ResourceKey>,
    {
        self.prune(now);
        for key in keys {
            self.entries.insert(key, expires_at);
        }
    }

    pub fn is_deleted(&self, key: &ResourceKey, now: i64) -> bool {
        self.entries
            .get(key)
            .is_some_and(|&expires_at| now <= expires_at)
    }

    pub fn prune(&mut self, now: i64) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, expires_at| now <= *expires_at);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_traits::Service;

    fn key(id: &str) -> ResourceKey {
        ResourceKey::new(Service::Image, "bob", id)
    }

    #[test]
    fn test_tombstone_hides_until_expiry() {
        let mut tombstones = Tombstones::default();
        tombstones.mark([key("a")], 0, 300);

        assert!(tombstones.is_deleted(&key("a"), 300));
        assert!(!tombstones.is_deleted(&key("b"), 300));
        assert!(!tombstones.is_deleted(&key("a"), 301));
    }

    #[test]
    fn test_marking_prunes_expired_entries() {
        let mut tombstones = Tombstones::default();
        tombstones.mark([key("a")], 0, 10);
        tombstones.mark([key("b")], 20, 40);
        assert_eq!(tombstones.len(), 1);
    }
}
