//! Two-generation record cache
//!
//! A capacity-bounded cache approximating LRU with two wholesale
//! generations: inserts go to the primary map; once the primary exceeds its
//! capacity it is demoted in one step to the backup generation (replacing
//! the previous backup) and a fresh primary is started. Lookups consult the
//! primary, then the backup. Entries are never promoted back; a backup hit
//! survives exactly one further demotion cycle.

use crate::hash::ObjectHash;
use crate::record::NodeRecord;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Two-generation cache of records keyed by content hash
#[derive(Debug)]
pub struct GenerationCache {
    capacity: usize,
    inner: Mutex<Generations>,
}

#[derive(Debug, Default)]
struct Generations {
    primary: HashMap<ObjectHash, Arc<NodeRecord>>,
    backup: HashMap<ObjectHash, Arc<NodeRecord>>,
}

impl GenerationCache {
    /// Create a cache; `capacity` bounds the primary generation
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(Generations::default()),
        }
    }

    /// Look up a record in either generation
    #[must_use]
    pub fn get(&self, hash: &ObjectHash) -> Option<Arc<NodeRecord>> {
        let inner = self.inner.lock();
        inner
            .primary
            .get(hash)
            .or_else(|| inner.backup.get(hash))
            .cloned()
    }

    /// Insert a record, demoting the primary generation if it is full
    pub fn insert(&self, hash: ObjectHash, record: Arc<NodeRecord>) {
        let mut inner = self.inner.lock();
        if inner.primary.len() >= self.capacity && !inner.primary.contains_key(&hash) {
            tracing::trace!(
                demoted = inner.primary.len(),
                "cache primary generation full, demoting to backup"
            );
            inner.backup = std::mem::take(&mut inner.primary);
        }
        inner.primary.insert(hash, record);
    }

    /// Number of records across both generations (keys may overlap)
    #[must_use]
    pub fn len(&self) -> usize {
        let inner = self.inner.lock();
        inner.primary.len() + inner.backup.len()
    }

    /// Whether both generations are empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        let inner = self.inner.lock();
        inner.primary.is_empty() && inner.backup.is_empty()
    }

    /// Drop both generations
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.primary.clear();
        inner.backup.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::Relid;
    use crate::record::{NodeData, NodeRecord};

    fn record(tag: u64) -> (ObjectHash, Arc<NodeRecord>) {
        let mut data = NodeData::new(Relid::from_index(tag), None);
        data.attributes
            .insert("tag".into(), serde_json::json!(tag));
        let record = NodeRecord::leaf(data);
        let hash = record.compute_hash().unwrap();
        (hash, Arc::new(record))
    }

    #[test]
    fn cache_hit_and_miss() {
        let cache = GenerationCache::new(4);
        let (hash, rec) = record(1);
        assert!(cache.get(&hash).is_none());
        cache.insert(hash, rec.clone());
        assert_eq!(cache.get(&hash).unwrap(), rec);
    }

    #[test]
    fn cache_demotes_wholesale() {
        let cache = GenerationCache::new(2);
        let (h1, r1) = record(1);
        let (h2, r2) = record(2);
        let (h3, r3) = record(3);
        cache.insert(h1, r1);
        cache.insert(h2, r2);
        // Third insert trips the capacity: {1,2} become the backup generation.
        cache.insert(h3, r3);
        assert!(cache.get(&h1).is_some());
        assert!(cache.get(&h2).is_some());
        assert!(cache.get(&h3).is_some());

        // Filling the primary again replaces the backup; the first
        // generation is gone for good.
        let (h4, r4) = record(4);
        let (h5, r5) = record(5);
        cache.insert(h4, r4);
        cache.insert(h5, r5);
        assert!(cache.get(&h1).is_none());
        assert!(cache.get(&h2).is_none());
        assert!(cache.get(&h3).is_some());
    }

    #[test]
    fn cache_reinsert_does_not_demote() {
        let cache = GenerationCache::new(2);
        let (h1, r1) = record(1);
        let (h2, r2) = record(2);
        cache.insert(h1, r1.clone());
        cache.insert(h2, r2);
        // Overwriting an existing key must not trip demotion.
        cache.insert(h1, r1);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn cache_clear() {
        let cache = GenerationCache::new(2);
        let (h1, r1) = record(1);
        cache.insert(h1, r1);
        cache.clear();
        assert!(cache.is_empty());
    }
}
