//! Shared LRU cache of merged leaves.
//!
//! Keyed by node id plus the time window and merge mode the leaf was
//! resolved under — the same leaf yields different merged contents for
//! different windows. The cache is engine-wide and shared across concurrent
//! queries; reads and writes lock only at the cache boundary.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use lru::LruCache;

use crate::flake::{Flake, Tid};
use crate::index::iter::LeafMode;
use crate::index::node::NodeId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct LeafKey {
    node: NodeId,
    newest: Tid,
    oldest: Tid,
    history: bool,
}

impl LeafKey {
    fn new(node: NodeId, mode: LeafMode) -> LeafKey {
        match mode {
            LeafMode::TRange { newest, oldest } => LeafKey {
                node,
                newest,
                oldest,
                history: false,
            },
            LeafMode::History { newest, oldest } => LeafKey {
                node,
                newest,
                oldest,
                history: true,
            },
        }
    }
}

/// Engine-wide cache of merged leaf contents.
#[derive(Debug)]
pub struct NodeCache {
    inner: Mutex<LruCache<LeafKey, Arc<Vec<Flake>>>>,
}

impl NodeCache {
    pub fn new(capacity: usize) -> NodeCache {
        let cap = NonZeroUsize::new(capacity.max(1)).unwrap();
        NodeCache {
            inner: Mutex::new(LruCache::new(cap)),
        }
    }

    pub fn get(&self, node: NodeId, mode: LeafMode) -> Option<Arc<Vec<Flake>>> {
        let hit = self
            .inner
            .lock()
            .unwrap()
            .get(&LeafKey::new(node, mode))
            .cloned();
        if hit.is_some() {
            tracing::trace!(node = node.0, "leaf cache hit");
        }
        hit
    }

    pub fn put(&self, node: NodeId, mode: LeafMode, flakes: Arc<Vec<Flake>>) {
        self.inner
            .lock()
            .unwrap()
            .put(LeafKey::new(node, mode), flakes);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_windows_cache_separately() {
        let cache = NodeCache::new(8);
        let leaf = Arc::new(vec![]);
        let m1 = LeafMode::TRange { newest: -5, oldest: -1 };
        let m2 = LeafMode::TRange { newest: -3, oldest: -1 };
        cache.put(NodeId(1), m1, Arc::clone(&leaf));
        assert!(cache.get(NodeId(1), m1).is_some());
        assert!(cache.get(NodeId(1), m2).is_none());
        // History merges of the same window are distinct entries too.
        let m3 = LeafMode::History { newest: -5, oldest: -1 };
        assert!(cache.get(NodeId(1), m3).is_none());
    }

    #[test]
    fn test_lru_eviction() {
        let cache = NodeCache::new(2);
        let leaf = Arc::new(vec![]);
        let mode = LeafMode::TRange { newest: -1, oldest: -1 };
        for i in 0..3 {
            cache.put(NodeId(i), mode, Arc::clone(&leaf));
        }
        assert_eq!(cache.len(), 2);
        assert!(cache.get(NodeId(0), mode).is_none());
        assert!(cache.get(NodeId(2), mode).is_some());
    }
}
