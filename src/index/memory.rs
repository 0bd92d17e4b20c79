//! In-memory index backend.
//!
//! Builds two-level trees (one branch root over leaf chunks) from sorted
//! flake vectors. Sufficient for embedding the engine without a persistence
//! layer, and the backend every test and bench runs against. Durable
//! backends implement [`NodeStore`] externally.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::QuadStreamError;
use crate::flake::{Flake, IndexType, sort_flakes};
use crate::index::node::{ChildRef, Node, NodeId, NodeStore};

/// Default number of flakes per leaf.
pub const DEFAULT_LEAF_SIZE: usize = 512;

/// Immutable in-memory node store shared by all five indexes of a db.
#[derive(Debug, Default)]
pub struct MemoryStore {
    nodes: HashMap<NodeId, Arc<Node>>,
}

impl NodeStore for MemoryStore {
    fn resolve(&self, id: NodeId) -> Result<Arc<Node>, QuadStreamError> {
        self.nodes
            .get(&id)
            .cloned()
            .ok_or_else(|| QuadStreamError::Storage(format!("unknown node id {}", id.0)))
    }
}

/// Builds a [`MemoryStore`] and per-index roots.
pub struct MemoryStoreBuilder {
    next_id: u64,
    leaf_size: usize,
    nodes: HashMap<NodeId, Arc<Node>>,
}

impl MemoryStoreBuilder {
    pub fn new() -> MemoryStoreBuilder {
        MemoryStoreBuilder {
            next_id: 1,
            leaf_size: DEFAULT_LEAF_SIZE,
            nodes: HashMap::new(),
        }
    }

    pub fn leaf_size(mut self, leaf_size: usize) -> MemoryStoreBuilder {
        self.leaf_size = leaf_size.max(1);
        self
    }

    fn alloc(&mut self) -> NodeId {
        let id = NodeId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Chunk `flakes` into leaves under `idx`'s ordering and return the
    /// root handle. An empty index becomes a single empty leaf so traversal
    /// needs no special case.
    pub fn build_tree(&mut self, idx: IndexType, mut flakes: Vec<Flake>) -> ChildRef {
        sort_flakes(idx, &mut flakes);

        if flakes.is_empty() {
            let id = self.alloc();
            self.nodes.insert(id, Arc::new(Node::Leaf { id, flakes: vec![] }));
            // The boundary flake of an empty leaf is never consulted: the
            // leaf is both leftmost and rightmost.
            let first = Flake::new(0, 0, crate::flake::Object::Null, 0, 0, true, 0);
            return ChildRef { id, first, rhs: None, leftmost: true, leaf: true };
        }

        // Chunk on datum boundaries: versions of one `(s, p, o, dt)` datum
        // must land in the same leaf, or per-leaf shadow elimination could
        // miss a retraction sitting in the next leaf.
        let mut chunks: Vec<&[Flake]> = Vec::new();
        let mut lo = 0;
        while lo < flakes.len() {
            let mut hi = (lo + self.leaf_size).min(flakes.len());
            while hi < flakes.len() && flakes[hi].datum_key() == flakes[hi - 1].datum_key() {
                hi += 1;
            }
            chunks.push(&flakes[lo..hi]);
            lo = hi;
        }
        let mut children = Vec::with_capacity(chunks.len());
        for (i, chunk) in chunks.iter().enumerate() {
            let id = self.alloc();
            let first = chunk[0].clone();
            let rhs = chunks.get(i + 1).map(|next| next[0].clone());
            self.nodes.insert(
                id,
                Arc::new(Node::Leaf { id, flakes: chunk.to_vec() }),
            );
            children.push(ChildRef { id, first, rhs, leftmost: i == 0, leaf: true });
        }

        if children.len() == 1 {
            return children.into_iter().next().unwrap();
        }

        let root_id = self.alloc();
        let first = children[0].first.clone();
        self.nodes.insert(
            root_id,
            Arc::new(Node::Branch { id: root_id, children }),
        );
        ChildRef { id: root_id, first, rhs: None, leftmost: true, leaf: false }
    }

    pub fn finish(self) -> MemoryStore {
        MemoryStore { nodes: self.nodes }
    }
}

impl Default for MemoryStoreBuilder {
    fn default() -> Self {
        MemoryStoreBuilder::new()
    }
}
