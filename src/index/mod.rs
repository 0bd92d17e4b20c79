//! Index trees: node model, resolution, and range traversal.
//!
//! Each of the five covering indexes is a B+-tree-like structure of
//! branches and leaves, keyed by that index's flake ordering. The logical
//! flake set of an index is the union of its historical leaves and its
//! in-memory novelty (uncommitted flakes), filtered by the query's time
//! window and by policy. Leaves are merged with novelty at resolution time;
//! merged leaves are cached in a shared LRU keyed by node id and time
//! window.
//!
//! # Submodules
//! - `node` — node model and the [`node::NodeStore`] resolution trait
//! - `memory` — in-memory backend used for embedding, tests, and benches
//! - `cache` — shared LRU of merged leaves
//! - `iter` — depth-first range traversal ([`iter::TreeIter`])

pub mod cache;
pub mod iter;
pub mod memory;
pub mod node;

pub use cache::NodeCache;
pub use iter::{LeafMode, TreeIter};
pub use memory::{MemoryStore, MemoryStoreBuilder};
pub use node::{ChildRef, Node, NodeId, NodeStore};

use crate::flake::{Flake, IndexType};

/// One index of a db snapshot: a root handle plus this index's novelty,
/// sorted under the index's ordering.
#[derive(Debug, Clone)]
pub struct IndexRoot {
    pub idx: IndexType,
    pub root: ChildRef,
    /// Uncommitted flakes, sorted under `idx`.
    pub novelty: std::sync::Arc<Vec<Flake>>,
}
