//! Index node model and the resolution contract.

use std::sync::Arc;

use crate::error::QuadStreamError;
use crate::flake::{Flake, FlakeBound, IndexType, Pad, cmp_to_bound};

/// Opaque handle of one index node within a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u64);

/// Unresolved reference to a child node, carrying the boundary metadata
/// needed for range pruning without resolving the child.
#[derive(Debug, Clone)]
pub struct ChildRef {
    pub id: NodeId,
    /// Lower bound: the first flake at or under this node.
    pub first: Flake,
    /// Upper bound: the first flake of the right sibling, `None` for the
    /// rightmost node at this level.
    pub rhs: Option<Flake>,
    /// Whether this node is the leftmost at its level. The leftmost node
    /// also covers everything below its `first` (novelty may sort there).
    pub leftmost: bool,
    pub leaf: bool,
}

impl ChildRef {
    /// Range pruning:
    /// `in_range = !((rhs exists ∧ rhs < start) ∨ (¬leftmost ∧ first > end))`
    /// under the index's comparator.
    pub fn in_range(&self, idx: IndexType, start: &FlakeBound, end: &FlakeBound) -> bool {
        if let Some(rhs) = &self.rhs
            && cmp_to_bound(idx, rhs, start, Pad::Min) == std::cmp::Ordering::Less
        {
            return false;
        }
        if !self.leftmost
            && cmp_to_bound(idx, &self.first, end, Pad::Max) == std::cmp::Ordering::Greater
        {
            return false;
        }
        true
    }
}

/// A resolved index node.
#[derive(Debug)]
pub enum Node {
    Branch {
        id: NodeId,
        /// Children in index order, left to right.
        children: Vec<ChildRef>,
    },
    Leaf {
        id: NodeId,
        /// Historical flakes, sorted under the index's ordering.
        flakes: Vec<Flake>,
    },
}

impl Node {
    pub fn id(&self) -> NodeId {
        match self {
            Node::Branch { id, .. } | Node::Leaf { id, .. } => *id,
        }
    }
}

/// Resolves node handles to nodes. Resolution may block (disk or remote
/// fetch); callers front it with the shared [`super::NodeCache`].
///
/// `prefetch` is a read-ahead hint: the traversal passes the next in-range
/// sibling handles, bounded by the query's parallelism, so a blocking
/// backend can overlap fetches. Stores may ignore it.
pub trait NodeStore: Send + Sync {
    fn resolve(&self, id: NodeId) -> Result<Arc<Node>, QuadStreamError>;

    fn prefetch(&self, _ids: &[NodeId]) {}
}
