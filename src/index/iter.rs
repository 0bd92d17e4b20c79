//! Depth-first index-range traversal.
//!
//! [`TreeIter`] walks an index tree left to right, pruning nodes outside
//! the requested range, resolving leaves through the shared cache, and
//! yielding merged leaf contents in index order. Errors end the traversal:
//! the iterator yields the error once and then fuses.
//!
//! Two merge variants serve different consumers:
//! - [`LeafMode::TRange`] — point-in-time and as-of reads: novelty within
//!   the window is merged in, then retraction-shadowed versions are
//!   eliminated so only currently-asserted data survives.
//! - [`LeafMode::History`] — history and commit reconstruction: every
//!   version inside the window survives, asserts and retracts alike.

use std::sync::Arc;

use crate::error::QuadStreamError;
use crate::flake::{Flake, FlakeBound, IndexType, Tid, cmp_flakes};
use crate::index::cache::NodeCache;
use crate::index::node::{ChildRef, Node, NodeStore};

/// Leaf merge mode plus the time window, in internal `t` terms.
///
/// `newest ≤ t ≤ oldest` numerically: `newest` is the most negative bound
/// (latest transaction admitted), `oldest` the least negative (earliest).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeafMode {
    /// Merge novelty, then eliminate retraction-shadowed versions.
    TRange { newest: Tid, oldest: Tid },
    /// Keep every version in the window.
    History { newest: Tid, oldest: Tid },
}

impl LeafMode {
    fn window(self) -> (Tid, Tid) {
        match self {
            LeafMode::TRange { newest, oldest } | LeafMode::History { newest, oldest } => {
                (newest, oldest)
            }
        }
    }
}

/// Merge one leaf's historical flakes with the novelty slice covering the
/// leaf's key range, apply the time window, and (for `TRange`) eliminate
/// shadowed versions.
///
/// `leaf_first` is `None` for the leftmost leaf (it also covers novelty
/// below its first key); `leaf_rhs` is `None` for the rightmost.
pub fn merge_leaf(
    idx: IndexType,
    historical: &[Flake],
    novelty: &[Flake],
    leaf_first: Option<&Flake>,
    leaf_rhs: Option<&Flake>,
    mode: LeafMode,
) -> Vec<Flake> {
    // Slice novelty down to this leaf's key range.
    let lo = leaf_first
        .map(|f| novelty.partition_point(|n| cmp_flakes(idx, n, f) == std::cmp::Ordering::Less))
        .unwrap_or(0);
    let hi = leaf_rhs
        .map(|f| novelty.partition_point(|n| cmp_flakes(idx, n, f) == std::cmp::Ordering::Less))
        .unwrap_or(novelty.len());
    let novelty = &novelty[lo..hi.max(lo)];

    let (newest, oldest) = mode.window();
    let in_window = |f: &Flake| f.t >= newest && f.t <= oldest;

    // Two-way merge of sorted runs.
    let mut merged = Vec::with_capacity(historical.len() + novelty.len());
    let (mut i, mut j) = (0, 0);
    while i < historical.len() || j < novelty.len() {
        let take_hist = match (historical.get(i), novelty.get(j)) {
            (Some(h), Some(n)) => cmp_flakes(idx, h, n) != std::cmp::Ordering::Greater,
            (Some(_), None) => true,
            (None, _) => false,
        };
        let f = if take_hist {
            i += 1;
            &historical[i - 1]
        } else {
            j += 1;
            &novelty[j - 1]
        };
        if in_window(f) {
            merged.push(f.clone());
        }
    }

    match mode {
        LeafMode::History { .. } => merged,
        LeafMode::TRange { .. } => {
            // Versions of one datum are adjacent (every ordering except
            // tspo leads with some permutation of s, p, o, dt) and sort
            // newest-first within the run. tspo scans use History mode.
            debug_assert!(idx != IndexType::Tspo);
            let mut out = Vec::with_capacity(merged.len());
            let mut i = 0;
            while i < merged.len() {
                let mut j = i + 1;
                while j < merged.len() && merged[j].datum_key() == merged[i].datum_key() {
                    j += 1;
                }
                if merged[i].op {
                    out.push(merged[i].clone());
                }
                i = j;
            }
            out
        }
    }
}

/// Depth-first, left-to-right traversal of one index tree.
pub struct TreeIter<'a> {
    idx: IndexType,
    store: &'a dyn NodeStore,
    cache: &'a NodeCache,
    novelty: &'a [Flake],
    mode: LeafMode,
    start: FlakeBound,
    end: FlakeBound,
    parallelism: usize,
    stack: Vec<ChildRef>,
    done: bool,
}

impl<'a> TreeIter<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        idx: IndexType,
        store: &'a dyn NodeStore,
        cache: &'a NodeCache,
        novelty: &'a [Flake],
        mode: LeafMode,
        start: FlakeBound,
        end: FlakeBound,
        parallelism: usize,
        root: ChildRef,
    ) -> TreeIter<'a> {
        TreeIter {
            idx,
            store,
            cache,
            novelty,
            mode,
            start,
            end,
            parallelism: parallelism.max(1),
            stack: vec![root],
            done: false,
        }
    }

    fn resolve_leaf(&self, child: &ChildRef) -> Result<Arc<Vec<Flake>>, QuadStreamError> {
        if let Some(hit) = self.cache.get(child.id, self.mode) {
            return Ok(hit);
        }
        let node = self.store.resolve(child.id)?;
        let Node::Leaf { flakes, .. } = &*node else {
            return Err(QuadStreamError::Internal(format!(
                "node {} marked leaf resolved to a branch",
                child.id.0
            )));
        };
        let first = if child.leftmost { None } else { Some(&child.first) };
        let merged = Arc::new(merge_leaf(
            self.idx,
            flakes,
            self.novelty,
            first,
            child.rhs.as_ref(),
            self.mode,
        ));
        self.cache.put(child.id, self.mode, Arc::clone(&merged));
        Ok(merged)
    }
}

impl Iterator for TreeIter<'_> {
    type Item = Result<Arc<Vec<Flake>>, QuadStreamError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        while let Some(child) = self.stack.pop() {
            if !child.in_range(self.idx, &self.start, &self.end) {
                continue;
            }
            if child.leaf {
                match self.resolve_leaf(&child) {
                    Ok(leaf) if leaf.is_empty() => continue,
                    Ok(leaf) => return Some(Ok(leaf)),
                    Err(e) => {
                        self.done = true;
                        return Some(Err(e));
                    }
                }
            }
            match self.store.resolve(child.id) {
                Ok(node) => match &*node {
                    Node::Branch { children, .. } => {
                        let in_range: Vec<&ChildRef> = children
                            .iter()
                            .filter(|c| c.in_range(self.idx, &self.start, &self.end))
                            .collect();
                        // Read-ahead hint for blocking stores: the first
                        // `parallelism` in-range children may be fetched
                        // concurrently with traversal.
                        let ahead: Vec<_> =
                            in_range.iter().take(self.parallelism).map(|c| c.id).collect();
                        self.store.prefetch(&ahead);
                        // Push right-to-left so the leftmost child pops first.
                        for c in in_range.into_iter().rev() {
                            self.stack.push(c.clone());
                        }
                    }
                    Node::Leaf { .. } => {
                        self.done = true;
                        return Some(Err(QuadStreamError::Internal(format!(
                            "node {} marked branch resolved to a leaf",
                            child.id.0
                        ))));
                    }
                },
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
        None
    }
}
