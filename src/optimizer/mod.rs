//! Query optimization: pattern reordering, filter inlining, property-join
//! grouping, and the explain report.
//!
//! Optimization runs after parsing, before execution, and is semantics
//! preserving: the result multiset of an optimized query equals the
//! original's. Passes run in a fixed order — reorder (statistics), inline
//! (filters become component hooks), group (co-subject triples fuse into
//! property joins) — because inlining must see the final pattern order and
//! grouping must skip patterns that carry component hooks.
//!
//! # Submodules
//! - `reorder` — segment split and selectivity scoring
//! - `inline` — filter inlining and object-range lowering
//! - `group` — property-join grouping

pub mod group;
pub mod inline;
pub mod reorder;

use serde::Serialize;

use crate::db::Db;
use crate::error::QuadStreamError;
use crate::query::{ParsedQuery, Pattern, TriplePart, TriplePattern};

/// Which optimizations fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OptKind {
    Statistics,
    Heuristics,
    None,
}

/// Selectivity inputs recorded per pattern, in original order.
#[derive(Debug, Clone, Serialize)]
pub struct PatternReport {
    pub label: String,
    pub score: f64,
    pub count: Option<u64>,
    pub ndv: Option<u64>,
    /// The fixed fallback score was used (no statistics for the pattern).
    pub fallback: bool,
    /// The computed score was clamped up to 1.
    pub clamped: bool,
}

/// The explain plan.
#[derive(Debug, Clone, Serialize)]
pub struct Plan {
    pub patterns: Vec<PatternReport>,
    pub optimized: Vec<String>,
    /// Half-open `[start, end)` spans of optimizable segments in the
    /// original clause.
    pub segments: Vec<(usize, usize)>,
    pub fired: Vec<OptKind>,
}

/// `explain` output: the query echo plus the plan.
#[derive(Debug, Clone, Serialize)]
pub struct Explain {
    pub query: serde_json::Value,
    pub plan: Plan,
}

/// Optimize a parsed query. Returns the rewritten query and its plan.
pub fn optimize(db: &Db, q: &ParsedQuery) -> Result<(ParsedQuery, Plan), QuadStreamError> {
    q.validate()?;
    let mut out = q.clone();
    let seed = bound_seed(&out);

    let clause = std::mem::take(&mut out.where_clause);
    let (clause, reports, segments, reordered) = reorder::reorder(db, clause, &seed);
    out.where_clause = clause;

    let inlined = inline::inline_filters(&mut out.where_clause, &seed);
    let grouped = group::group_property_joins(&mut out.where_clause);

    let mut fired = Vec::new();
    if reordered {
        fired.push(OptKind::Statistics);
    }
    if inlined || grouped {
        fired.push(OptKind::Heuristics);
    }
    if fired.is_empty() {
        fired.push(OptKind::None);
    }

    // The rewrites may drop filters into hooks and fuse tuples, but they
    // must never lose a pattern's semantics entirely.
    let before = count_leaves(q.where_clause.as_slice());
    let after = count_leaves(out.where_clause.as_slice());
    if after > before {
        return Err(QuadStreamError::OptimizationFailure(format!(
            "rewrite grew the clause: {before} leaves before, {after} after"
        )));
    }

    let plan = Plan {
        patterns: reports,
        optimized: out.where_clause.iter().map(|p| pattern_label(p, &out)).collect(),
        segments,
        fired,
    };
    tracing::debug!(?plan.fired, segments = plan.segments.len(), "optimized query");
    Ok((out, plan))
}

/// The explain path: optimize without executing.
pub fn explain(db: &Db, q: &ParsedQuery) -> Result<Explain, QuadStreamError> {
    let (optimized, plan) = optimize(db, q)?;
    let query = serde_json::json!({
        "where": q.where_clause.iter().map(|p| pattern_label(p, q)).collect::<Vec<_>>(),
        "select": optimized.select.selectors().len(),
        "group-by": optimized.group_by.len(),
        "order-by": optimized.order_by.len(),
    });
    Ok(Explain { query, plan })
}

/// Variables bound before the where-clause runs (`VALUES`).
fn bound_seed(q: &ParsedQuery) -> Vec<crate::query::Var> {
    q.values.iter().map(|(v, _)| *v).collect()
}

fn count_leaves(clause: &[Pattern]) -> usize {
    clause
        .iter()
        .map(|p| match p {
            Pattern::Union(branches) => branches.iter().map(|b| count_leaves(b)).sum(),
            Pattern::Optional(c)
            | Pattern::Minus(c)
            | Pattern::Exists(c)
            | Pattern::NotExists(c)
            | Pattern::Graph { clause: c, .. } => count_leaves(c),
            Pattern::PropertyJoin { triples, .. } => triples.len(),
            _ => 1,
        })
        .sum()
}

/// Human-readable pattern label for plans and logs.
pub fn pattern_label(p: &Pattern, q: &ParsedQuery) -> String {
    let part = |tp: &TriplePart| match tp {
        TriplePart::Var(v) => q.vars.name(*v).to_string(),
        TriplePart::Val { value, .. } => format!("{value:?}"),
        TriplePart::Iri(iri) => iri.clone(),
    };
    let triple = |t: &TriplePattern| {
        format!("[{} {} {}]", part(&t.s.part), part(&t.p.part), part(&t.o.part))
    };
    match p {
        Pattern::Tuple(t) => triple(t),
        Pattern::Class(t) => format!("class {}", triple(t)),
        Pattern::Id { s } => format!("id {}", part(&s.part)),
        Pattern::Filter(f) => format!("filter {}", f.src),
        Pattern::Bind { var, expr } => format!("bind {} {}", q.vars.name(*var), expr.src),
        Pattern::Union(branches) => format!("union({})", branches.len()),
        Pattern::Optional(_) => "optional".to_string(),
        Pattern::Minus(_) => "minus".to_string(),
        Pattern::Exists(_) => "exists".to_string(),
        Pattern::NotExists(_) => "not-exists".to_string(),
        Pattern::Graph { alias, .. } => format!("graph {alias:?}"),
        Pattern::PropertyJoin { subject, triples } => {
            format!("property-join {} ({})", q.vars.name(*subject), triples.len())
        }
    }
}
