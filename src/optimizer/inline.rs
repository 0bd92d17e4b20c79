//! Filter inlining and object-range lowering.
//!
//! A standalone filter whose variables are all bound by top-level patterns
//! is attached as a component hook to the *latest* pattern binding any of
//! them, and the standalone pattern is elided. The hook runs per candidate
//! value while flakes stream, so non-matching flakes never extend a
//! solution.
//!
//! Single-variable comparison filters additionally lower to tightened scan
//! bounds on the object slot. Lowering is conservative — the hook stays
//! attached, so a boundary value the index still returns is rejected by
//! the filter — and strictness against integral bounds is adjusted so
//! integer and double representations of the boundary are both excluded.

use std::sync::Arc;

use crate::exec::filter::{CompiledFilter, FilterExpr, FilterOp, FilterValue};
use crate::flake::Object;
use crate::query::{ObjRange, Pattern, Var};

/// Inline what can be inlined; returns whether anything changed.
pub fn inline_filters(clause: &mut Vec<Pattern>, bound_seed: &[Var]) -> bool {
    // Where does each variable first become bound, among top-level
    // binding patterns?
    let mut binding_at: std::collections::HashMap<Var, usize> = std::collections::HashMap::new();
    for v in bound_seed {
        binding_at.insert(*v, 0);
    }
    for (i, p) in clause.iter().enumerate() {
        for v in pattern_bindings(p) {
            binding_at.entry(v).or_insert(i);
        }
    }

    // Plan attachments first; mutate after.
    let mut attach: Vec<(usize, usize, Var, Arc<CompiledFilter>)> = Vec::new();
    let mut elide: Vec<usize> = Vec::new();
    for (i, p) in clause.iter().enumerate() {
        let Pattern::Filter(f) = p else { continue };
        if f.vars.is_empty() {
            continue;
        }
        let Some(target) = f
            .vars
            .iter()
            .map(|v| binding_at.get(v).copied())
            .collect::<Option<Vec<usize>>>()
            .map(|ixs| ixs.into_iter().max().unwrap())
        else {
            // Unresolvable dependency: the filter stays standalone.
            continue;
        };
        if !matches!(clause[target], Pattern::Tuple(_) | Pattern::Class(_)) {
            continue;
        }
        // Latest slot of the target pattern that binds one of the
        // filter's variables.
        let Some(slot_ix) = latest_slot(&clause[target], &f.vars) else {
            continue;
        };
        attach.push((target, slot_ix, slot_var(&clause[target], slot_ix), Arc::clone(f)));
        elide.push(i);
    }

    if attach.is_empty() {
        return false;
    }

    for (target, slot_ix, _var, f) in &attach {
        let (Pattern::Tuple(tp) | Pattern::Class(tp)) = &mut clause[*target] else {
            continue;
        };
        let slot = match slot_ix {
            0 => &mut tp.s,
            1 => &mut tp.p,
            _ => &mut tp.o,
        };
        if *slot_ix == 2
            && f.vars.len() == 1
            && let Some(range) = derive_range(f)
        {
            slot.range = Some(merge_ranges(slot.range.take(), range));
        }
        slot.fns.push(Arc::clone(f));
        tracing::debug!(filter = %f.src, "inlined filter onto pattern");
    }

    elide.sort_unstable();
    for i in elide.into_iter().rev() {
        clause.remove(i);
    }
    true
}

/// Variables a top-level pattern binds.
fn pattern_bindings(p: &Pattern) -> Vec<Var> {
    match p {
        Pattern::Tuple(tp) | Pattern::Class(tp) => tp.pattern_vars(),
        Pattern::Id { s } => s.as_var().into_iter().collect(),
        Pattern::Bind { var, .. } => vec![*var],
        Pattern::PropertyJoin { subject, triples } => {
            let mut out = vec![*subject];
            for t in triples {
                out.extend(t.pattern_vars());
            }
            out
        }
        // Bindings inside compound patterns do not escape for inlining
        // purposes; a filter depending on them stays standalone.
        _ => Vec::new(),
    }
}

/// Latest slot index (s = 0, p = 1, o = 2) of the pattern binding any of
/// `vars`.
fn latest_slot(p: &Pattern, vars: &[Var]) -> Option<usize> {
    let (Pattern::Tuple(tp) | Pattern::Class(tp)) = p else {
        return None;
    };
    let mut found = None;
    for (ix, slot) in tp.slots().iter().enumerate() {
        if let Some(v) = slot.as_var()
            && vars.contains(&v)
        {
            found = Some(ix);
        }
    }
    found
}

fn slot_var(p: &Pattern, slot_ix: usize) -> Var {
    let (Pattern::Tuple(tp) | Pattern::Class(tp)) = p else {
        unreachable!("latest_slot only returns for tuple-shaped patterns");
    };
    tp.slots()[slot_ix].as_var().expect("slot chosen because it binds a var")
}

// ── Range lowering ───────────────────────────────────────────────────────

/// Derive an object scan range from a single-variable comparison filter:
/// `(< ?v n)`, `(<= ?v n)`, `(> ?v n)`, `(>= ?v n)` and conjunctions
/// thereof. Anything unrecognized yields nothing.
pub fn derive_range(f: &CompiledFilter) -> Option<ObjRange> {
    let mut range = ObjRange::default();
    if collect_bounds(&f.expr, &mut range) && !range.is_empty() {
        Some(range)
    } else {
        None
    }
}

fn collect_bounds(expr: &FilterExpr, range: &mut ObjRange) -> bool {
    let FilterExpr::Call { op, args } = expr else {
        return false;
    };
    match op {
        FilterOp::And => args.iter().all(|a| collect_bounds(a, range)),
        FilterOp::Lt | FilterOp::Lte | FilterOp::Gt | FilterOp::Gte => {
            let [a, b] = args.as_slice() else { return false };
            // Normalize to var-on-the-left.
            let (lit, flipped) = match (a, b) {
                (FilterExpr::Var(_), FilterExpr::Lit(l)) => (l, false),
                (FilterExpr::Lit(l), FilterExpr::Var(_)) => (l, true),
                _ => return false,
            };
            let Some(lit) = literal_object(lit) else { return false };
            let op = if flipped { flip(*op) } else { *op };
            apply_bound(range, op, lit);
            true
        }
        _ => false,
    }
}

fn flip(op: FilterOp) -> FilterOp {
    match op {
        FilterOp::Lt => FilterOp::Gt,
        FilterOp::Lte => FilterOp::Gte,
        FilterOp::Gt => FilterOp::Lt,
        FilterOp::Gte => FilterOp::Lte,
        other => other,
    }
}

fn literal_object(v: &FilterValue) -> Option<Object> {
    match v {
        FilterValue::Int(n) => Some(Object::Int(*n)),
        FilterValue::Double(d) => Some(Object::Double(*d)),
        FilterValue::Str(s) => Some(Object::Str(Arc::clone(s))),
        _ => None,
    }
}

/// Tighten one side of the range. Index order interleaves integer and
/// double representations of the same magnitude (`Int(n)` immediately
/// below `Double(n.0)`), so strict bounds against an integral value move
/// to the representation that excludes both.
fn apply_bound(range: &mut ObjRange, op: FilterOp, lit: Object) {
    let bound = match op {
        // `> n` over an integral boundary starts above `Double(n.0)`,
        // excluding the `Int(n)` that sorts just below it as well.
        FilterOp::Gt => match &lit {
            Object::Int(n) => (Object::Double(*n as f64), false),
            other => (other.clone(), false),
        },
        FilterOp::Gte => match &lit {
            // `>= x.0` must admit `Int(x)`, which sorts below the double.
            Object::Double(d) if d.fract() == 0.0 => (Object::Int(*d as i64), true),
            other => (other.clone(), true),
        },
        // `< n` ends below `Int(n)`; `< x.0` with integral x must also
        // exclude the `Int(x)` below the double boundary.
        FilterOp::Lt => match &lit {
            Object::Double(d) if d.fract() == 0.0 => (Object::Int(*d as i64), false),
            other => (other.clone(), false),
        },
        FilterOp::Lte => match &lit {
            // `<= n` admits `Double(n.0)`, which sorts just above.
            Object::Int(n) => (Object::Double(*n as f64), true),
            other => (other.clone(), true),
        },
        _ => return,
    };
    match op {
        FilterOp::Gt | FilterOp::Gte => {
            let tighter = match &range.start {
                Some((cur, _)) => bound.0 > *cur,
                None => true,
            };
            if tighter {
                range.start = Some(bound);
            }
        }
        FilterOp::Lt | FilterOp::Lte => {
            let tighter = match &range.end {
                Some((cur, _)) => bound.0 < *cur,
                None => true,
            };
            if tighter {
                range.end = Some(bound);
            }
        }
        _ => {}
    }
}

fn merge_ranges(existing: Option<ObjRange>, new: ObjRange) -> ObjRange {
    let Some(mut cur) = existing else { return new };
    if let Some((o, inc)) = new.start {
        let tighter = match &cur.start {
            Some((c, _)) => o > *c,
            None => true,
        };
        if tighter {
            cur.start = Some((o, inc));
        }
    }
    if let Some((o, inc)) = new.end {
        let tighter = match &cur.end {
            Some((c, _)) => o < *c,
            None => true,
        };
        if tighter {
            cur.end = Some((o, inc));
        }
    }
    cur
}
