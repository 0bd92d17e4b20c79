//! Triple-pattern matching.
//!
//! For each input solution, bound variables substitute into the pattern,
//! the optimal index is chosen from which positions ended up known, and the
//! range engine produces candidate flakes. Each flake extends the solution
//! by binding the previously-unbound positions; inlined filter hooks run
//! per component while flakes stream, before any extension happens.
//!
//! Index choice: `s` known → spot; `p` and `o` known → post; `p` only →
//! psot (post when a derived object range can tighten the scan); `o` only
//! → opst; nothing known → a full spot scan.

use std::sync::Arc;

use crate::error::QuadStreamError;
use crate::exec::{ExecCtx, SolutionIter, per_solution_vec};
use crate::flake::{Dt, IndexType, Object, Pid, RangeTest, Sid, dt};
use crate::query::{Match, ObjRange, Solution, TriplePart, TriplePattern, TupleSlot, Var};
use crate::range::{RangeOpts, RangeTarget, SubjectRef, index_range};
use crate::schema::coerce_object;

/// Outcome of substituting one slot against a solution.
enum Slot {
    Known(Object, Dt),
    Unbound(Var),
    /// An IRI the schema does not know: the pattern matches nothing.
    NoMatch,
}

fn resolve_slot(ctx: &ExecCtx, slot: &TupleSlot, sol: &Solution, position: u8) -> Slot {
    match &slot.part {
        TriplePart::Var(v) => match sol.get(*v) {
            Some(m) => Slot::Known(m.value.clone(), m.dt),
            None => Slot::Unbound(*v),
        },
        TriplePart::Val { value, dt: datatype } => Slot::Known(value.clone(), *datatype),
        TriplePart::Iri(iri) => {
            let resolved = match position {
                1 => ctx.db.schema.pred_id(iri),
                _ => ctx.db.schema.subid(iri),
            };
            match resolved {
                Some(sid) => Slot::Known(Object::Sid(sid), dt::REF),
                None => {
                    tracing::warn!(iri, "unresolvable IRI in pattern; matches nothing");
                    Slot::NoMatch
                }
            }
        }
    }
}

/// Bind `var` in `sol`, or verify the existing binding matches. A false
/// return drops the candidate flake (duplicate-variable mismatch).
fn try_bind(sol: &mut Solution, var: Var, value: Object, datatype: Dt) -> bool {
    match sol.get(var) {
        Some(existing) => existing.value == value,
        None => {
            sol.bind(var, Match::new(Some(var), value, datatype));
            true
        }
    }
}

fn component_hooks(
    slot: &TupleSlot,
    sol: &Solution,
) -> Option<(Vec<Arc<crate::exec::filter::CompiledFilter>>, Var, Solution)> {
    let var = slot.as_var()?;
    if slot.fns.is_empty() {
        return None;
    }
    Some((slot.fns.clone(), var, sol.clone()))
}

pub fn match_tuple(ctx: &ExecCtx, tp: &TriplePattern, input: SolutionIter) -> SolutionIter {
    let ctx = ctx.clone();
    let tp = tp.clone();
    per_solution_vec(input, move |sol| match_tuple_one(&ctx, &tp, sol))
}

pub(crate) fn match_tuple_one(
    ctx: &ExecCtx,
    tp: &TriplePattern,
    sol: &Solution,
) -> Result<Vec<Solution>, QuadStreamError> {
    let (s, p, o) = (
        resolve_slot(ctx, &tp.s, sol, 0),
        resolve_slot(ctx, &tp.p, sol, 1),
        resolve_slot(ctx, &tp.o, sol, 2),
    );
    if matches!(s, Slot::NoMatch) || matches!(p, Slot::NoMatch) || matches!(o, Slot::NoMatch) {
        return Ok(Vec::new());
    }

    // A subject or predicate position substituted with a non-sid value can
    // never match.
    let s_known = match &s {
        Slot::Known(v, _) => match v.as_sid() {
            Some(sid) => Some(sid),
            None => return Ok(Vec::new()),
        },
        _ => None,
    };
    let p_known: Option<Pid> = match &p {
        Slot::Known(v, _) => match v.as_sid() {
            Some(pid) => Some(pid),
            None => return Ok(Vec::new()),
        },
        _ => None,
    };
    let o_known: Option<Object> = match &o {
        Slot::Known(v, _) => Some(match p_known.and_then(|pid| ctx.db.schema.property(pid)) {
            Some(info) => coerce_object(v.clone(), info.datatype),
            None => v.clone(),
        }),
        _ => None,
    };
    let o_range = tp.o.range.clone().filter(|r| !r.is_empty() && o_known.is_none());

    let (idx, use_o_in_bound) = choose_index(s_known, p_known, &o_known, &o_range);
    tracing::debug!(idx = idx.as_str(), "tuple pattern index choice");

    // Base boundary from the positions the index can consume.
    let mut base = RangeTarget::default();
    if let Some(sid) = s_known {
        base.s = Some(SubjectRef::Sid(sid));
    }
    if let Some(pid) = p_known {
        base.p = Some(pid);
    }
    if use_o_in_bound && let Some(ov) = &o_known {
        base.o = Some(ov.clone());
    }

    let (start_test, start, end_test, end) = match &o_range {
        Some(range) if use_o_in_bound => bounds_from_range(&base, range),
        _ => (RangeTest::Gte, base.clone(), RangeTest::Lte, base.clone()),
    };

    let opts = scan_opts(ctx, tp, sol);
    let flakes = index_range(&ctx.db, idx, start_test, start, end_test, end, &opts)?;

    let mut out = Vec::with_capacity(flakes.len());
    for f in &flakes {
        // Positions the index could not consume are verified here.
        if let Some(sid) = s_known
            && f.s != sid
        {
            continue;
        }
        if let Some(pid) = p_known
            && f.p != pid
        {
            continue;
        }
        if let Some(ov) = &o_known
            && (!use_o_in_bound && f.o != *ov)
        {
            continue;
        }
        let mut next = sol.clone();
        if let Slot::Unbound(v) = &s
            && !try_bind(&mut next, *v, Object::Sid(f.s), dt::REF)
        {
            continue;
        }
        if let Slot::Unbound(v) = &p
            && !try_bind(&mut next, *v, Object::Sid(f.p), dt::REF)
        {
            continue;
        }
        if let Slot::Unbound(v) = &o
            && !try_bind(&mut next, *v, f.o.clone(), f.dt)
        {
            continue;
        }
        out.push(next);
    }
    Ok(out)
}

fn choose_index(
    s: Option<Sid>,
    p: Option<Pid>,
    o: &Option<Object>,
    o_range: &Option<ObjRange>,
) -> (IndexType, bool) {
    match (s, p, o) {
        // `s` known: spot. The object joins the boundary only with `p`
        // also known (it follows `p` in the ordering).
        (Some(_), Some(_), _) => (IndexType::Spot, true),
        (Some(_), None, _) => (IndexType::Spot, false),
        (None, Some(_), Some(_)) => (IndexType::Post, true),
        (None, Some(_), None) if o_range.is_some() => (IndexType::Post, true),
        (None, Some(_), None) => (IndexType::Psot, false),
        (None, None, Some(_)) => (IndexType::Opst, true),
        (None, None, None) => (IndexType::Spot, false),
    }
}

fn bounds_from_range(
    base: &RangeTarget,
    range: &ObjRange,
) -> (RangeTest, RangeTarget, RangeTest, RangeTarget) {
    let mut start = base.clone();
    let mut end = base.clone();
    let mut start_test = RangeTest::Gte;
    let mut end_test = RangeTest::Lte;
    if let Some((lo, inclusive)) = &range.start {
        start.o = Some(lo.clone());
        start_test = if *inclusive { RangeTest::Gte } else { RangeTest::Gt };
    }
    if let Some((hi, inclusive)) = &range.end {
        end.o = Some(hi.clone());
        end_test = if *inclusive { RangeTest::Lte } else { RangeTest::Lt };
    }
    (start_test, start, end_test, end)
}

fn scan_opts(ctx: &ExecCtx, tp: &TriplePattern, sol: &Solution) -> RangeOpts {
    let mut opts = ctx.range_opts();
    if let Some((fns, var, sol)) = component_hooks(&tp.s, sol) {
        opts.subject_fn = Some(Arc::new(move |s: Sid| {
            fns.iter().all(|f| f.matches_with(&sol, var, &Object::Sid(s), dt::REF))
        }));
    }
    if let Some((fns, var, sol)) = component_hooks(&tp.p, sol) {
        opts.predicate_fn = Some(Arc::new(move |p: Pid| {
            fns.iter().all(|f| f.matches_with(&sol, var, &Object::Sid(p), dt::REF))
        }));
    }
    if let Some((fns, var, sol)) = component_hooks(&tp.o, sol) {
        opts.object_fn = Some(Arc::new(move |o: &Object, datatype: Dt| {
            fns.iter().all(|f| f.matches_with(&sol, var, o, datatype))
        }));
    }
    opts
}

/// Id pattern: the subject must exist at the query's `t`.
pub fn match_id(ctx: &ExecCtx, slot: &TupleSlot, input: SolutionIter) -> SolutionIter {
    let ctx = ctx.clone();
    let slot = slot.clone();
    per_solution_vec(input, move |sol| {
        let sid = match resolve_slot(&ctx, &slot, sol, 0) {
            Slot::Known(v, _) => match v.as_sid() {
                Some(sid) => sid,
                None => return Ok(Vec::new()),
            },
            // An id pattern cannot enumerate; an unbound subject matches
            // nothing.
            Slot::Unbound(_) | Slot::NoMatch => return Ok(Vec::new()),
        };
        let mut opts = ctx.range_opts();
        opts.flake_limit = 1;
        let flakes = index_range(
            &ctx.db,
            IndexType::Spot,
            RangeTest::Gte,
            RangeTarget::subject(sid),
            RangeTest::Lte,
            RangeTarget::subject(sid),
            &opts,
        )?;
        Ok(if flakes.is_empty() { Vec::new() } else { vec![sol.clone()] })
    })
}
