//! Class matching with subclass expansion.
//!
//! A class pattern `[?s rdf:type C]` scans `{C} ∪ subclasses*(C)` and
//! de-duplicates subjects across the expansion: an individual typed both
//! `Dog` and `Mammal` appears once when matching `Animal`. A class pattern
//! whose object is an unbound variable degenerates to a plain tuple match.

use std::collections::HashSet;

use crate::exec::tuple::match_tuple_one;
use crate::exec::{ExecCtx, SolutionIter, per_solution_vec};
use crate::flake::{Object, dt};
use crate::query::{Solution, TriplePart, TriplePattern, TupleSlot};

pub fn match_class(ctx: &ExecCtx, tp: &TriplePattern, input: SolutionIter) -> SolutionIter {
    let ctx = ctx.clone();
    let tp = tp.clone();
    per_solution_vec(input, move |sol| {
        let cls = match &tp.o.part {
            TriplePart::Var(v) => match sol.get(*v) {
                Some(m) => m.value.as_sid(),
                // Unbound class variable: plain tuple semantics.
                None => return match_tuple_one(&ctx, &tp, sol),
            },
            TriplePart::Val { value, .. } => value.as_sid(),
            TriplePart::Iri(iri) => ctx.db.schema.subid(iri),
        };
        let Some(cls) = cls else {
            return Ok(Vec::new());
        };

        let expansion = ctx.db.schema.class_expansion(cls);
        tracing::debug!(classes = expansion.len(), "class expansion");

        let mut seen_subjects: HashSet<i64> = HashSet::new();
        let mut out: Vec<Solution> = Vec::new();
        for c in expansion {
            let scan = TriplePattern::new(
                tp.s.clone(),
                tp.p.clone(),
                TupleSlot::val(Object::Sid(c), dt::REF),
            );
            for next in match_tuple_one(&ctx, &scan, sol)? {
                let subject = tp
                    .s
                    .as_var()
                    .and_then(|v| next.get(v))
                    .and_then(|m| m.value.as_sid());
                match subject {
                    Some(sid) => {
                        if seen_subjects.insert(sid) {
                            out.push(rebind_class(next, &tp, cls));
                        }
                    }
                    // Bound subject: membership in any class of the
                    // expansion admits the input once.
                    None => {
                        return Ok(vec![rebind_class(next, &tp, cls)]);
                    }
                }
            }
        }
        Ok(out)
    })
}

/// The object variable (when present) binds to the *queried* class, not
/// the subclass that matched.
fn rebind_class(sol: Solution, tp: &TriplePattern, cls: i64) -> Solution {
    match tp.o.as_var() {
        Some(v) => sol.with(v, crate::query::Match::new(Some(v), Object::Sid(cls), dt::REF)),
        None => sol,
    }
}
