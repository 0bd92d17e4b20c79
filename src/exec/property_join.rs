//! Property joins: co-subject triples satisfied with one subject scan.
//!
//! A property join holds triples sharing an unbound subject variable, each
//! with a concrete predicate (the optimizer only groups such triples).
//! Instead of one index scan per triple, candidate subjects are enumerated
//! once and each candidate's full spot range is fetched a single time; the
//! values distribute across the joined variables, with every triple
//! required to match (inner join within the group).

use crate::error::QuadStreamError;
use crate::exec::{ExecCtx, SolutionIter, per_solution_vec};
use crate::flake::{Flake, Object, Pid, Sid, dt};
use crate::query::{Match, Solution, TriplePart, TriplePattern, Var};
use crate::range::{RangeTarget, index_range_eq};

pub fn match_property_join(
    ctx: &ExecCtx,
    subject: Var,
    triples: &[TriplePattern],
    input: SolutionIter,
) -> SolutionIter {
    let ctx = ctx.clone();
    let triples = triples.to_vec();
    per_solution_vec(input, move |sol| join_one(&ctx, subject, &triples, sol))
}

fn join_one(
    ctx: &ExecCtx,
    subject: Var,
    triples: &[TriplePattern],
    sol: &Solution,
) -> Result<Vec<Solution>, QuadStreamError> {
    // Predicates are concrete by construction; an unknown one can never
    // match, so the whole join is empty.
    let mut pids = Vec::with_capacity(triples.len());
    for tp in triples {
        match resolve_pid(ctx, &tp.p.part) {
            Some(pid) => pids.push(pid),
            None => return Ok(Vec::new()),
        }
    }

    let candidates: Vec<Sid> = match sol.get(subject) {
        Some(m) => match m.value.as_sid() {
            Some(sid) => vec![sid],
            None => return Ok(Vec::new()),
        },
        None => enumerate_candidates(ctx, pids[0])?,
    };

    let mut out = Vec::new();
    for s in candidates {
        let flakes = index_range_eq(
            &ctx.db,
            crate::flake::IndexType::Spot,
            RangeTarget::subject(s),
            &ctx.range_opts(),
        )?;

        let mut partials = match sol.get(subject) {
            Some(_) => vec![sol.clone()],
            None => vec![sol.with(subject, Match::new(Some(subject), Object::Sid(s), dt::REF))],
        };

        for (tp, &pid) in triples.iter().zip(&pids) {
            let group: Vec<&Flake> = flakes.iter().filter(|f| f.p == pid).collect();
            if group.is_empty() {
                partials.clear();
                break;
            }
            let mut next = Vec::new();
            for part in &partials {
                extend_with_triple(ctx, tp, &group, part, &mut next)?;
            }
            partials = next;
            if partials.is_empty() {
                break;
            }
        }
        out.extend(partials);
    }
    Ok(out)
}

fn resolve_pid(ctx: &ExecCtx, part: &TriplePart) -> Option<Pid> {
    match part {
        TriplePart::Val { value, .. } => value.as_sid(),
        TriplePart::Iri(iri) => ctx.db.schema.pred_id(iri),
        TriplePart::Var(_) => None,
    }
}

/// Distinct subjects carrying the anchor predicate, in index order.
fn enumerate_candidates(ctx: &ExecCtx, pid: Pid) -> Result<Vec<Sid>, QuadStreamError> {
    let flakes = index_range_eq(
        &ctx.db,
        crate::flake::IndexType::Psot,
        RangeTarget::default().with_p(pid),
        &ctx.range_opts(),
    )?;
    let mut out = Vec::new();
    for f in &flakes {
        if out.last() != Some(&f.s) {
            out.push(f.s);
        }
    }
    Ok(out)
}

fn extend_with_triple(
    ctx: &ExecCtx,
    tp: &TriplePattern,
    group: &[&Flake],
    part: &Solution,
    next: &mut Vec<Solution>,
) -> Result<(), QuadStreamError> {
    match &tp.o.part {
        TriplePart::Var(v) => match part.get(*v) {
            Some(bound) => {
                if group.iter().any(|f| f.o == bound.value) {
                    next.push(part.clone());
                }
            }
            None => {
                for f in group {
                    if !tp.o.fns.iter().all(|h| h.matches_with(part, *v, &f.o, f.dt)) {
                        continue;
                    }
                    next.push(part.with(*v, Match::new(Some(*v), f.o.clone(), f.dt)));
                }
            }
        },
        TriplePart::Val { value, .. } => {
            if group.iter().any(|f| f.o == *value) {
                next.push(part.clone());
            }
        }
        TriplePart::Iri(iri) => {
            if let Some(sid) = ctx.db.schema.subid(iri)
                && group.iter().any(|f| f.o == Object::Sid(sid))
            {
                next.push(part.clone());
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::DbBuilder;
    use crate::query::{TupleSlot, VarRegistry};
    use crate::schema::PropertyInfo;

    #[test]
    fn test_join_requires_every_predicate() {
        let mut b = DbBuilder::new();
        let name = b.predicate(PropertyInfo::scalar("ex:name", dt::STRING));
        let age = b.predicate(PropertyInfo::scalar("ex:age", dt::LONG));
        let ann = b.subject("ex:ann");
        let bob = b.subject("ex:bob");
        b.assert(ann, name, Object::str("Ann"));
        b.assert(ann, age, Object::Int(30));
        // Bob has a name but no age: excluded by the join.
        b.assert(bob, name, Object::str("Bob"));
        let db = b.build();

        let mut reg = VarRegistry::new();
        let s = reg.intern("?s");
        let n = reg.intern("?n");
        let a = reg.intern("?a");
        let ctx = ExecCtx::new(db, Default::default(), reg.len());

        let triples = vec![
            TriplePattern::new(TupleSlot::var(s), TupleSlot::iri("ex:name"), TupleSlot::var(n)),
            TriplePattern::new(TupleSlot::var(s), TupleSlot::iri("ex:age"), TupleSlot::var(a)),
        ];
        let got = join_one(&ctx, s, &triples, &Solution::empty(reg.len())).unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].get(s).unwrap().value, Object::Sid(ann));
        assert_eq!(got[0].get(n).unwrap().value, Object::str("Ann"));
        assert_eq!(got[0].get(a).unwrap().value, Object::Int(30));
    }

    #[test]
    fn test_multi_valued_predicates_produce_products() {
        let mut b = DbBuilder::new();
        let tag = b.predicate(PropertyInfo::scalar("ex:tag", dt::STRING).multi());
        let size = b.predicate(PropertyInfo::scalar("ex:size", dt::LONG));
        let s1 = b.subject("ex:s1");
        b.assert(s1, tag, Object::str("x"));
        b.assert(s1, tag, Object::str("y"));
        b.assert(s1, size, Object::Int(1));
        let db = b.build();

        let mut reg = VarRegistry::new();
        let s = reg.intern("?s");
        let t = reg.intern("?t");
        let z = reg.intern("?z");
        let ctx = ExecCtx::new(db, Default::default(), reg.len());
        let triples = vec![
            TriplePattern::new(TupleSlot::var(s), TupleSlot::iri("ex:tag"), TupleSlot::var(t)),
            TriplePattern::new(TupleSlot::var(s), TupleSlot::iri("ex:size"), TupleSlot::var(z)),
        ];
        let got = join_one(&ctx, s, &triples, &Solution::empty(reg.len())).unwrap();
        assert_eq!(got.len(), 2);
        assert!(got.iter().all(|g| g.get(z).unwrap().value == Object::Int(1)));
    }

    #[test]
    fn test_shared_object_variable_joins_within_group() {
        let mut b = DbBuilder::new();
        let p1 = b.predicate(PropertyInfo::scalar("ex:p1", dt::LONG));
        let p2 = b.predicate(PropertyInfo::scalar("ex:p2", dt::LONG));
        let s1 = b.subject("ex:s1");
        let s2 = b.subject("ex:s2");
        b.assert(s1, p1, Object::Int(5));
        b.assert(s1, p2, Object::Int(5));
        b.assert(s2, p1, Object::Int(1));
        b.assert(s2, p2, Object::Int(2));
        let db = b.build();

        let mut reg = VarRegistry::new();
        let s = reg.intern("?s");
        let x = reg.intern("?x");
        let ctx = ExecCtx::new(db, Default::default(), reg.len());
        // [?s :p1 ?x] [?s :p2 ?x] — only s1 has matching values.
        let triples = vec![
            TriplePattern::new(TupleSlot::var(s), TupleSlot::iri("ex:p1"), TupleSlot::var(x)),
            TriplePattern::new(TupleSlot::var(s), TupleSlot::iri("ex:p2"), TupleSlot::var(x)),
        ];
        let got = join_one(&ctx, s, &triples, &Solution::empty(reg.len())).unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].get(s).unwrap().value, Object::Sid(s1));
    }
}
