//! Property-join grouping.
//!
//! Triples with (a) a variable subject, (b) a concrete predicate, and
//! (c) no component filter hooks group by subject variable; each group of
//! two or more becomes a property join satisfied with one subject scan.
//! Higher-order patterns are recursed into, but grouping never crosses
//! their boundary, and virtual-graph contents are left untouched.

use std::collections::HashMap;

use crate::query::{GraphAlias, Pattern, TriplePart, TriplePattern, Var};

/// Group eligible triples in place; returns whether anything changed.
pub fn group_property_joins(clause: &mut Vec<Pattern>) -> bool {
    let mut changed = group_one_level(clause);
    for p in clause.iter_mut() {
        match p {
            Pattern::Union(branches) => {
                for b in branches {
                    changed |= group_property_joins(b);
                }
            }
            Pattern::Optional(c) | Pattern::Minus(c) | Pattern::Exists(c)
            | Pattern::NotExists(c) => {
                changed |= group_property_joins(c);
            }
            Pattern::Graph { alias: GraphAlias::Named(_), clause: c } => {
                changed |= group_property_joins(c);
            }
            // Virtual graphs execute elsewhere; their clause is opaque.
            Pattern::Graph { alias: GraphAlias::Virtual(_), .. } => {}
            _ => {}
        }
    }
    changed
}

fn group_one_level(clause: &mut Vec<Pattern>) -> bool {
    let mut by_subject: HashMap<Var, Vec<usize>> = HashMap::new();
    for (i, p) in clause.iter().enumerate() {
        if let Pattern::Tuple(tp) = p
            && let Some(v) = groupable_subject(tp)
        {
            by_subject.entry(v).or_default().push(i);
        }
    }

    let mut groups: Vec<(Var, Vec<usize>)> = by_subject
        .into_iter()
        .filter(|(_, ixs)| ixs.len() >= 2)
        .collect();
    if groups.is_empty() {
        return false;
    }
    // Deterministic rewrite order: by first occurrence.
    groups.sort_by_key(|(_, ixs)| ixs[0]);

    let mut remove = Vec::new();
    for (subject, ixs) in groups {
        let triples: Vec<TriplePattern> = ixs
            .iter()
            .map(|&i| {
                let Pattern::Tuple(tp) = &clause[i] else { unreachable!() };
                tp.clone()
            })
            .collect();
        clause[ixs[0]] = Pattern::PropertyJoin { subject, triples };
        remove.extend_from_slice(&ixs[1..]);
    }
    remove.sort_unstable();
    for i in remove.into_iter().rev() {
        clause.remove(i);
    }
    true
}

/// The subject variable, iff the triple is eligible for grouping.
fn groupable_subject(tp: &TriplePattern) -> Option<Var> {
    let TriplePart::Var(v) = tp.s.part else { return None };
    let concrete_pred = matches!(tp.p.part, TriplePart::Iri(_) | TriplePart::Val { .. });
    let no_hooks = tp.s.fns.is_empty() && tp.p.fns.is_empty() && tp.o.fns.is_empty();
    (concrete_pred && no_hooks).then_some(v)
}
