//! Result shaping: group → order → offset → limit → select → collect.
//!
//! Shaping happens after the where-clause pipeline is drained. Grouping
//! merges solutions sharing a group key (hashed with xxh64 over a stable
//! value encoding); ordering is a stable sort comparing datatype id first,
//! then value; selection projects each group through the query's selectors.
//! Reference values display as IRIs compacted against the query context,
//! memoized per query.

use std::collections::{HashMap, HashSet};

use serde_json::Value;
use xxhash_rust::xxh64::xxh64;

use crate::error::QuadStreamError;
use crate::exec::ExecCtx;
use crate::flake::{Dt, Object, dt};
use crate::query::{Direction, ParsedQuery, SelectMode, Selector, Solution, Var};
use crate::subgraph::{CompactCache, CrawlCtx, crawl_subject};

/// One output row group: the representative solution plus every member.
struct Group {
    rep: Solution,
    members: Vec<Solution>,
}

impl Group {
    fn values_of(&self, var: Var) -> Vec<(Object, Dt)> {
        self.members
            .iter()
            .filter_map(|m| m.get(var).map(|b| (b.value.clone(), b.dt)))
            .collect()
    }
}

/// Shape a drained solution set into the final JSON result.
pub fn shape(
    ctx: &ExecCtx,
    q: &ParsedQuery,
    solutions: Vec<Solution>,
) -> Result<Value, QuadStreamError> {
    let has_aggregate = q
        .select
        .selectors()
        .iter()
        .any(|s| matches!(s, Selector::Aggregate(_)));

    let mut groups = group(q, solutions, has_aggregate);
    order(q, &mut groups);

    // Offset and limit apply to rows (groups), before projection.
    let offset = q.offset.unwrap_or(0);
    let take = q.limit.unwrap_or(usize::MAX);
    let groups: Vec<Group> = groups.into_iter().skip(offset).take(take).collect();

    let cache = CompactCache::new(ctx.opts.cache);
    let mut rows: Vec<Value> = Vec::with_capacity(groups.len());
    for g in &groups {
        let mut row = Vec::with_capacity(q.select.selectors().len());
        for sel in q.select.selectors() {
            row.push(project(ctx, q, &cache, g, sel)?);
        }
        rows.push(Value::Array(row));
    }

    Ok(match &q.select {
        SelectMode::Many(_) => Value::Array(rows),
        SelectMode::One(selectors) => match rows.into_iter().next() {
            None => Value::Null,
            Some(Value::Array(mut row)) if selectors.len() == 1 => row.remove(0),
            Some(row) => row,
        },
        SelectMode::Distinct(_) => {
            let mut seen = HashSet::new();
            Value::Array(
                rows.into_iter()
                    .filter(|row| seen.insert(row.to_string()))
                    .collect(),
            )
        }
    })
}

fn group(q: &ParsedQuery, solutions: Vec<Solution>, has_aggregate: bool) -> Vec<Group> {
    if q.group_by.is_empty() {
        if has_aggregate {
            // Aggregates without group-by fold the entire solution set.
            let rep = solutions.first().cloned().unwrap_or_default();
            return vec![Group { rep, members: solutions }];
        }
        return solutions
            .into_iter()
            .map(|s| Group { rep: s.clone(), members: vec![s] })
            .collect();
    }

    let mut order: Vec<u64> = Vec::new();
    let mut by_key: HashMap<u64, Group> = HashMap::new();
    for sol in solutions {
        let mut buf = Vec::new();
        for v in &q.group_by {
            match sol.get(*v) {
                Some(m) => {
                    m.value.encode_for_hash(&mut buf);
                    buf.extend_from_slice(&m.dt.to_le_bytes());
                }
                None => buf.push(0xFF),
            }
        }
        let key = xxh64(&buf, 0);
        match by_key.get_mut(&key) {
            Some(g) => g.members.push(sol),
            None => {
                order.push(key);
                by_key.insert(key, Group { rep: sol.clone(), members: vec![sol] });
            }
        }
    }
    order.into_iter().filter_map(|k| by_key.remove(&k)).collect()
}

fn order(q: &ParsedQuery, groups: &mut [Group]) {
    if q.order_by.is_empty() {
        return;
    }
    let order_by = q.order_by.clone();
    groups.sort_by(|a, b| {
        for (var, dir) in &order_by {
            let ord = cmp_binding(a.rep.get(*var), b.rep.get(*var));
            let ord = if *dir == Direction::Desc { ord.reverse() } else { ord };
            if ord != std::cmp::Ordering::Equal {
                return ord;
            }
        }
        std::cmp::Ordering::Equal
    });
}

/// Datatype id first, then value; unbound sorts first.
fn cmp_binding(
    a: Option<&crate::query::Match>,
    b: Option<&crate::query::Match>,
) -> std::cmp::Ordering {
    match (a, b) {
        (None, None) => std::cmp::Ordering::Equal,
        (None, Some(_)) => std::cmp::Ordering::Less,
        (Some(_), None) => std::cmp::Ordering::Greater,
        (Some(a), Some(b)) => a.dt.cmp(&b.dt).then_with(|| a.value.cmp(&b.value)),
    }
}

fn project(
    ctx: &ExecCtx,
    q: &ParsedQuery,
    cache: &CompactCache,
    g: &Group,
    sel: &Selector,
) -> Result<Value, QuadStreamError> {
    match sel {
        Selector::Var(v) => {
            // With grouping in play, only key variables stay scalar; other
            // variables display as the grouped value vector even for
            // single-member groups, so row shapes stay uniform.
            let grouped = !q.group_by.is_empty();
            if q.group_by.contains(v) || !grouped {
                Ok(match g.rep.get(*v) {
                    Some(m) => display_value(ctx, &q.context, cache, &m.value, m.dt),
                    None => Value::Null,
                })
            } else {
                // A non-key variable of a real group displays as the
                // grouped value vector.
                Ok(Value::Array(
                    g.values_of(*v)
                        .iter()
                        .map(|(o, datatype)| display_value(ctx, &q.context, cache, o, *datatype))
                        .collect(),
                ))
            }
        }
        Selector::Aggregate(spec) => spec.apply(&g.values_of(spec.var)),
        Selector::Subgraph { var, spec } => {
            let crawl = CrawlCtx {
                db: &ctx.db,
                context: &q.context,
                cache,
                fuel: &ctx.fuel,
            };
            let mut subjects: Vec<i64> = Vec::new();
            for (o, _) in g.values_of(*var) {
                if let Object::Sid(s) = o
                    && !subjects.contains(&s)
                {
                    subjects.push(s);
                }
            }
            match subjects.as_slice() {
                [] => Ok(Value::Null),
                [s] => crawl_subject(&crawl, spec, *s),
                many => Ok(Value::Array(
                    many.iter()
                        .map(|s| crawl_subject(&crawl, spec, *s))
                        .collect::<Result<_, _>>()?,
                )),
            }
        }
        Selector::Expression { expr, .. } => match expr.eval_value(&g.rep) {
            Ok(v) => {
                let (o, datatype) = crate::exec::filter::value_object(&v)
                    .map_err(|e| QuadStreamError::InvalidFn(e.to_string()))?;
                Ok(display_value(ctx, &q.context, cache, &o, datatype))
            }
            Err(_) => Ok(Value::Null),
        },
    }
}

/// Display one value: references resolve to compacted IRIs, tags to their
/// names, everything else to its raw JSON form.
pub fn display_value(
    ctx: &ExecCtx,
    context: &crate::schema::Context,
    cache: &CompactCache,
    o: &Object,
    datatype: Dt,
) -> Value {
    match (datatype, o) {
        (d, Object::Sid(s)) if d == dt::REF => {
            Value::from(cache.display_sid(&ctx.db, context, *s))
        }
        (d, Object::Sid(s)) if d == dt::TAG => match ctx.db.schema.tag_name(*s) {
            Some(name) => Value::from(name),
            None => Value::from(*s),
        },
        _ => o.to_json(),
    }
}
