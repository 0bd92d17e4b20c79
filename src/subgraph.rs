//! Graph crawl: nested JSON-LD subject maps.
//!
//! Consumes all flakes of one top-level subject and produces a nested map,
//! recursing through references according to a [`SelectSpec`]. Recursion is
//! bounded two ways: a per-edge `recur` depth and a `seen` set of visited
//! subjects carried down by copy, so sibling branches never observe each
//! other's visits. Cycles and exhausted depth stop emission quietly.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use serde_json::{Map, Value};

use crate::db::Db;
use crate::error::QuadStreamError;
use crate::flake::{Flake, IndexType, Object, Pid, Sid, dt};
use crate::fuel::Fuel;
use crate::query::Direction;
use crate::range::{RangeOpts, RangeTarget, index_range_eq};
use crate::schema::Context;

/// Default recursion bound when a sub-select has no explicit `recur`.
pub const DEFAULT_RECUR_DEPTH: usize = 100;

/// Per-query memo of sid → display IRI.
#[derive(Debug, Default)]
pub struct CompactCache {
    inner: Mutex<HashMap<Sid, String>>,
    pub enabled: bool,
}

impl CompactCache {
    pub fn new(enabled: bool) -> CompactCache {
        CompactCache { inner: Mutex::new(HashMap::new()), enabled }
    }

    /// Display form of a subject: its IRI compacted against the query
    /// context, or the raw sid rendered as a string when it has none.
    pub fn display_sid(&self, db: &Db, context: &Context, s: Sid) -> String {
        if self.enabled
            && let Some(hit) = self.inner.lock().unwrap().get(&s)
        {
            return hit.clone();
        }
        let name = match db.schema.iri(s) {
            Some(iri) => context.compact_iri(iri),
            None => s.to_string(),
        };
        if self.enabled {
            self.inner.lock().unwrap().insert(s, name.clone());
        }
        name
    }
}

/// Selection applied below one predicate.
#[derive(Debug, Clone, Default)]
pub struct SubSelect {
    /// Nested selection; present means recurse into reference objects.
    pub spec: Option<Arc<SelectSpec>>,
    /// Max recursion depth along this edge.
    pub recur: Option<usize>,
    /// Display-name override.
    pub as_name: Option<String>,
    /// Paging over multi-valued predicates.
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    pub order_by: Option<Direction>,
}

impl SubSelect {
    pub fn nested(spec: SelectSpec) -> SubSelect {
        SubSelect { spec: Some(Arc::new(spec)), ..Default::default() }
    }
}

/// What to emit for one subject.
#[derive(Debug, Clone, Default)]
pub struct SelectSpec {
    /// Emit every predicate present on the subject.
    pub wildcard: bool,
    /// Emit an `"id"` key with the subject's display IRI.
    pub id: bool,
    /// Compact predicate names and IRIs against the query context.
    pub compact: bool,
    /// Explicit per-predicate sub-selections.
    pub preds: HashMap<Pid, SubSelect>,
    /// Predicate selections by name, resolved against the schema at crawl
    /// time (pending collection resolution at parse time).
    pub ns_lookup: HashMap<String, SubSelect>,
    /// Reverse-reference selections (`_/…`): predicate → sub-select over
    /// subjects pointing *at* this subject.
    pub reverse: HashMap<Pid, SubSelect>,
    /// Follow component references even without an explicit sub-select.
    pub component_follow: bool,
}

impl SelectSpec {
    pub fn wildcard() -> SelectSpec {
        SelectSpec { wildcard: true, id: true, compact: true, ..Default::default() }
    }

    pub fn with_pred(mut self, pid: Pid, sub: SubSelect) -> SelectSpec {
        self.preds.insert(pid, sub);
        self
    }

    pub fn with_reverse(mut self, pid: Pid, sub: SubSelect) -> SelectSpec {
        self.reverse.insert(pid, sub);
        self
    }
}

/// Crawl state threaded through recursion.
pub struct CrawlCtx<'a> {
    pub db: &'a Db,
    pub context: &'a Context,
    pub cache: &'a CompactCache,
    pub fuel: &'a Arc<Fuel>,
}

impl CrawlCtx<'_> {
    fn range_opts(&self) -> RangeOpts {
        RangeOpts { fuel: Some(Arc::clone(self.fuel)), ..Default::default() }
    }
}

/// Fetch a subject's flakes at the db's `t` and format it.
pub fn crawl_subject(
    ctx: &CrawlCtx<'_>,
    spec: &SelectSpec,
    s: Sid,
) -> Result<Value, QuadStreamError> {
    let flakes = index_range_eq(ctx.db, IndexType::Spot, RangeTarget::subject(s), &ctx.range_opts())?;
    let seen = HashSet::from([s]);
    flakes_to_subject(ctx, spec, s, &flakes, 0, &seen).map(Value::Object)
}

/// Format one subject from its (spot-ordered) flakes.
pub fn flakes_to_subject(
    ctx: &CrawlCtx<'_>,
    spec: &SelectSpec,
    s: Sid,
    flakes: &[Flake],
    depth: usize,
    seen: &HashSet<Sid>,
) -> Result<Map<String, Value>, QuadStreamError> {
    let mut out = Map::new();
    if spec.id {
        out.insert("id".to_string(), Value::from(ctx.cache.display_sid(ctx.db, ctx.context, s)));
    }

    // Predicate groups are adjacent in spot order.
    let mut i = 0;
    while i < flakes.len() {
        let pid = flakes[i].p;
        let mut j = i + 1;
        while j < flakes.len() && flakes[j].p == pid {
            j += 1;
        }
        let group = &flakes[i..j];
        i = j;

        let Some((sub, selected)) = select_for(ctx, spec, pid) else {
            continue;
        };
        if !selected && !spec.wildcard {
            continue;
        }

        let info = ctx.db.schema.property(pid);
        let multi = info.is_some_and(|p| p.multi) || group.len() > 1;
        let is_component = info.is_some_and(|p| p.component);

        let mut values = Vec::with_capacity(group.len());
        for f in group {
            if let Some(v) = emit_value(ctx, spec, &sub, is_component, f, depth, seen)? {
                values.push(v);
            }
        }
        if values.is_empty() {
            continue;
        }
        page_values(&mut values, &sub);

        let name = display_name(ctx, spec, &sub, pid);
        if multi {
            out.insert(name, Value::Array(values));
        } else {
            out.insert(name, values.into_iter().next().unwrap());
        }
    }

    // Reverse references: subjects pointing at `s` through the predicate.
    for (&pid, sub) in &spec.reverse {
        let refs = index_range_eq(
            ctx.db,
            IndexType::Opst,
            RangeTarget::default().with_o(Object::Sid(s)).with_p(pid),
            &ctx.range_opts(),
        )?;
        let mut values = Vec::new();
        for f in &refs {
            if let Some(nested) = &sub.spec {
                if let Some(v) = recurse(ctx, nested, sub, f.s, depth, seen)? {
                    values.push(v);
                }
            } else {
                values.push(Value::from(ctx.cache.display_sid(ctx.db, ctx.context, f.s)));
            }
        }
        if values.is_empty() {
            continue;
        }
        page_values(&mut values, sub);
        let name = sub.as_name.clone().unwrap_or_else(|| {
            format!("_/{}", display_name(ctx, spec, sub, pid))
        });
        out.insert(name, Value::Array(values));
    }

    Ok(out)
}

/// Resolve the sub-select for a predicate: explicit pid entry, then
/// ns-lookup by name, then the wildcard default. The bool is whether the
/// predicate was explicitly selected.
fn select_for(
    ctx: &CrawlCtx<'_>,
    spec: &SelectSpec,
    pid: Pid,
) -> Option<(SubSelect, bool)> {
    if let Some(sub) = spec.preds.get(&pid) {
        return Some((sub.clone(), true));
    }
    if !spec.ns_lookup.is_empty()
        && let Some(info) = ctx.db.schema.property(pid)
    {
        for name in [info.iri.as_str(), ctx.context.compact_iri(&info.iri).as_str()] {
            if let Some(sub) = spec.ns_lookup.get(name) {
                return Some((sub.clone(), true));
            }
        }
    }
    if spec.wildcard {
        return Some((SubSelect::default(), false));
    }
    None
}

fn display_name(ctx: &CrawlCtx<'_>, spec: &SelectSpec, sub: &SubSelect, pid: Pid) -> String {
    if let Some(name) = &sub.as_name {
        return name.clone();
    }
    match ctx.db.schema.property(pid) {
        Some(info) if spec.compact => ctx.context.compact_iri(&info.iri),
        Some(info) => info.iri.clone(),
        None => pid.to_string(),
    }
}

/// One object value. `None` means emission stopped (cycle, depth, or an
/// unselected bare value).
fn emit_value(
    ctx: &CrawlCtx<'_>,
    spec: &SelectSpec,
    sub: &SubSelect,
    is_component: bool,
    f: &Flake,
    depth: usize,
    seen: &HashSet<Sid>,
) -> Result<Option<Value>, QuadStreamError> {
    if f.dt == dt::TAG {
        let Object::Sid(tag) = f.o else {
            return Ok(Some(f.o.to_json()));
        };
        return Ok(Some(match ctx.db.schema.tag_name(tag) {
            Some(name) => Value::from(name),
            None => Value::from(tag),
        }));
    }
    if f.dt == dt::REF {
        let Object::Sid(obj) = f.o else {
            return Ok(Some(f.o.to_json()));
        };
        // Recurse on nested selection or wildcard sub-spec; component
        // references follow whenever component-follow is on.
        if let Some(nested) = &sub.spec {
            return recurse(ctx, nested, sub, obj, depth, seen);
        }
        if is_component && spec.component_follow {
            let nested = Arc::new(SelectSpec {
                component_follow: true,
                ..SelectSpec::wildcard()
            });
            return recurse(ctx, &nested, sub, obj, depth, seen);
        }
        return Ok(Some(Value::from(ctx.cache.display_sid(ctx.db, ctx.context, obj))));
    }
    Ok(Some(f.o.to_json()))
}

fn recurse(
    ctx: &CrawlCtx<'_>,
    nested: &Arc<SelectSpec>,
    sub: &SubSelect,
    obj: Sid,
    depth: usize,
    seen: &HashSet<Sid>,
) -> Result<Option<Value>, QuadStreamError> {
    let max_depth = sub.recur.unwrap_or(DEFAULT_RECUR_DEPTH);
    if depth + 1 >= max_depth || seen.contains(&obj) {
        return Ok(None);
    }
    let flakes = index_range_eq(
        ctx.db,
        IndexType::Spot,
        RangeTarget::subject(obj),
        &ctx.range_opts(),
    )?;
    if flakes.is_empty() {
        return Ok(None);
    }
    // Copy, never share: sibling branches may revisit this subject.
    let mut seen = seen.clone();
    seen.insert(obj);
    let map = flakes_to_subject(ctx, nested, obj, &flakes, depth + 1, &seen)?;
    Ok(Some(Value::Object(map)))
}

/// Order, offset, and limit multi-valued predicates.
fn page_values(values: &mut Vec<Value>, sub: &SubSelect) {
    if let Some(dir) = sub.order_by {
        values.sort_by(|a, b| {
            let ord = json_cmp(a, b);
            if dir == Direction::Desc { ord.reverse() } else { ord }
        });
    }
    if let Some(offset) = sub.offset
        && offset > 0
    {
        values.drain(..offset.min(values.len()));
    }
    if let Some(limit) = sub.limit {
        values.truncate(limit);
    }
}

fn json_cmp(a: &Value, b: &Value) -> std::cmp::Ordering {
    use std::cmp::Ordering;
    match (a, b) {
        (Value::Number(a), Value::Number(b)) => a
            .as_f64()
            .unwrap_or(f64::NAN)
            .total_cmp(&b.as_f64().unwrap_or(f64::NAN)),
        (Value::String(a), Value::String(b)) => a.cmp(b),
        (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
        _ => Ordering::Equal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::DbBuilder;
    use crate::schema::PropertyInfo;

    struct Fixture {
        db: Arc<Db>,
        ann: Sid,
        name: Pid,
        friend: Pid,
    }

    fn fixture() -> Fixture {
        let mut b = DbBuilder::new();
        let name = b.predicate(PropertyInfo::scalar("ex:name", dt::STRING));
        let friend = b.predicate(PropertyInfo::reference("ex:friend").multi());
        let ann = b.subject("ex:ann");
        let bob = b.subject("ex:bob");
        b.assert(ann, name, Object::str("Ann"));
        b.assert(bob, name, Object::str("Bob"));
        b.assert(ann, friend, Object::Sid(bob));
        b.assert(bob, friend, Object::Sid(ann));
        Fixture { db: b.build(), ann, name, friend }
    }

    fn ctx<'a>(db: &'a Db, context: &'a Context, cache: &'a CompactCache, fuel: &'a Arc<Fuel>) -> CrawlCtx<'a> {
        CrawlCtx { db, context, cache, fuel }
    }

    #[test]
    fn test_wildcard_subject_map() {
        let fx = fixture();
        let context = Context::new();
        let cache = CompactCache::new(true);
        let fuel = Arc::new(Fuel::unlimited());
        let c = ctx(&fx.db, &context, &cache, &fuel);
        let got = crawl_subject(&c, &SelectSpec::wildcard(), fx.ann).unwrap();
        assert_eq!(got["id"], Value::from("ex:ann"));
        assert_eq!(got["ex:name"], Value::from("Ann"));
        // Un-recursed reference renders as its display IRI; the predicate
        // is multi so it stays a vector.
        assert_eq!(got["ex:friend"], Value::Array(vec![Value::from("ex:bob")]));
    }

    #[test]
    fn test_nested_selection_recurses_and_stops_on_cycle() {
        let fx = fixture();
        let context = Context::new();
        let cache = CompactCache::new(true);
        let fuel = Arc::new(Fuel::unlimited());
        let c = ctx(&fx.db, &context, &cache, &fuel);

        let spec = SelectSpec {
            id: true,
            compact: true,
            ..Default::default()
        }
        .with_pred(fx.name, SubSelect::default())
        .with_pred(fx.friend, SubSelect::nested(SelectSpec::wildcard()));

        let got = crawl_subject(&c, &spec, fx.ann).unwrap();
        let friends = got["ex:friend"].as_array().unwrap();
        let bob = friends[0].as_object().unwrap();
        assert_eq!(bob["ex:name"], Value::from("Bob"));
        // Bob's friend edge points back at Ann: the cycle stops emission,
        // so the key disappears rather than recursing forever.
        assert!(!bob.contains_key("ex:friend"));
    }

    #[test]
    fn test_recur_depth_bounds_chain() {
        let mut b = DbBuilder::new();
        let next = b.predicate(PropertyInfo::reference("ex:next"));
        let subjects: Vec<Sid> = (0..5).map(|i| b.subject(&format!("ex:n{i}"))).collect();
        for w in subjects.windows(2) {
            b.assert(w[0], next, Object::Sid(w[1]));
        }
        let db = b.build();
        let context = Context::new();
        let cache = CompactCache::new(true);
        let fuel = Arc::new(Fuel::unlimited());
        let c = ctx(&db, &context, &cache, &fuel);

        // Two nested levels selected, but recur = 2 cuts the chain after
        // the first hop.
        let inner = SelectSpec::wildcard().with_pred(
            next,
            SubSelect { spec: Some(Arc::new(SelectSpec::wildcard())), recur: Some(2), ..Default::default() },
        );
        let spec = SelectSpec::wildcard().with_pred(
            next,
            SubSelect { spec: Some(Arc::new(inner)), recur: Some(2), ..Default::default() },
        );

        let got = crawl_subject(&c, &spec, subjects[0]).unwrap();
        let n1 = got["ex:next"].as_object().unwrap();
        // n1 would recurse into n2 at depth 2, which the bound forbids.
        assert!(!n1.contains_key("ex:next"));
    }

    #[test]
    fn test_reverse_reference() {
        let fx = fixture();
        let context = Context::new();
        let cache = CompactCache::new(true);
        let fuel = Arc::new(Fuel::unlimited());
        let c = ctx(&fx.db, &context, &cache, &fuel);

        let spec = SelectSpec {
            id: true,
            compact: true,
            ..Default::default()
        }
        .with_reverse(fx.friend, SubSelect::default());
        let got = crawl_subject(&c, &spec, fx.ann).unwrap();
        // Bob points at Ann through ex:friend.
        assert_eq!(got["_/ex:friend"], Value::Array(vec![Value::from("ex:bob")]));
    }

    #[test]
    fn test_multi_value_paging() {
        let mut b = DbBuilder::new();
        let score = b.predicate(PropertyInfo::scalar("ex:score", dt::LONG).multi());
        let s = b.subject("ex:s");
        for n in [5, 1, 9, 3] {
            b.assert(s, score, Object::Int(n));
        }
        let db = b.build();
        let context = Context::new();
        let cache = CompactCache::new(true);
        let fuel = Arc::new(Fuel::unlimited());
        let c = ctx(&db, &context, &cache, &fuel);

        let sub = SubSelect {
            order_by: Some(Direction::Desc),
            limit: Some(2),
            ..Default::default()
        };
        let spec = SelectSpec { id: false, compact: true, ..Default::default() }
            .with_pred(score, sub);
        let got = crawl_subject(&c, &spec, s).unwrap();
        assert_eq!(
            got["ex:score"],
            Value::Array(vec![Value::from(9), Value::from(5)])
        );
    }

    #[test]
    fn test_fuel_exhaustion_aborts_crawl() {
        let fx = fixture();
        let context = Context::new();
        let cache = CompactCache::new(true);
        let fuel = Arc::new(Fuel::new(1));
        let c = ctx(&fx.db, &context, &cache, &fuel);
        let err = crawl_subject(&c, &SelectSpec::wildcard(), fx.ann).unwrap_err();
        assert_eq!(err.error_tag(), "db/exceeded-cost");
    }
}
