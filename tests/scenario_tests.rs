//! End-to-end query scenarios against the in-memory backend.
//!
//! Each section builds a small db, runs a parsed query through the full
//! pipeline (optimize → match → shape), and checks the JSON result:
//! - ordered scans and filters
//! - class expansion
//! - compound patterns (optional, union, minus, exists, bind)
//! - grouping and aggregates
//! - subgraph selection
//! - projection modes, paging, VALUES
//! - policy drops, fuel budgets, named and virtual graphs

mod common;

use std::sync::Arc;

use common::{people_db, zoo_db};
use quadstream::db::{DbBuilder, Policy, VirtualGraphExec};
use quadstream::flake::{Object, dt};
use quadstream::query::{
    Direction, GraphAlias, Match, ParsedQuery, Pattern, Selector, Solution, TriplePattern,
    TupleSlot,
};
use quadstream::schema::PropertyInfo;
use quadstream::subgraph::SelectSpec;
use serde_json::json;

// ── Ordered scans ──────────────────────────────────────────────────────────

#[test]
fn test_order_by_age_ascending() {
    let fx = people_db();
    let mut qb = ParsedQuery::builder();
    let s = qb.var("?s");
    let a = qb.var("?a");
    qb.tuple(TupleSlot::var(s), TupleSlot::iri("ex:age"), TupleSlot::var(a));
    let q = qb.select_vars(&[s]).order_by(a, Direction::Asc).build().unwrap();

    let got = quadstream::query(&fx.db, &q).unwrap();
    assert_eq!(got, json!([["ex:B"], ["ex:A"], ["ex:C"]]));
}

#[test]
fn test_order_by_descending_with_limit() {
    let fx = people_db();
    let mut qb = ParsedQuery::builder();
    let s = qb.var("?s");
    let a = qb.var("?a");
    qb.tuple(TupleSlot::var(s), TupleSlot::iri("ex:age"), TupleSlot::var(a));
    let q = qb
        .select_vars(&[s, a])
        .order_by(a, Direction::Desc)
        .limit(2)
        .build()
        .unwrap();
    let got = quadstream::query(&fx.db, &q).unwrap();
    assert_eq!(got, json!([["ex:C", 40], ["ex:A", 30]]));
}

// ── Class expansion ────────────────────────────────────────────────────────

#[test]
fn test_class_expansion_reaches_transitive_subclasses() {
    let fx = zoo_db();
    for class in ["ex:Animal", "ex:Mammal", "ex:Dog"] {
        let mut qb = ParsedQuery::builder();
        let s = qb.var("?s");
        qb.pattern(Pattern::Class(TriplePattern::new(
            TupleSlot::var(s),
            TupleSlot::iri("rdf:type"),
            TupleSlot::iri(class),
        )));
        let q = qb.select_vars(&[s]).build().unwrap();
        let got = quadstream::query(&fx.db, &q).unwrap();
        assert_eq!(got, json!([["ex:rex"]]), "query for {class}");
    }
}

#[test]
fn test_class_expansion_does_not_duplicate_multi_typed_subjects() {
    let mut b = DbBuilder::new();
    let animal = b.class("ex:Animal");
    let dog = b.class("ex:Dog");
    b.subclass_of(dog, animal);
    let rex = b.subject("ex:rex");
    // rex is typed both directly and through the subclass.
    b.type_of(rex, dog, 1);
    b.type_of(rex, animal, 1);
    let db = b.build();

    let mut qb = ParsedQuery::builder();
    let s = qb.var("?s");
    qb.pattern(Pattern::Class(TriplePattern::new(
        TupleSlot::var(s),
        TupleSlot::iri("rdf:type"),
        TupleSlot::iri("ex:Animal"),
    )));
    let q = qb.select_vars(&[s]).build().unwrap();
    let got = quadstream::query(&db, &q).unwrap();
    assert_eq!(got, json!([["ex:rex"]]));
}

// ── Filters ────────────────────────────────────────────────────────────────

#[test]
fn test_filter_keeps_matching_solutions() {
    let fx = people_db();
    let build = |threshold: i64| {
        let mut qb = ParsedQuery::builder();
        let s = qb.var("?s");
        let n = qb.var("?n");
        let a = qb.var("?a");
        qb.tuple(TupleSlot::var(s), TupleSlot::iri("ex:name"), TupleSlot::var(n));
        qb.tuple(TupleSlot::var(s), TupleSlot::iri("ex:age"), TupleSlot::var(a));
        qb.filter(&format!("(> ?a {threshold})")).unwrap();
        qb.select_vars(&[s, n]).build().unwrap()
    };

    let got = quadstream::query(&fx.db, &build(25)).unwrap();
    // Ann (30) and Cay (40) pass; Bob (25) does not.
    assert_eq!(got, json!([["ex:A", "Ann"], ["ex:C", "Cay"]]));

    let got = quadstream::query(&fx.db, &build(35)).unwrap();
    assert_eq!(got, json!([["ex:C", "Cay"]]));

    let got = quadstream::query(&fx.db, &build(99)).unwrap();
    assert_eq!(got, json!([]));
}

#[test]
fn test_inlined_and_standalone_filters_agree() {
    let fx = people_db();
    let mut qb = ParsedQuery::builder();
    let s = qb.var("?s");
    let a = qb.var("?a");
    qb.tuple(TupleSlot::var(s), TupleSlot::iri("ex:age"), TupleSlot::var(a));
    qb.filter("(and (>= ?a 25) (< ?a 40))").unwrap();
    let q = qb.select_vars(&[s, a]).build().unwrap();

    // Inlining may change emission order (the lowered range scans `post`
    // instead of `psot`); the result multiset must not change.
    let sorted_rows = |v: serde_json::Value| {
        let mut rows = v.as_array().unwrap().to_vec();
        rows.sort_by_key(|r| r.to_string());
        rows
    };
    let optimized = sorted_rows(quadstream::query(&fx.db, &q).unwrap());
    let raw = sorted_rows(quadstream::execute_unoptimized(&fx.db, &q).unwrap());
    assert_eq!(optimized, raw);
    assert_eq!(optimized, sorted_rows(json!([["ex:A", 30], ["ex:B", 25]])));
}

// ── Compound patterns ──────────────────────────────────────────────────────

#[test]
fn test_optional_keeps_unmatched_inputs() {
    let mut b = DbBuilder::new();
    let name = b.predicate(PropertyInfo::scalar("ex:name", dt::STRING));
    let email = b.predicate(PropertyInfo::scalar("ex:email", dt::STRING));
    let ann = b.subject("ex:A");
    let bob = b.subject("ex:B");
    b.assert(ann, name, Object::str("Ann"));
    b.assert(bob, name, Object::str("Bob"));
    b.assert(ann, email, Object::str("ann@example.com"));
    let db = b.build();

    let mut qb = ParsedQuery::builder();
    let s = qb.var("?s");
    let n = qb.var("?n");
    let e = qb.var("?e");
    qb.tuple(TupleSlot::var(s), TupleSlot::iri("ex:name"), TupleSlot::var(n));
    qb.pattern(Pattern::Optional(vec![Pattern::Tuple(TriplePattern::new(
        TupleSlot::var(s),
        TupleSlot::iri("ex:email"),
        TupleSlot::var(e),
    ))]));
    let q = qb.select_vars(&[n, e]).build().unwrap();
    let got = quadstream::query(&db, &q).unwrap();
    // Bob survives with a null email; Ann is extended, not duplicated.
    assert_eq!(got, json!([["Ann", "ann@example.com"], ["Bob", null]]));
}

#[test]
fn test_union_concatenates_branches_in_order() {
    let fx = people_db();
    let mut qb = ParsedQuery::builder();
    let s = qb.var("?s");
    let v = qb.var("?v");
    qb.pattern(Pattern::Union(vec![
        vec![Pattern::Tuple(TriplePattern::new(
            TupleSlot::var(s),
            TupleSlot::iri("ex:age"),
            TupleSlot::val(Object::Int(40), dt::LONG),
        ))],
        vec![Pattern::Tuple(TriplePattern::new(
            TupleSlot::var(s),
            TupleSlot::iri("ex:name"),
            TupleSlot::var(v),
        ))],
    ]));
    let q = qb.select_vars(&[s]).build().unwrap();
    let got = quadstream::query(&fx.db, &q).unwrap();
    // First branch (age = 40) yields Cay; then the name branch yields all
    // three in index order.
    assert_eq!(
        got,
        json!([["ex:C"], ["ex:A"], ["ex:B"], ["ex:C"]])
    );
}

#[test]
fn test_minus_and_exists() {
    let mut b = DbBuilder::new();
    let name = b.predicate(PropertyInfo::scalar("ex:name", dt::STRING));
    let email = b.predicate(PropertyInfo::scalar("ex:email", dt::STRING));
    let ann = b.subject("ex:A");
    let bob = b.subject("ex:B");
    b.assert(ann, name, Object::str("Ann"));
    b.assert(bob, name, Object::str("Bob"));
    b.assert(ann, email, Object::str("ann@example.com"));
    let db = b.build();

    let build = |negated: bool| {
        let mut qb = ParsedQuery::builder();
        let s = qb.var("?s");
        let n = qb.var("?n");
        let e = qb.var("?e");
        qb.tuple(TupleSlot::var(s), TupleSlot::iri("ex:name"), TupleSlot::var(n));
        let nested = vec![Pattern::Tuple(TriplePattern::new(
            TupleSlot::var(s),
            TupleSlot::iri("ex:email"),
            TupleSlot::var(e),
        ))];
        qb.pattern(if negated {
            Pattern::Minus(nested)
        } else {
            Pattern::Exists(nested)
        });
        qb.select_vars(&[n]).build().unwrap()
    };

    assert_eq!(quadstream::query(&db, &build(true)).unwrap(), json!([["Bob"]]));
    assert_eq!(quadstream::query(&db, &build(false)).unwrap(), json!([["Ann"]]));
}

#[test]
fn test_bind_computes_new_binding() {
    let fx = people_db();
    let mut qb = ParsedQuery::builder();
    let s = qb.var("?s");
    let a = qb.var("?a");
    let doubled = qb.var("?doubled");
    qb.tuple(TupleSlot::var(s), TupleSlot::iri("ex:age"), TupleSlot::var(a));
    qb.bind(doubled, "(* ?a 2)").unwrap();
    let q = qb
        .select_vars(&[s, doubled])
        .order_by(a, Direction::Asc)
        .build()
        .unwrap();
    let got = quadstream::query(&fx.db, &q).unwrap();
    assert_eq!(got, json!([["ex:B", 50], ["ex:A", 60], ["ex:C", 80]]));
}

// ── Grouping and aggregates ────────────────────────────────────────────────

#[test]
fn test_group_by_with_aggregates() {
    let mut b = DbBuilder::new();
    let dept = b.predicate(PropertyInfo::scalar("ex:dept", dt::STRING));
    let salary = b.predicate(PropertyInfo::scalar("ex:salary", dt::LONG));
    for (iri, d, pay) in [
        ("ex:e1", "eng", 100),
        ("ex:e2", "eng", 80),
        ("ex:e3", "ops", 60),
    ] {
        let s = b.subject(iri);
        b.assert(s, dept, Object::str(d));
        b.assert(s, salary, Object::Int(pay));
    }
    let db = b.build();

    let mut qb = ParsedQuery::builder();
    let s = qb.var("?s");
    let d = qb.var("?d");
    let pay = qb.var("?pay");
    qb.tuple(TupleSlot::var(s), TupleSlot::iri("ex:dept"), TupleSlot::var(d));
    qb.tuple(TupleSlot::var(s), TupleSlot::iri("ex:salary"), TupleSlot::var(pay));
    let avg = qb.aggregate("(as (avg ?pay) ?mean)").unwrap();
    let count = qb.aggregate("(count ?pay)").unwrap();
    let q = qb
        .select(vec![Selector::Var(d), avg, count])
        .group_by(&[d])
        .order_by(d, Direction::Asc)
        .build()
        .unwrap();
    let got = quadstream::query(&db, &q).unwrap();
    assert_eq!(got, json!([["eng", 90.0, 2], ["ops", 60.0, 1]]));
}

#[test]
fn test_aggregate_without_group_by_folds_everything() {
    let fx = people_db();
    let mut qb = ParsedQuery::builder();
    let s = qb.var("?s");
    let a = qb.var("?a");
    qb.tuple(TupleSlot::var(s), TupleSlot::iri("ex:age"), TupleSlot::var(a));
    let sum = qb.aggregate("(sum ?a)").unwrap();
    let q = qb.select(vec![sum]).build().unwrap();
    let got = quadstream::query(&fx.db, &q).unwrap();
    assert_eq!(got, json!([[95]]));
}

// ── Subgraph selection ─────────────────────────────────────────────────────

#[test]
fn test_subgraph_selector_builds_subject_maps() {
    let fx = people_db();
    let mut qb = ParsedQuery::builder();
    let s = qb.var("?s");
    let a = qb.var("?a");
    qb.tuple(
        TupleSlot::var(s),
        TupleSlot::iri("ex:age"),
        TupleSlot::var(a),
    );
    qb.filter("(> ?a 35)").unwrap();
    let q = qb
        .select(vec![Selector::Subgraph {
            var: s,
            spec: Arc::new(SelectSpec::wildcard()),
        }])
        .build()
        .unwrap();
    let got = quadstream::query(&fx.db, &q).unwrap();
    assert_eq!(
        got,
        json!([[{"id": "ex:C", "ex:age": 40, "ex:name": "Cay"}]])
    );
}

// ── Projection modes, paging, VALUES ───────────────────────────────────────

#[test]
fn test_select_one_returns_first_row() {
    let fx = people_db();
    let mut qb = ParsedQuery::builder();
    let s = qb.var("?s");
    let a = qb.var("?a");
    qb.tuple(TupleSlot::var(s), TupleSlot::iri("ex:age"), TupleSlot::var(a));
    let q = qb
        .select_one(vec![Selector::Var(s)])
        .order_by(a, Direction::Desc)
        .build()
        .unwrap();
    let got = quadstream::query(&fx.db, &q).unwrap();
    assert_eq!(got, json!("ex:C"));
}

#[test]
fn test_select_distinct_dedupes_rows() {
    let fx = people_db();
    let mut qb = ParsedQuery::builder();
    let s = qb.var("?s");
    let v = qb.var("?v");
    let p = qb.var("?p");
    // Every (s, p, v) flake of each subject; distinct on the subject alone.
    qb.tuple(TupleSlot::var(s), TupleSlot::var(p), TupleSlot::var(v));
    let q = qb.select_distinct(vec![Selector::Var(s)]).build().unwrap();
    let got = quadstream::query(&fx.db, &q).unwrap();
    let rows = got.as_array().unwrap();
    let subjects: Vec<&str> = rows.iter().map(|r| r[0].as_str().unwrap()).collect();
    let mut deduped = subjects.clone();
    deduped.dedup();
    assert_eq!(subjects, deduped);
    assert!(subjects.contains(&"ex:A"));
}

#[test]
fn test_offset_and_limit_page_rows() {
    let fx = people_db();
    let mut qb = ParsedQuery::builder();
    let s = qb.var("?s");
    let a = qb.var("?a");
    qb.tuple(TupleSlot::var(s), TupleSlot::iri("ex:age"), TupleSlot::var(a));
    let q = qb
        .select_vars(&[s])
        .order_by(a, Direction::Asc)
        .offset(1)
        .limit(1)
        .build()
        .unwrap();
    let got = quadstream::query(&fx.db, &q).unwrap();
    assert_eq!(got, json!([["ex:A"]]));
}

#[test]
fn test_values_seed_the_pipeline() {
    let fx = people_db();
    let mut qb = ParsedQuery::builder();
    let s = qb.var("?s");
    let a = qb.var("?a");
    qb.value(s, Match::new(Some(s), Object::Sid(fx.bob), dt::REF));
    qb.tuple(TupleSlot::var(s), TupleSlot::iri("ex:age"), TupleSlot::var(a));
    let q = qb.select_vars(&[s, a]).build().unwrap();
    let got = quadstream::query(&fx.db, &q).unwrap();
    assert_eq!(got, json!([["ex:B", 25]]));
}

// ── Policy, fuel, graphs ───────────────────────────────────────────────────

#[test]
fn test_policy_drops_rows_silently() {
    let mut b = DbBuilder::new();
    let age = b.predicate(PropertyInfo::scalar("ex:age", dt::LONG));
    let ann = b.subject("ex:A");
    let hidden = b.subject("ex:H");
    b.assert(ann, age, Object::Int(30));
    b.assert(hidden, age, Object::Int(99));
    let db = b
        .policy(Policy::Restricted(Arc::new(move |_, f| f.s != hidden)))
        .build();

    let mut qb = ParsedQuery::builder();
    let s = qb.var("?s");
    let a = qb.var("?a");
    qb.tuple(TupleSlot::var(s), TupleSlot::iri("ex:age"), TupleSlot::var(a));
    let q = qb.select_vars(&[s]).build().unwrap();
    let got = quadstream::query(&db, &q).unwrap();
    assert_eq!(got, json!([["ex:A"]]));
}

#[test]
fn test_fuel_budget_aborts_with_exceeded_cost() {
    let fx = people_db();
    let mut qb = ParsedQuery::builder();
    let s = qb.var("?s");
    let a = qb.var("?a");
    qb.tuple(TupleSlot::var(s), TupleSlot::iri("ex:age"), TupleSlot::var(a));
    let opts = quadstream::config::QueryOpts { max_fuel: 2, ..Default::default() };
    let q = qb.select_vars(&[s]).opts(opts).build().unwrap();
    let err = quadstream::query(&fx.db, &q).unwrap_err();
    assert_eq!(err.error_tag(), "db/exceeded-cost");
    assert_eq!(err.status(), 400);
}

#[test]
fn test_named_graph_scopes_scans() {
    let mut b = DbBuilder::new();
    let label = b.predicate(PropertyInfo::scalar("ex:label", dt::STRING));
    let s1 = b.subject("ex:s1");
    b.assert(s1, label, Object::str("in-default"));
    b.assert_graph("aux", s1, label, Object::str("in-aux"), 1);
    let db = b.build();

    let mut qb = ParsedQuery::builder();
    let s = qb.var("?s");
    let v = qb.var("?v");
    qb.pattern(Pattern::Graph {
        alias: GraphAlias::Named("aux".into()),
        clause: vec![Pattern::Tuple(TriplePattern::new(
            TupleSlot::var(s),
            TupleSlot::iri("ex:label"),
            TupleSlot::var(v),
        ))],
    });
    let q = qb.select_vars(&[v]).build().unwrap();
    let got = quadstream::query(&db, &q).unwrap();
    assert_eq!(got, json!([["in-aux"]]));
}

struct EchoExec;

impl VirtualGraphExec for EchoExec {
    fn execute(
        &self,
        _db: &quadstream::db::Db,
        _clause: &[Pattern],
        input: &Solution,
    ) -> Result<Vec<Solution>, quadstream::QuadStreamError> {
        Ok(vec![input.clone()])
    }
}

#[test]
fn test_virtual_graph_dispatches_to_executor() {
    let mut b = DbBuilder::new();
    let age = b.predicate(PropertyInfo::scalar("ex:age", dt::LONG));
    let ann = b.subject("ex:A");
    b.assert(ann, age, Object::Int(30));
    let db = b.virtual_graph("##echo", Arc::new(EchoExec)).build();

    let mut qb = ParsedQuery::builder();
    let s = qb.var("?s");
    let a = qb.var("?a");
    qb.tuple(TupleSlot::var(s), TupleSlot::iri("ex:age"), TupleSlot::var(a));
    qb.pattern(Pattern::Graph { alias: GraphAlias::Virtual("##echo".into()), clause: vec![] });
    let q = qb.select_vars(&[s]).build().unwrap();
    let got = quadstream::query(&db, &q).unwrap();
    assert_eq!(got, json!([["ex:A"]]));

    // Without a registered executor the alias is an invalid query.
    let mut qb = ParsedQuery::builder();
    let s = qb.var("?s");
    qb.pattern(Pattern::Graph { alias: GraphAlias::Virtual("##missing".into()), clause: vec![] });
    let q = qb.select_vars(&[s]).build().unwrap();
    let err = quadstream::query(&db, &q).unwrap_err();
    assert_eq!(err.error_tag(), "db/invalid-query");
}

// ── Novelty and as-of views ────────────────────────────────────────────────

#[test]
fn test_novelty_flakes_are_visible_and_retractable() {
    let mut b = DbBuilder::new();
    let age = b.predicate(PropertyInfo::scalar("ex:age", dt::LONG));
    let ann = b.subject("ex:A");
    let bob = b.subject("ex:B");
    b.assert_at(ann, age, Object::Int(30), 1);
    // Uncommitted: Bob appears, Ann's age is retracted.
    b.novelty_assert(bob, age, Object::Int(25), 2);
    b.novelty_retract(ann, age, Object::Int(30), 2);
    let db = b.build();

    let mut qb = ParsedQuery::builder();
    let s = qb.var("?s");
    let a = qb.var("?a");
    qb.tuple(TupleSlot::var(s), TupleSlot::iri("ex:age"), TupleSlot::var(a));
    let q = qb.select_vars(&[s, a]).build().unwrap();
    let got = quadstream::query(&db, &q).unwrap();
    assert_eq!(got, json!([["ex:B", 25]]));
}

#[test]
fn test_as_of_view_hides_newer_transactions() {
    let mut b = DbBuilder::new();
    let age = b.predicate(PropertyInfo::scalar("ex:age", dt::LONG));
    let ann = b.subject("ex:A");
    b.assert_at(ann, age, Object::Int(30), 1);
    b.retract_at(ann, age, Object::Int(30), 2);
    b.assert_at(ann, age, Object::Int(31), 2);
    let db = b.build();

    let query_age = |db: &Arc<quadstream::db::Db>| {
        let mut qb = ParsedQuery::builder();
        let a = qb.var("?a");
        qb.tuple(TupleSlot::iri("ex:A"), TupleSlot::iri("ex:age"), TupleSlot::var(a));
        let q = qb.select_vars(&[a]).build().unwrap();
        quadstream::query(db, &q).unwrap()
    };

    assert_eq!(query_age(&db), json!([[31]]));
    assert_eq!(query_age(&Arc::new(db.as_of(1))), json!([[30]]));
}
