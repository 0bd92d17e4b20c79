//! The range engine: bounded scans over one covering index.
//!
//! [`index_range`] translates a partially-bound match into a `(start, end)`
//! boundary pair, drives a [`TreeIter`] over the chosen index, slices each
//! merged leaf with `subrange`, applies component predicates and policy,
//! then subject paging and the flake limit, and reduces into a sorted
//! vector. [`time_range`] is the historical variant: it keeps every version
//! in a display-transaction window instead of eliminating shadowed ones.

use std::sync::Arc;

use crate::db::Db;
use crate::error::QuadStreamError;
use crate::flake::{
    Dt, Flake, FlakeBound, IndexType, Object, Pid, RangeTest, Sid, internal_t, subrange,
};
use crate::fuel::Fuel;
use crate::index::{LeafMode, TreeIter};

/// Test applied to a single match in the short form of a range call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchTest {
    Eq,
    Lt,
    Lte,
    Gt,
    Gte,
}

/// A subject position in a range target: either resolved or an IRI still to
/// resolve against the schema.
#[derive(Debug, Clone)]
pub enum SubjectRef {
    Sid(Sid),
    Iri(String),
}

/// Partially-bound match components of a range boundary, in pattern order.
#[derive(Debug, Clone, Default)]
pub struct RangeTarget {
    pub s: Option<SubjectRef>,
    pub p: Option<Pid>,
    pub o: Option<Object>,
    pub dt: Option<Dt>,
}

impl RangeTarget {
    pub fn subject(s: Sid) -> RangeTarget {
        RangeTarget { s: Some(SubjectRef::Sid(s)), ..Default::default() }
    }

    pub fn with_p(mut self, p: Pid) -> RangeTarget {
        self.p = Some(p);
        self
    }

    pub fn with_o(mut self, o: Object) -> RangeTarget {
        self.o = Some(o);
        self
    }

    /// Resolve IRI subjects; `None` when an IRI is unknown (the scan then
    /// matches nothing).
    fn to_bound(&self, db: &Db) -> Option<FlakeBound> {
        let s = match &self.s {
            None => None,
            Some(SubjectRef::Sid(s)) => Some(*s),
            Some(SubjectRef::Iri(iri)) => Some(db.schema.subid(iri)?),
        };
        Some(FlakeBound {
            s,
            p: self.p,
            o: self.o.clone(),
            dt: self.dt,
            t: None,
            op: None,
            m: None,
        })
    }
}

/// Component predicates and paging options for one scan.
#[derive(Clone, Default)]
pub struct RangeOpts {
    pub subject_fn: Option<Arc<dyn Fn(Sid) -> bool + Send + Sync>>,
    pub predicate_fn: Option<Arc<dyn Fn(Pid) -> bool + Send + Sync>>,
    pub object_fn: Option<Arc<dyn Fn(&Object, Dt) -> bool + Send + Sync>>,
    /// Distinct subjects to skip.
    pub offset: usize,
    /// Distinct subjects to keep; 0 = unlimited.
    pub limit: usize,
    /// Hard cap on returned flakes; 0 = unlimited.
    pub flake_limit: usize,
    /// Read-ahead width for node resolution.
    pub parallelism: usize,
    /// Named graph to scan; `None` is the default graph.
    pub graph: Option<String>,
    /// Per-query fuel; burned once per flake emitted.
    pub fuel: Option<Arc<Fuel>>,
}

impl std::fmt::Debug for RangeOpts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RangeOpts")
            .field("offset", &self.offset)
            .field("limit", &self.limit)
            .field("flake_limit", &self.flake_limit)
            .field("graph", &self.graph)
            .finish_non_exhaustive()
    }
}

/// Expand the single `(test, match)` form into a boundary pair.
pub fn expand_test(
    test: MatchTest,
    target: RangeTarget,
) -> (RangeTest, RangeTarget, RangeTest, RangeTarget) {
    match test {
        MatchTest::Eq => (RangeTest::Gte, target.clone(), RangeTest::Lte, target),
        MatchTest::Lt => (RangeTest::Gt, RangeTarget::default(), RangeTest::Lt, target),
        MatchTest::Lte => (RangeTest::Gt, RangeTarget::default(), RangeTest::Lte, target),
        MatchTest::Gt => (RangeTest::Gt, target, RangeTest::Lte, RangeTarget::default()),
        MatchTest::Gte => (RangeTest::Gte, target, RangeTest::Lte, RangeTarget::default()),
    }
}

/// Point-in-time scan at the db's `t`: the short, single-match form.
pub fn index_range_eq(
    db: &Db,
    idx: IndexType,
    target: RangeTarget,
    opts: &RangeOpts,
) -> Result<Vec<Flake>, QuadStreamError> {
    let (st, s, et, e) = expand_test(MatchTest::Eq, target);
    index_range(db, idx, st, s, et, e, opts)
}

/// Point-in-time scan at the db's `t` between two boundaries.
pub fn index_range(
    db: &Db,
    idx: IndexType,
    start_test: RangeTest,
    start: RangeTarget,
    end_test: RangeTest,
    end: RangeTarget,
    opts: &RangeOpts,
) -> Result<Vec<Flake>, QuadStreamError> {
    let mode = LeafMode::TRange { newest: db.t, oldest: -1 };
    scan(db, idx, mode, start_test, start, end_test, end, opts)
}

/// Historical scan over a display-transaction window `[from, to]`,
/// keeping every assert and retract inside it.
#[allow(clippy::too_many_arguments)]
pub fn time_range(
    db: &Db,
    idx: IndexType,
    from_display: i64,
    to_display: i64,
    start_test: RangeTest,
    start: RangeTarget,
    end_test: RangeTest,
    end: RangeTarget,
    opts: &RangeOpts,
) -> Result<Vec<Flake>, QuadStreamError> {
    if from_display > to_display {
        return Err(QuadStreamError::InvalidQuery(format!(
            "time range from {from_display} exceeds to {to_display}"
        )));
    }
    let mode = LeafMode::History {
        newest: internal_t(to_display),
        oldest: internal_t(from_display),
    };
    scan(db, idx, mode, start_test, start, end_test, end, opts)
}

#[allow(clippy::too_many_arguments)]
fn scan(
    db: &Db,
    idx: IndexType,
    mode: LeafMode,
    start_test: RangeTest,
    start: RangeTarget,
    end_test: RangeTest,
    end: RangeTarget,
    opts: &RangeOpts,
) -> Result<Vec<Flake>, QuadStreamError> {
    // An unresolvable IRI boundary matches zero flakes, by contract.
    let (Some(start_bound), Some(end_bound)) = (start.to_bound(db), end.to_bound(db)) else {
        return Ok(Vec::new());
    };

    let graph = db.graph(opts.graph.as_deref())?;
    let root = graph.index(idx);
    let parallelism = if opts.parallelism > 0 {
        opts.parallelism
    } else {
        db.config.parallelism
    };

    tracing::trace!(idx = idx.as_str(), ?mode, "index range scan");

    let tree = TreeIter::new(
        idx,
        db.store.as_ref(),
        &db.cache,
        &root.novelty,
        mode,
        start_bound.clone(),
        end_bound.clone(),
        parallelism,
        root.root.clone(),
    );

    let root_view = db.is_root_view();
    let mut out: Vec<Flake> = Vec::new();
    // Subject paging state: partition the emitted stream by `s`.
    let mut current_subject: Option<Sid> = None;
    let mut subjects_seen: usize = 0;

    'leaves: for leaf in tree {
        let leaf = leaf?;
        let sliced = subrange(idx, &leaf, start_test, &start_bound, end_test, &end_bound);
        for f in sliced {
            if let Some(fuel) = &opts.fuel {
                fuel.burn(1)?;
            }
            if let Some(pred) = &opts.subject_fn
                && !pred(f.s)
            {
                continue;
            }
            if let Some(pred) = &opts.predicate_fn
                && !pred(f.p)
            {
                continue;
            }
            if let Some(pred) = &opts.object_fn
                && !pred(&f.o, f.dt)
            {
                continue;
            }
            // Authorization drops are silent.
            if !root_view && !db.allow_flake(f) {
                continue;
            }
            if current_subject != Some(f.s) {
                current_subject = Some(f.s);
                subjects_seen += 1;
                if opts.limit > 0 && subjects_seen > opts.offset + opts.limit {
                    break 'leaves;
                }
            }
            if subjects_seen <= opts.offset {
                continue;
            }
            out.push(f.clone());
            if opts.flake_limit > 0 && out.len() >= opts.flake_limit {
                break 'leaves;
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{DbBuilder, Policy};
    use crate::flake::dt;
    use crate::schema::PropertyInfo;

    fn age_db() -> (Arc<Db>, Pid, [Sid; 3]) {
        let mut b = DbBuilder::new();
        let age = b.predicate(PropertyInfo::scalar("ex:age", dt::LONG));
        let a = b.subject("ex:A");
        let bb = b.subject("ex:B");
        let c = b.subject("ex:C");
        b.assert(a, age, Object::Int(30));
        b.assert(bb, age, Object::Int(25));
        b.assert(c, age, Object::Int(40));
        (b.build(), age, [a, bb, c])
    }

    #[test]
    fn test_psot_scan_by_predicate() {
        let (db, age, [a, bb, c]) = age_db();
        let got = index_range_eq(
            &db,
            IndexType::Psot,
            RangeTarget::default().with_p(age),
            &RangeOpts::default(),
        )
        .unwrap();
        let subjects: Vec<Sid> = got.iter().map(|f| f.s).collect();
        assert_eq!(subjects, vec![a, bb, c]);
    }

    #[test]
    fn test_spot_scan_by_subject() {
        let (db, _age, [a, ..]) = age_db();
        let got = index_range_eq(
            &db,
            IndexType::Spot,
            RangeTarget::subject(a),
            &RangeOpts::default(),
        )
        .unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].o, Object::Int(30));
    }

    #[test]
    fn test_post_scan_by_predicate_and_object() {
        let (db, age, [_, bb, _]) = age_db();
        let got = index_range_eq(
            &db,
            IndexType::Post,
            RangeTarget::default().with_p(age).with_o(Object::Int(25)),
            &RangeOpts::default(),
        )
        .unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].s, bb);
    }

    #[test]
    fn test_unknown_iri_matches_nothing() {
        let (db, _, _) = age_db();
        let target = RangeTarget {
            s: Some(SubjectRef::Iri("ex:nope".into())),
            ..Default::default()
        };
        let got = index_range_eq(&db, IndexType::Spot, target, &RangeOpts::default()).unwrap();
        assert!(got.is_empty());
    }

    #[test]
    fn test_subject_paging() {
        let (db, age, [_, bb, c]) = age_db();
        let opts = RangeOpts { offset: 1, limit: 2, ..Default::default() };
        let got = index_range_eq(
            &db,
            IndexType::Psot,
            RangeTarget::default().with_p(age),
            &opts,
        )
        .unwrap();
        let subjects: Vec<Sid> = got.iter().map(|f| f.s).collect();
        assert_eq!(subjects, vec![bb, c]);
    }

    #[test]
    fn test_flake_limit_caps_results() {
        let (db, age, _) = age_db();
        let opts = RangeOpts { flake_limit: 2, ..Default::default() };
        let got = index_range_eq(
            &db,
            IndexType::Psot,
            RangeTarget::default().with_p(age),
            &opts,
        )
        .unwrap();
        assert_eq!(got.len(), 2);
    }

    #[test]
    fn test_object_fn_filters_components() {
        let (db, age, [a, _, c]) = age_db();
        let opts = RangeOpts {
            object_fn: Some(Arc::new(|o, _| {
                o.as_i64().is_some_and(|n| n >= 30)
            })),
            ..Default::default()
        };
        let got = index_range_eq(
            &db,
            IndexType::Psot,
            RangeTarget::default().with_p(age),
            &opts,
        )
        .unwrap();
        let subjects: Vec<Sid> = got.iter().map(|f| f.s).collect();
        assert_eq!(subjects, vec![a, c]);
    }

    #[test]
    fn test_policy_drops_are_silent() {
        let mut b = DbBuilder::new();
        let age = b.predicate(PropertyInfo::scalar("ex:age", dt::LONG));
        let a = b.subject("ex:A");
        let hidden = b.subject("ex:H");
        b.assert(a, age, Object::Int(30));
        b.assert(hidden, age, Object::Int(99));
        let db = b
            .policy(Policy::Restricted(Arc::new(move |_, f| f.s != hidden)))
            .build();
        let got = index_range_eq(
            &db,
            IndexType::Psot,
            RangeTarget::default().with_p(age),
            &RangeOpts::default(),
        )
        .unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].s, a);
    }

    #[test]
    fn test_fuel_burns_per_flake() {
        let (db, age, _) = age_db();
        let fuel = Arc::new(Fuel::new(2));
        let opts = RangeOpts { fuel: Some(Arc::clone(&fuel)), ..Default::default() };
        let err = index_range_eq(
            &db,
            IndexType::Psot,
            RangeTarget::default().with_p(age),
            &opts,
        )
        .unwrap_err();
        assert_eq!(err.error_tag(), "db/exceeded-cost");
    }

    #[test]
    fn test_time_range_sees_retracted_versions() {
        let mut b = DbBuilder::new();
        let name = b.predicate(PropertyInfo::scalar("ex:name", dt::STRING));
        let a = b.subject("ex:A");
        b.assert_at(a, name, Object::str("old"), 1);
        b.retract_at(a, name, Object::str("old"), 2);
        b.assert_at(a, name, Object::str("new"), 2);
        let db = b.build();

        let got = time_range(
            &db,
            IndexType::Spot,
            1,
            2,
            RangeTest::Gte,
            RangeTarget::subject(a),
            RangeTest::Lte,
            RangeTarget::subject(a),
            &RangeOpts::default(),
        )
        .unwrap();
        assert_eq!(got.len(), 3);
        assert!(got.iter().any(|f| !f.op));

        // The point-in-time view sees only the surviving assert.
        let now = index_range_eq(
            &db,
            IndexType::Spot,
            RangeTarget::subject(a),
            &RangeOpts::default(),
        )
        .unwrap();
        assert_eq!(now.len(), 1);
        assert_eq!(now[0].o, Object::str("new"));
    }
}
