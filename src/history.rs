//! History and commit reconstruction.
//!
//! A history query replays a display-transaction window for one subject,
//! predicate, or predicate + object, producing per-`t` entries of asserted
//! and retracted subject maps. With commit details, each `t` additionally
//! carries its commit-wrapper metadata (commit subjects are identified by
//! `s == t`) and the full data delta of that commit.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::DateTime;
use serde_json::{Map, Value};

use crate::config::QueryOpts;
use crate::db::Db;
use crate::error::QuadStreamError;
use crate::flake::{
    Flake, IndexType, Object, RangeTest, Sid, display_t, internal_t, sort_flakes,
};
use crate::fuel::Fuel;
use crate::range::{RangeOpts, RangeTarget, SubjectRef, time_range};
use crate::schema::{Context, preds};
use crate::subgraph::{CompactCache, CrawlCtx, SelectSpec, flakes_to_subject};

/// One bound of a history time window.
#[derive(Debug, Clone, PartialEq)]
pub enum TRef {
    /// A positive display transaction number.
    T(i64),
    /// An ISO-8601 instant, resolved to the newest commit at or before it.
    Iso(String),
    Latest,
}

/// The `t` clause: either `at`, or `from` / `to` (both optional).
#[derive(Debug, Clone, Default)]
pub struct TSpec {
    pub from: Option<TRef>,
    pub to: Option<TRef>,
    pub at: Option<TRef>,
}

/// The history pattern: which of `s`, `p`, `o` are bound picks the index.
#[derive(Debug, Clone, Default)]
pub struct HistoryPattern {
    pub s: Option<String>,
    pub p: Option<String>,
    pub o: Option<Object>,
}

/// A parsed history query.
#[derive(Debug, Clone)]
pub struct HistoryQuery {
    pub history: Option<HistoryPattern>,
    pub commit_details: bool,
    pub context: Context,
    pub t: TSpec,
    pub opts: QueryOpts,
}

impl HistoryQuery {
    pub fn subject(iri: impl Into<String>) -> HistoryQuery {
        HistoryQuery {
            history: Some(HistoryPattern { s: Some(iri.into()), p: None, o: None }),
            commit_details: false,
            context: Context::new(),
            t: TSpec::default(),
            opts: QueryOpts::default(),
        }
    }

    pub fn validate(&self) -> Result<(), QuadStreamError> {
        if self.history.is_none() && !self.commit_details {
            return Err(QuadStreamError::InvalidQuery(
                "history query requires history or commit-details".into(),
            ));
        }
        if self.t.at.is_some() && (self.t.from.is_some() || self.t.to.is_some()) {
            return Err(QuadStreamError::InvalidQuery(
                "t.at is mutually exclusive with t.from / t.to".into(),
            ));
        }
        Ok(())
    }
}

/// Execute a history query, returning entries newest-first.
pub fn history(db: &Db, hq: &HistoryQuery) -> Result<Value, QuadStreamError> {
    hq.validate()?;
    let fuel = Arc::new(Fuel::new(hq.opts.max_fuel));
    let (from, to) = resolve_window(db, &hq.t, &fuel)?;
    if from > to {
        return Err(QuadStreamError::InvalidQuery(format!(
            "history window from {from} exceeds to {to}"
        )));
    }

    let cache = CompactCache::new(hq.opts.cache);
    let crawl = CrawlCtx { db, context: &hq.context, cache: &cache, fuel: &fuel };

    // Per display-t entry, newest first.
    let mut entries: BTreeMap<std::cmp::Reverse<i64>, Map<String, Value>> = BTreeMap::new();

    if let Some(pattern) = &hq.history {
        let flakes = scan_history(db, pattern, from, to, &fuel)?;
        for (t_display, group) in group_by_t(&flakes) {
            let entry = entries.entry(std::cmp::Reverse(t_display)).or_default();
            entry.insert("t".to_string(), Value::from(t_display));
            let (asserts, retracts): (Vec<Flake>, Vec<Flake>) =
                group.into_iter().partition(|f| f.op);
            entry.insert("assert".to_string(), subject_maps(&crawl, asserts)?);
            entry.insert("retract".to_string(), subject_maps(&crawl, retracts)?);
        }
    }

    if hq.commit_details {
        for t_display in from..=to {
            let Some(commit) = commit_map(db, &crawl, t_display, &fuel)? else {
                continue;
            };
            let entry = entries.entry(std::cmp::Reverse(t_display)).or_default();
            entry.insert("t".to_string(), Value::from(t_display));
            entry.insert("commit".to_string(), commit);
        }
    }

    Ok(Value::Array(entries.into_values().map(Value::Object).collect()))
}

fn resolve_window(
    db: &Db,
    t: &TSpec,
    fuel: &Arc<Fuel>,
) -> Result<(i64, i64), QuadStreamError> {
    let latest = display_t(db.t);
    if let Some(at) = &t.at {
        let at = resolve_tref(db, at, latest, fuel)?;
        return Ok((at, at));
    }
    let from = match &t.from {
        Some(r) => resolve_tref(db, r, latest, fuel)?,
        None => 1,
    };
    let to = match &t.to {
        Some(r) => resolve_tref(db, r, latest, fuel)?,
        None => latest,
    };
    Ok((from, to))
}

fn resolve_tref(
    db: &Db,
    r: &TRef,
    latest: i64,
    fuel: &Arc<Fuel>,
) -> Result<i64, QuadStreamError> {
    match r {
        TRef::Latest => Ok(latest),
        TRef::T(n) => {
            if *n < 1 || *n > latest {
                return Err(QuadStreamError::InvalidQuery(format!(
                    "transaction {n} is outside 1..={latest}"
                )));
            }
            Ok(*n)
        }
        TRef::Iso(s) => {
            let target = DateTime::parse_from_rfc3339(s).map_err(|e| {
                QuadStreamError::InvalidQuery(format!("bad ISO-8601 instant {s:?}: {e}"))
            })?;
            // Newest commit at or before the instant, from the commit-time
            // metadata flakes.
            let opts = RangeOpts { fuel: Some(Arc::clone(fuel)), ..Default::default() };
            let flakes = time_range(
                db,
                IndexType::Psot,
                1,
                latest,
                RangeTest::Gte,
                RangeTarget::default().with_p(preds::COMMIT_TIME),
                RangeTest::Lte,
                RangeTarget::default().with_p(preds::COMMIT_TIME),
                &opts,
            )?;
            let mut best: Option<i64> = None;
            for f in &flakes {
                let Some(time) = f.o.as_str() else { continue };
                let Ok(commit_time) = DateTime::parse_from_rfc3339(time) else { continue };
                if commit_time <= target {
                    let t_display = display_t(f.t);
                    best = Some(best.map_or(t_display, |b: i64| b.max(t_display)));
                }
            }
            best.ok_or_else(|| {
                QuadStreamError::InvalidQuery(format!("no commit at or before {s}"))
            })
        }
    }
}

fn scan_history(
    db: &Db,
    pattern: &HistoryPattern,
    from: i64,
    to: i64,
    fuel: &Arc<Fuel>,
) -> Result<Vec<Flake>, QuadStreamError> {
    let opts = RangeOpts { fuel: Some(Arc::clone(fuel)), ..Default::default() };
    let mut target = RangeTarget::default();

    let idx = if let Some(s) = &pattern.s {
        target.s = Some(SubjectRef::Iri(s.clone()));
        IndexType::Spot
    } else if let Some(p) = &pattern.p {
        let Some(pid) = db.schema.pred_id(p) else {
            return Ok(Vec::new());
        };
        target.p = Some(pid);
        if let Some(o) = &pattern.o {
            target.o = Some(o.clone());
            IndexType::Post
        } else {
            IndexType::Psot
        }
    } else {
        return Err(QuadStreamError::InvalidQuery(
            "history pattern must bind a subject or predicate".into(),
        ));
    };
    // With both s and p bound, spot consumes the predicate too.
    if pattern.s.is_some()
        && let Some(p) = &pattern.p
    {
        target.p = db.schema.pred_id(p);
        if target.p.is_none() {
            return Ok(Vec::new());
        }
    }

    time_range(
        db,
        idx,
        from,
        to,
        RangeTest::Gte,
        target.clone(),
        RangeTest::Lte,
        target,
        &opts,
    )
}

/// Group flakes by display `t`.
fn group_by_t(flakes: &[Flake]) -> Vec<(i64, Vec<Flake>)> {
    let mut by_t: BTreeMap<i64, Vec<Flake>> = BTreeMap::new();
    for f in flakes {
        by_t.entry(display_t(f.t)).or_default().push(f.clone());
    }
    by_t.into_iter().collect()
}

/// Build one subject map per distinct subject in `flakes`.
fn subject_maps(crawl: &CrawlCtx<'_>, mut flakes: Vec<Flake>) -> Result<Value, QuadStreamError> {
    sort_flakes(IndexType::Spot, &mut flakes);
    let mut out = Vec::new();
    let mut i = 0;
    while i < flakes.len() {
        let s = flakes[i].s;
        let mut j = i + 1;
        while j < flakes.len() && flakes[j].s == s {
            j += 1;
        }
        let spec = SelectSpec::wildcard();
        let seen = std::collections::HashSet::from([s]);
        let map = flakes_to_subject(crawl, &spec, s, &flakes[i..j], 0, &seen)?;
        out.push(Value::Object(map));
        i = j;
    }
    Ok(Value::Array(out))
}

/// Commit-wrapper map for one display `t`, or `None` when the window holds
/// no commit record for it.
fn commit_map(
    db: &Db,
    crawl: &CrawlCtx<'_>,
    t_display: i64,
    fuel: &Arc<Fuel>,
) -> Result<Option<Value>, QuadStreamError> {
    let opts = RangeOpts { fuel: Some(Arc::clone(fuel)), ..Default::default() };
    let flakes = time_range(
        db,
        IndexType::Tspo,
        t_display,
        t_display,
        RangeTest::Gte,
        RangeTarget::default(),
        RangeTest::Lte,
        RangeTarget::default(),
        &opts,
    )?;
    if flakes.is_empty() {
        return Ok(None);
    }

    let t_internal = internal_t(t_display);
    let mut meta = Map::new();
    let mut asserts: Vec<Flake> = Vec::new();
    let mut retracts: Vec<Flake> = Vec::new();
    for f in &flakes {
        if f.s == t_internal {
            // Commit-wrapper flake: s == t.
            let key = match f.p {
                p if p == preds::COMMIT_T => "t",
                p if p == preds::COMMIT_SIZE => "size",
                p if p == preds::COMMIT_FLAKES => "flakes",
                p if p == preds::COMMIT_PREVIOUS => "previous",
                p if p == preds::COMMIT_ADDRESS => "address",
                p if p == preds::COMMIT_TIME => "time",
                _ => continue,
            };
            meta.insert(key.to_string(), f.o.to_json());
        } else if f.op {
            asserts.push(f.clone());
        } else {
            retracts.push(f.clone());
        }
    }
    if meta.is_empty() && asserts.is_empty() && retracts.is_empty() {
        return Ok(None);
    }

    let mut data = Map::new();
    data.insert("assert".to_string(), subject_maps(crawl, asserts)?);
    data.insert("retract".to_string(), subject_maps(crawl, retracts)?);
    meta.insert("data".to_string(), Value::Object(data));
    Ok(Some(Value::Object(meta)))
}

/// A `(Sid, Pid?)` subject form for callers that already resolved sids.
pub fn history_for_subject(db: &Db, s: Sid, from: i64, to: i64) -> Result<Value, QuadStreamError> {
    let iri = db
        .schema
        .iri(s)
        .ok_or_else(|| QuadStreamError::InvalidQuery(format!("subject {s} has no IRI")))?
        .to_string();
    let mut hq = HistoryQuery::subject(iri);
    hq.t = TSpec { from: Some(TRef::T(from)), to: Some(TRef::T(to)), at: None };
    history(db, &hq)
}
