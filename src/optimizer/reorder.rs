//! Statistical pattern reordering.
//!
//! The where-clause splits into maximal contiguous segments of optimizable
//! patterns (tuple, class, id); any other pattern is a boundary that
//! nothing moves across. Within a segment, each pattern scores by
//! estimated selectivity and the segment stable-sorts ascending, so the
//! cheapest pattern seeds the pipeline.
//!
//! Scores:
//!
//! | shape | score |
//! |---|---|
//! | all components bound | 0 |
//! | id with a concrete match | 0 |
//! | `(?s p o)` | `ceil(count(p) / max(1, ndv_values(p)))`, ≥ 1 |
//! | `(s p ?o)` | `ceil(count(p) / max(1, ndv_subjects(p)))`, ≥ 1 |
//! | `(?s p ?o)` | `count(p)` |
//! | class `C` | `count(C)` |
//! | `(?s ?p ?o)` | `1e12` (full scan) |
//! | missing statistic | `1000` |
//!
//! Ties break component-wise, bound before unbound. With no statistics at
//! all, patterns pass through unchanged; segments are still recorded.

use crate::db::Db;
use crate::query::{Pattern, TriplePart, TriplePattern, TupleSlot, Var};

use super::PatternReport;

/// Score of a pattern whose statistics are missing.
pub const FALLBACK_SCORE: f64 = 1000.0;
/// Score of a fully-unbound triple.
pub const FULL_SCAN_SCORE: f64 = 1e12;

pub(super) struct Scored {
    score: f64,
    count: Option<u64>,
    ndv: Option<u64>,
    fallback: bool,
    clamped: bool,
}

/// Reorder the clause. Returns the new clause, per-pattern reports in
/// original order, the segment spans, and whether any reordering happened.
pub fn reorder(
    db: &Db,
    clause: Vec<Pattern>,
    bound_seed: &[Var],
) -> (Vec<Pattern>, Vec<PatternReport>, Vec<(usize, usize)>, bool) {
    let have_stats = !db.stats.is_empty();
    let scored: Vec<Option<Scored>> = clause
        .iter()
        .map(|p| score_pattern(db, p, bound_seed))
        .collect();

    let reports = clause
        .iter()
        .zip(&scored)
        .map(|(p, s)| {
            let label = quick_label(p);
            match s {
                Some(s) => PatternReport {
                    label,
                    score: s.score,
                    count: s.count,
                    ndv: s.ndv,
                    fallback: s.fallback,
                    clamped: s.clamped,
                },
                None => PatternReport {
                    label,
                    score: f64::NAN,
                    count: None,
                    ndv: None,
                    fallback: false,
                    clamped: false,
                },
            }
        })
        .collect();

    // Maximal runs of optimizable patterns.
    let mut segments = Vec::new();
    let mut start = None;
    for (i, s) in scored.iter().enumerate() {
        match (s.is_some(), start) {
            (true, None) => start = Some(i),
            (false, Some(b)) => {
                segments.push((b, i));
                start = None;
            }
            _ => {}
        }
    }
    if let Some(b) = start {
        segments.push((b, clause.len()));
    }

    if !have_stats {
        return (clause, reports, segments, false);
    }

    let mut out: Vec<Option<Pattern>> = clause.into_iter().map(Some).collect();
    let mut changed = false;
    for &(b, e) in &segments {
        let mut idx: Vec<usize> = (b..e).collect();
        idx.sort_by(|&i, &j| {
            let (si, sj) = (scored[i].as_ref().unwrap(), scored[j].as_ref().unwrap());
            si.score
                .total_cmp(&sj.score)
                .then_with(|| tie_break(out[i].as_ref().unwrap(), out[j].as_ref().unwrap()))
        });
        if idx.iter().enumerate().any(|(off, &i)| i != b + off) {
            changed = true;
            let reordered: Vec<Pattern> = idx.iter().map(|&i| out[i].take().unwrap()).collect();
            for (off, p) in reordered.into_iter().enumerate() {
                out[b + off] = Some(p);
            }
        }
    }
    (out.into_iter().map(Option::unwrap).collect(), reports, segments, changed)
}

/// `None` marks a boundary pattern.
fn score_pattern(db: &Db, p: &Pattern, bound_seed: &[Var]) -> Option<Scored> {
    let is_bound = |slot: &TupleSlot| match &slot.part {
        TriplePart::Var(v) => bound_seed.contains(v),
        TriplePart::Val { .. } | TriplePart::Iri(_) => true,
    };
    let pid_of = |slot: &TupleSlot| match &slot.part {
        TriplePart::Iri(iri) => db.schema.pred_id(iri),
        TriplePart::Val { value, .. } => value.as_sid(),
        TriplePart::Var(_) => None,
    };

    let plain = |score: f64| Scored { score, count: None, ndv: None, fallback: false, clamped: false };
    let fallback = || Scored {
        score: FALLBACK_SCORE,
        count: None,
        ndv: None,
        fallback: true,
        clamped: false,
    };

    match p {
        Pattern::Id { s } => Some(if is_bound(s) { plain(0.0) } else { fallback() }),
        Pattern::Class(tp) => {
            let cls = match &tp.o.part {
                TriplePart::Iri(iri) => db.schema.subid(iri),
                TriplePart::Val { value, .. } => value.as_sid(),
                TriplePart::Var(_) => None,
            };
            Some(match cls.and_then(|c| db.stats.class_count(c)) {
                Some(n) => Scored {
                    score: n as f64,
                    count: Some(n),
                    ndv: None,
                    fallback: false,
                    clamped: false,
                },
                None => fallback(),
            })
        }
        Pattern::Tuple(tp) => {
            let (sb, ob) = (is_bound(&tp.s), is_bound(&tp.o));
            if sb && ob && is_bound(&tp.p) {
                return Some(plain(0.0));
            }
            let Some(pid) = pid_of(&tp.p) else {
                // Fully unbound triple is a full scan; anything else
                // without a concrete predicate has no statistic.
                return Some(if !sb && !ob { plain(FULL_SCAN_SCORE) } else { fallback() });
            };
            let Some(stats) = db.stats.property(pid) else {
                return Some(fallback());
            };
            Some(match (sb, ob) {
                // (s p ?o)
                (true, false) => ratio_score(stats.count, stats.ndv_subjects),
                // (?s p o)
                (false, true) => ratio_score(stats.count, stats.ndv_values),
                // (?s p ?o)
                (false, false) => Scored {
                    score: stats.count as f64,
                    count: Some(stats.count),
                    ndv: None,
                    fallback: false,
                    clamped: false,
                },
                (true, true) => plain(0.0),
            })
        }
        _ => None,
    }
}

fn ratio_score(count: u64, ndv: u64) -> Scored {
    let raw = (count as f64 / ndv.max(1) as f64).ceil();
    let clamped = raw < 1.0;
    Scored {
        score: raw.max(1.0),
        count: Some(count),
        ndv: Some(ndv),
        fallback: false,
        clamped,
    }
}

/// Component-wise tie-break: bound slots sort before unbound ones.
fn tie_break(a: &Pattern, b: &Pattern) -> std::cmp::Ordering {
    fn slots(p: &Pattern) -> Option<&TriplePattern> {
        match p {
            Pattern::Tuple(t) | Pattern::Class(t) => Some(t),
            _ => None,
        }
    }
    let (Some(a), Some(b)) = (slots(a), slots(b)) else {
        return std::cmp::Ordering::Equal;
    };
    for (x, y) in a.slots().iter().zip(b.slots().iter()) {
        let xb = !matches!(x.part, TriplePart::Var(_));
        let yb = !matches!(y.part, TriplePart::Var(_));
        match (xb, yb) {
            (true, false) => return std::cmp::Ordering::Less,
            (false, true) => return std::cmp::Ordering::Greater,
            _ => {}
        }
    }
    std::cmp::Ordering::Equal
}

fn quick_label(p: &Pattern) -> String {
    match p {
        Pattern::Tuple(_) => "tuple".into(),
        Pattern::Class(_) => "class".into(),
        Pattern::Id { .. } => "id".into(),
        Pattern::Filter(f) => format!("filter {}", f.src),
        Pattern::Bind { .. } => "bind".into(),
        Pattern::Union(_) => "union".into(),
        Pattern::Optional(_) => "optional".into(),
        Pattern::Minus(_) => "minus".into(),
        Pattern::Exists(_) => "exists".into(),
        Pattern::NotExists(_) => "not-exists".into(),
        Pattern::Graph { .. } => "graph".into(),
        Pattern::PropertyJoin { .. } => "property-join".into(),
    }
}
