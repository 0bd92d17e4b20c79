//! Per-property and per-class statistics consumed by the optimizer.
//!
//! Statistics are estimates maintained by ingestion; the optimizer treats
//! them as advisory. A missing entry falls back to a fixed selectivity
//! score rather than an error.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::flake::{Flake, Object, Pid, Sid};
use crate::schema::preds;

/// Cardinality estimates for one predicate.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PropertyStats {
    /// Total asserted flakes carrying this predicate.
    pub count: u64,
    /// Number of distinct object values.
    pub ndv_values: u64,
    /// Number of distinct subjects.
    pub ndv_subjects: u64,
}

/// Statistics snapshot for one db.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Stats {
    props: HashMap<Pid, PropertyStats>,
    classes: HashMap<Sid, u64>,
}

impl Stats {
    pub fn property(&self, pid: Pid) -> Option<&PropertyStats> {
        self.props.get(&pid)
    }

    pub fn class_count(&self, cls: Sid) -> Option<u64> {
        self.classes.get(&cls).copied()
    }

    pub fn set_property(&mut self, pid: Pid, stats: PropertyStats) {
        self.props.insert(pid, stats);
    }

    pub fn set_class(&mut self, cls: Sid, count: u64) {
        self.classes.insert(cls, count);
    }

    pub fn is_empty(&self) -> bool {
        self.props.is_empty() && self.classes.is_empty()
    }

    /// Compute exact statistics from a flake set. Used by the in-memory
    /// backend and tests; durable ingestion maintains estimates
    /// incrementally instead.
    pub fn from_flakes<'a>(flakes: impl IntoIterator<Item = &'a Flake>) -> Stats {
        let mut counts: HashMap<Pid, u64> = HashMap::new();
        let mut values: HashMap<Pid, std::collections::HashSet<String>> = HashMap::new();
        let mut subjects: HashMap<Pid, std::collections::HashSet<Sid>> = HashMap::new();
        let mut classes: HashMap<Sid, u64> = HashMap::new();

        for f in flakes {
            if !f.op {
                continue;
            }
            *counts.entry(f.p).or_default() += 1;
            let mut buf = Vec::new();
            f.o.encode_for_hash(&mut buf);
            values
                .entry(f.p)
                .or_default()
                .insert(format!("{buf:?}|{}", f.dt));
            subjects.entry(f.p).or_default().insert(f.s);
            if f.p == preds::RDF_TYPE
                && let Object::Sid(cls) = f.o
            {
                *classes.entry(cls).or_default() += 1;
            }
        }

        let props = counts
            .into_iter()
            .map(|(pid, count)| {
                (
                    pid,
                    PropertyStats {
                        count,
                        ndv_values: values.get(&pid).map_or(0, |s| s.len() as u64),
                        ndv_subjects: subjects.get(&pid).map_or(0, |s| s.len() as u64),
                    },
                )
            })
            .collect();
        Stats { props, classes }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flake::{dt, make_sid, partition};

    #[test]
    fn test_from_flakes_counts_and_ndv() {
        let p = make_sid(partition::PREDICATE, 100);
        let s1 = make_sid(partition::USER, 1);
        let s2 = make_sid(partition::USER, 2);
        let flakes = vec![
            Flake::new(s1, p, Object::Int(1), dt::LONG, -1, true, 0),
            Flake::new(s2, p, Object::Int(1), dt::LONG, -1, true, 0),
            Flake::new(s2, p, Object::Int(2), dt::LONG, -1, false, 0),
        ];
        let stats = Stats::from_flakes(&flakes);
        let ps = stats.property(p).unwrap();
        // Retractions don't count.
        assert_eq!(ps.count, 2);
        assert_eq!(ps.ndv_values, 1);
        assert_eq!(ps.ndv_subjects, 2);
    }

    #[test]
    fn test_class_counts() {
        let cls = make_sid(partition::CLASS, 1);
        let s = make_sid(partition::USER, 1);
        let flakes = vec![Flake::new(
            s,
            preds::RDF_TYPE,
            Object::Sid(cls),
            dt::REF,
            -1,
            true,
            0,
        )];
        let stats = Stats::from_flakes(&flakes);
        assert_eq!(stats.class_count(cls), Some(1));
        assert_eq!(stats.class_count(make_sid(partition::CLASS, 9)), None);
    }
}
