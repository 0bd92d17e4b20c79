//! The flake data model and its five total orderings.
//!
//! A flake is an immutable 7-tuple `(s, p, o, dt, t, op, m)` representing a
//! single assertion (`op = true`) or retraction (`op = false`) of one datum
//! at one transaction. Transaction ids are strictly decreasing: the first
//! commit is `t = -1`, the next `t = -2`, and so on, so a *smaller* `t` is
//! *newer*. The positive "display t" shown to callers is `-t`.
//!
//! Each covering index sorts the same flakes under a different slot order:
//!
//! | index | slot order |
//! |-------|------------------------|
//! | spot  | s, p, o, dt, t, op, m |
//! | psot  | p, s, o, dt, t, op, m |
//! | post  | p, o, s, dt, t, op, m |
//! | opst  | o, p, s, dt, t, op, m |
//! | tspo  | t, s, p, o, dt, op, m |
//!
//! Range boundaries are expressed as [`FlakeBound`]s: a bound with `None` in
//! a slot stands for that ordering's minimum or maximum in that slot,
//! depending on which end of the range it pads. This is how the min-flake /
//! max-flake sentinels are realized without sentinel object values.

use std::cmp::Ordering;
use std::sync::Arc;

/// Subject id. The high bits ([`PARTITION_SHIFT`] and up) encode the
/// partition the subject belongs to.
pub type Sid = i64;
/// Predicate id (a subject id in the predicate partition).
pub type Pid = i64;
/// Transaction id. Negative, strictly decreasing, smaller = newer.
pub type Tid = i64;
/// Datatype id.
pub type Dt = i32;

/// Bits below the partition field of a subject id.
pub const PARTITION_SHIFT: u32 = 44;

/// Subject-id partitions. Partitions at or below [`partition::SCHEMA_MAX`]
/// hold schema subjects (predicates, classes, tags), which bypass policy
/// enforcement.
pub mod partition {
    pub const PREDICATE: i64 = 0;
    pub const CLASS: i64 = 1;
    pub const TAG: i64 = 2;
    /// Highest partition holding schema subjects.
    pub const SCHEMA_MAX: i64 = 7;
    /// First general-purpose partition.
    pub const USER: i64 = 8;
}

/// Well-known datatype ids.
pub mod dt {
    use super::Dt;

    /// `xsd:anyURI` — the object is a subject id (a reference).
    pub const REF: Dt = 0;
    pub const STRING: Dt = 1;
    pub const BOOLEAN: Dt = 2;
    pub const LONG: Dt = 3;
    pub const INT: Dt = 4;
    pub const DOUBLE: Dt = 5;
    pub const DATE_TIME: Dt = 6;
    /// The object is a tag sid, displayed via the tag dictionary.
    pub const TAG: Dt = 7;
    pub const JSON: Dt = 8;
    /// Internal marker for grouped (vector) values in the result shaper.
    pub const GROUPING: Dt = -2;
}

/// Build a subject id in a partition.
pub const fn make_sid(partition: i64, n: i64) -> Sid {
    (partition << PARTITION_SHIFT) | n
}

/// Partition of a subject id.
pub const fn sid_partition(s: Sid) -> i64 {
    s >> PARTITION_SHIFT
}

/// Whether a subject id lives in a schema partition.
pub fn is_schema_sid(s: Sid) -> bool {
    (0..=partition::SCHEMA_MAX).contains(&sid_partition(s))
}

/// Display (positive, 1-based) form of a transaction id.
pub fn display_t(t: Tid) -> i64 {
    -t
}

/// Internal form of a display transaction number.
pub fn internal_t(display: i64) -> Tid {
    -display
}

// ── Object values ────────────────────────────────────────────────────────

/// The object slot of a flake: a tagged union over the scalar kinds the
/// store can hold, plus subject-id references.
///
/// `Object` carries a total order so that flakes sort deterministically in
/// every index: values are ranked by kind class first (null < boolean <
/// numeric < string < reference), then by value within the class. `Int` and
/// `Double` share the numeric class and compare by magnitude; exact integer
/// ties order `Int` before `Double`. `Double` uses IEEE total ordering so
/// NaN has a stable position.
#[derive(Debug, Clone)]
pub enum Object {
    Null,
    Bool(bool),
    Int(i64),
    Double(f64),
    Str(Arc<str>),
    Sid(Sid),
}

impl Object {
    pub fn str(s: impl AsRef<str>) -> Object {
        Object::Str(Arc::from(s.as_ref()))
    }

    pub fn as_sid(&self) -> Option<Sid> {
        match self {
            Object::Sid(s) => Some(*s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Object::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Object::Int(n) => Some(*n as f64),
            Object::Double(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Object::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Raw JSON rendering. Reference display (sid → compacted IRI) is the
    /// result shaper's job; this emits the stored value.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Object::Null => serde_json::Value::Null,
            Object::Bool(b) => serde_json::Value::Bool(*b),
            Object::Int(n) => serde_json::Value::from(*n),
            Object::Double(d) => serde_json::Value::from(*d),
            Object::Str(s) => serde_json::Value::from(s.as_ref()),
            Object::Sid(s) => serde_json::Value::from(*s),
        }
    }

    fn class_rank(&self) -> u8 {
        match self {
            Object::Null => 0,
            Object::Bool(_) => 1,
            Object::Int(_) | Object::Double(_) => 2,
            Object::Str(_) => 3,
            Object::Sid(_) => 4,
        }
    }

    /// Append a stable byte encoding of this value, used for group-key
    /// hashing. Kind tags keep `1i64` and `1.0f64` and `"1"` distinct.
    pub fn encode_for_hash(&self, buf: &mut Vec<u8>) {
        match self {
            Object::Null => buf.push(0),
            Object::Bool(b) => {
                buf.push(1);
                buf.push(*b as u8);
            }
            Object::Int(n) => {
                buf.push(2);
                buf.extend_from_slice(&n.to_le_bytes());
            }
            Object::Double(d) => {
                buf.push(3);
                buf.extend_from_slice(&d.to_bits().to_le_bytes());
            }
            Object::Str(s) => {
                buf.push(4);
                buf.extend_from_slice(&(s.len() as u64).to_le_bytes());
                buf.extend_from_slice(s.as_bytes());
            }
            Object::Sid(s) => {
                buf.push(5);
                buf.extend_from_slice(&s.to_le_bytes());
            }
        }
    }
}

impl PartialEq for Object {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Object {}

impl PartialOrd for Object {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Object {
    fn cmp(&self, other: &Self) -> Ordering {
        let rank = self.class_rank().cmp(&other.class_rank());
        if rank != Ordering::Equal {
            return rank;
        }
        match (self, other) {
            (Object::Null, Object::Null) => Ordering::Equal,
            (Object::Bool(a), Object::Bool(b)) => a.cmp(b),
            (Object::Int(a), Object::Int(b)) => a.cmp(b),
            (Object::Double(a), Object::Double(b)) => a.total_cmp(b),
            (Object::Int(a), Object::Double(b)) => {
                (*a as f64).total_cmp(b).then(Ordering::Less)
            }
            (Object::Double(a), Object::Int(b)) => {
                a.total_cmp(&(*b as f64)).then(Ordering::Greater)
            }
            (Object::Str(a), Object::Str(b)) => a.cmp(b),
            (Object::Sid(a), Object::Sid(b)) => a.cmp(b),
            _ => unreachable!("class ranks matched"),
        }
    }
}

// ── Flake ────────────────────────────────────────────────────────────────

/// One immutable assertion or retraction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Flake {
    pub s: Sid,
    pub p: Pid,
    pub o: Object,
    pub dt: Dt,
    pub t: Tid,
    pub op: bool,
    pub m: i32,
}

impl Flake {
    pub fn new(s: Sid, p: Pid, o: Object, dt: Dt, t: Tid, op: bool, m: i32) -> Flake {
        Flake { s, p, o, dt, t, op, m }
    }

    /// Key identifying the datum independent of its version: `(s, p, o, dt)`.
    pub fn datum_key(&self) -> (Sid, Pid, &Object, Dt) {
        (self.s, self.p, &self.o, self.dt)
    }

    /// Whether this flake's subject lives in a schema partition.
    pub fn is_schema(&self) -> bool {
        is_schema_sid(self.s)
    }
}

// ── Index orderings ──────────────────────────────────────────────────────

/// One slot of the 7-tuple, in comparator order terms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    S,
    P,
    O,
    Dt,
    T,
    Op,
    M,
}

/// The five covering indexes, identified by their slot order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexType {
    Spot,
    Psot,
    Post,
    Opst,
    Tspo,
}

impl IndexType {
    pub const ALL: [IndexType; 5] = [
        IndexType::Spot,
        IndexType::Psot,
        IndexType::Post,
        IndexType::Opst,
        IndexType::Tspo,
    ];

    /// Comparator slot order for this index.
    pub fn slots(self) -> &'static [Slot; 7] {
        use Slot::*;
        match self {
            IndexType::Spot => &[S, P, O, Dt, T, Op, M],
            IndexType::Psot => &[P, S, O, Dt, T, Op, M],
            IndexType::Post => &[P, O, S, Dt, T, Op, M],
            IndexType::Opst => &[O, P, S, Dt, T, Op, M],
            IndexType::Tspo => &[T, S, P, O, Dt, Op, M],
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            IndexType::Spot => "spot",
            IndexType::Psot => "psot",
            IndexType::Post => "post",
            IndexType::Opst => "opst",
            IndexType::Tspo => "tspo",
        }
    }
}

fn cmp_slot(slot: Slot, a: &Flake, b: &Flake) -> Ordering {
    match slot {
        Slot::S => a.s.cmp(&b.s),
        Slot::P => a.p.cmp(&b.p),
        Slot::O => a.o.cmp(&b.o),
        Slot::Dt => a.dt.cmp(&b.dt),
        Slot::T => a.t.cmp(&b.t),
        Slot::Op => a.op.cmp(&b.op),
        Slot::M => a.m.cmp(&b.m),
    }
}

/// Total comparison of two flakes under an index ordering.
pub fn cmp_flakes(idx: IndexType, a: &Flake, b: &Flake) -> Ordering {
    for &slot in idx.slots() {
        let ord = cmp_slot(slot, a, b);
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

/// Sort a flake vector in place under an index ordering.
pub fn sort_flakes(idx: IndexType, flakes: &mut [Flake]) {
    flakes.sort_by(|a, b| cmp_flakes(idx, a, b));
}

// ── Bounds ───────────────────────────────────────────────────────────────

/// A range boundary over flakes. `None` in a slot is a wildcard that pads
/// to the ordering's minimum or maximum, per [`Pad`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlakeBound {
    pub s: Option<Sid>,
    pub p: Option<Pid>,
    pub o: Option<Object>,
    pub dt: Option<Dt>,
    pub t: Option<Tid>,
    pub op: Option<bool>,
    pub m: Option<i32>,
}

impl FlakeBound {
    /// The fully-unbound bound: the min-flake / max-flake sentinel,
    /// depending on the [`Pad`] it is compared under.
    pub fn unbound() -> FlakeBound {
        FlakeBound::default()
    }

    pub fn with_s(mut self, s: Sid) -> FlakeBound {
        self.s = Some(s);
        self
    }

    pub fn with_p(mut self, p: Pid) -> FlakeBound {
        self.p = Some(p);
        self
    }

    pub fn with_o(mut self, o: Object) -> FlakeBound {
        self.o = Some(o);
        self
    }

    pub fn with_dt(mut self, dt: Dt) -> FlakeBound {
        self.dt = Some(dt);
        self
    }

    pub fn with_t(mut self, t: Tid) -> FlakeBound {
        self.t = Some(t);
        self
    }

    fn slot_cmp(&self, slot: Slot, f: &Flake) -> Option<Ordering> {
        match slot {
            Slot::S => self.s.map(|v| f.s.cmp(&v)),
            Slot::P => self.p.map(|v| f.p.cmp(&v)),
            Slot::O => self.o.as_ref().map(|v| f.o.cmp(v)),
            Slot::Dt => self.dt.map(|v| f.dt.cmp(&v)),
            Slot::T => self.t.map(|v| f.t.cmp(&v)),
            Slot::Op => self.op.map(|v| f.op.cmp(&v)),
            Slot::M => self.m.map(|v| f.m.cmp(&v)),
        }
    }
}

/// What an unbound boundary slot pads to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pad {
    /// Unbound slots sit below every real value (start of range).
    Min,
    /// Unbound slots sit above every real value (end of range).
    Max,
}

/// Compare a flake against a bound under an index ordering.
///
/// Walks the index's slots in order; the first unequal bound slot decides.
/// An unbound slot decides immediately: the flake is `Greater` than a
/// min-padded bound and `Less` than a max-padded one. `Equal` is only
/// possible against a fully-bound bound.
pub fn cmp_to_bound(idx: IndexType, f: &Flake, bound: &FlakeBound, pad: Pad) -> Ordering {
    for &slot in idx.slots() {
        match bound.slot_cmp(slot, f) {
            Some(Ordering::Equal) => continue,
            Some(ord) => return ord,
            None => {
                return match pad {
                    Pad::Min => Ordering::Greater,
                    Pad::Max => Ordering::Less,
                };
            }
        }
    }
    Ordering::Equal
}

/// Boundary test for one end of a range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum RangeTest {
    Gt,
    Gte,
    Lt,
    Lte,
}

/// The sorted sub-slice of `flakes` (sorted under `idx`) satisfying both
/// boundary tests: `start_test(f, start) ∧ end_test(f, end)`.
///
/// `start_test` must be `Gt`/`Gte` and `end_test` must be `Lt`/`Lte`.
/// Unbound boundary slots pad toward the start's minimum and the end's
/// maximum, so a strict test against a partially-bound boundary still
/// admits every real flake sharing the bound prefix.
pub fn subrange<'a>(
    idx: IndexType,
    flakes: &'a [Flake],
    start_test: RangeTest,
    start: &FlakeBound,
    end_test: RangeTest,
    end: &FlakeBound,
) -> &'a [Flake] {
    debug_assert!(matches!(start_test, RangeTest::Gt | RangeTest::Gte));
    debug_assert!(matches!(end_test, RangeTest::Lt | RangeTest::Lte));

    let lo = flakes.partition_point(|f| match cmp_to_bound(idx, f, start, Pad::Min) {
        Ordering::Less => true,
        Ordering::Equal => start_test == RangeTest::Gt,
        Ordering::Greater => false,
    });
    let hi = flakes.partition_point(|f| match cmp_to_bound(idx, f, end, Pad::Max) {
        Ordering::Less => true,
        Ordering::Equal => end_test == RangeTest::Lte,
        Ordering::Greater => false,
    });
    if lo >= hi { &[] } else { &flakes[lo..hi] }
}
