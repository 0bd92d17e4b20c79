//! The parsed-query form: the stable in-process contract between surface
//! syntax translators and the engine.
//!
//! Surface parsers (the JSON query language, the SPARQL and SQL subsets)
//! lower to this form ahead of execution. Variables are interned to
//! contiguous [`Var`] ids at parse time so solutions are plain vectors with
//! O(1) access; a [`Solution`] is extended by cloning, never mutated in
//! place once shared.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::QueryOpts;
use crate::error::QuadStreamError;
use crate::exec::aggregate::AggregateSpec;
use crate::exec::filter::CompiledFilter;
use crate::flake::{Dt, Object, dt};
use crate::schema::Context;
use crate::subgraph::SelectSpec;

// ── Variables and solutions ──────────────────────────────────────────────

/// Interned query variable. Ids are contiguous from zero within one query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Var(pub u32);

/// Maps variable names (`?s`) to interned ids.
#[derive(Debug, Clone, Default)]
pub struct VarRegistry {
    names: Vec<String>,
    by_name: HashMap<String, Var>,
}

impl VarRegistry {
    pub fn new() -> VarRegistry {
        VarRegistry::default()
    }

    pub fn intern(&mut self, name: &str) -> Var {
        if let Some(&v) = self.by_name.get(name) {
            return v;
        }
        let v = Var(self.names.len() as u32);
        self.names.push(name.to_string());
        self.by_name.insert(name.to_string(), v);
        v
    }

    pub fn lookup(&self, name: &str) -> Option<Var> {
        self.by_name.get(name).copied()
    }

    pub fn name(&self, var: Var) -> &str {
        &self.names[var.0 as usize]
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// One variable binding: the value, its datatype, and whether display
/// should resolve it as an IRI.
#[derive(Debug, Clone, PartialEq)]
pub struct Match {
    pub var: Option<Var>,
    pub value: Object,
    pub dt: Dt,
    pub iri: bool,
}

impl Match {
    pub fn new(var: Option<Var>, value: Object, dt: Dt) -> Match {
        Match { var, value, iri: dt == dt::REF, dt }
    }
}

/// A partial solution: variable id → binding. Cloned on extension.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Solution {
    slots: Vec<Option<Match>>,
}

impl Solution {
    pub fn empty(nvars: usize) -> Solution {
        Solution { slots: vec![None; nvars] }
    }

    pub fn get(&self, var: Var) -> Option<&Match> {
        self.slots.get(var.0 as usize).and_then(Option::as_ref)
    }

    pub fn is_bound(&self, var: Var) -> bool {
        self.get(var).is_some()
    }

    /// A copy of this solution with `var` bound.
    pub fn with(&self, var: Var, m: Match) -> Solution {
        let mut next = self.clone();
        next.bind(var, m);
        next
    }

    /// Bind in place. Only correct on a solution not yet shared downstream.
    pub fn bind(&mut self, var: Var, m: Match) {
        let i = var.0 as usize;
        if i >= self.slots.len() {
            self.slots.resize(i + 1, None);
        }
        self.slots[i] = Some(m);
    }

    pub fn vars(&self) -> impl Iterator<Item = Var> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, m)| m.is_some())
            .map(|(i, _)| Var(i as u32))
    }
}

// ── Patterns ─────────────────────────────────────────────────────────────

/// Lowered bound on the object slot of a scan, derived from inlined
/// comparison filters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObjRange {
    /// Lower bound and whether it is inclusive.
    pub start: Option<(Object, bool)>,
    /// Upper bound and whether it is inclusive.
    pub end: Option<(Object, bool)>,
}

impl ObjRange {
    pub fn is_empty(&self) -> bool {
        self.start.is_none() && self.end.is_none()
    }
}

/// One slot of a triple pattern.
#[derive(Debug, Clone)]
pub enum TriplePart {
    /// An unbound variable.
    Var(Var),
    /// A bound value.
    Val { value: Object, dt: Dt },
    /// An IRI resolved against the schema at match time. Unknown IRIs
    /// match zero solutions.
    Iri(String),
}

/// A pattern slot: its binding plus any inlined filter hooks and a derived
/// scan range (object slot only).
#[derive(Debug, Clone)]
pub struct TupleSlot {
    pub part: TriplePart,
    /// Inlined filters, run against each candidate value as flakes stream.
    pub fns: Vec<Arc<CompiledFilter>>,
    pub range: Option<ObjRange>,
}

impl TupleSlot {
    pub fn var(v: Var) -> TupleSlot {
        TupleSlot { part: TriplePart::Var(v), fns: Vec::new(), range: None }
    }

    pub fn val(value: Object, datatype: Dt) -> TupleSlot {
        TupleSlot { part: TriplePart::Val { value, dt: datatype }, fns: Vec::new(), range: None }
    }

    pub fn iri(iri: impl Into<String>) -> TupleSlot {
        TupleSlot { part: TriplePart::Iri(iri.into()), fns: Vec::new(), range: None }
    }

    pub fn as_var(&self) -> Option<Var> {
        match self.part {
            TriplePart::Var(v) => Some(v),
            _ => None,
        }
    }
}

/// A triple pattern `[s p o]`.
#[derive(Debug, Clone)]
pub struct TriplePattern {
    pub s: TupleSlot,
    pub p: TupleSlot,
    pub o: TupleSlot,
}

impl TriplePattern {
    pub fn new(s: TupleSlot, p: TupleSlot, o: TupleSlot) -> TriplePattern {
        TriplePattern { s, p, o }
    }

    pub fn slots(&self) -> [&TupleSlot; 3] {
        [&self.s, &self.p, &self.o]
    }

    /// Variables appearing in this pattern, in s, p, o order.
    pub fn pattern_vars(&self) -> Vec<Var> {
        self.slots().iter().filter_map(|s| s.as_var()).collect()
    }
}

/// Graph selector for a `Graph` pattern.
#[derive(Debug, Clone, PartialEq)]
pub enum GraphAlias {
    /// A named graph: an alternate index family on the db.
    Named(String),
    /// A virtual graph (`##…`), dispatched to a pluggable executor.
    Virtual(String),
}

/// A where-clause element. The matcher dispatches exhaustively on this.
#[derive(Debug, Clone)]
pub enum Pattern {
    Tuple(TriplePattern),
    /// `rdf:type` match with subclass expansion.
    Class(TriplePattern),
    /// Constrains a subject to exist at the query's `t`.
    Id { s: TupleSlot },
    /// Standalone (non-inlined) filter.
    Filter(Arc<CompiledFilter>),
    /// Bind a computed value to a fresh variable.
    Bind { var: Var, expr: Arc<CompiledFilter> },
    Union(Vec<Vec<Pattern>>),
    Optional(Vec<Pattern>),
    Minus(Vec<Pattern>),
    Exists(Vec<Pattern>),
    NotExists(Vec<Pattern>),
    Graph { alias: GraphAlias, clause: Vec<Pattern> },
    /// Triples sharing a subject variable, satisfied with one subject scan.
    PropertyJoin { subject: Var, triples: Vec<TriplePattern> },
}

// ── Selection ────────────────────────────────────────────────────────────

/// One projected column.
#[derive(Debug, Clone)]
pub enum Selector {
    Var(Var),
    Aggregate(AggregateSpec),
    /// Graph-crawl sub-selection rooted at a bound subject.
    Subgraph { var: Var, spec: Arc<SelectSpec> },
    /// Arithmetic / string expression over bindings.
    Expression { expr: Arc<CompiledFilter>, name: String },
}

/// Projection mode.
#[derive(Debug, Clone)]
pub enum SelectMode {
    Many(Vec<Selector>),
    /// First row only.
    One(Vec<Selector>),
    /// De-duplicated rows, first-seen order.
    Distinct(Vec<Selector>),
}

impl SelectMode {
    pub fn selectors(&self) -> &[Selector] {
        match self {
            SelectMode::Many(s) | SelectMode::One(s) | SelectMode::Distinct(s) => s,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Asc,
    Desc,
}

/// A fully parsed query.
#[derive(Debug, Clone)]
pub struct ParsedQuery {
    pub context: Context,
    pub vars: VarRegistry,
    /// Initial bindings (`VALUES`).
    pub values: Vec<(Var, Match)>,
    pub where_clause: Vec<Pattern>,
    pub select: SelectMode,
    pub group_by: Vec<Var>,
    pub order_by: Vec<(Var, Direction)>,
    pub offset: Option<usize>,
    pub limit: Option<usize>,
    pub opts: QueryOpts,
}

impl ParsedQuery {
    pub fn builder() -> QueryBuilder {
        QueryBuilder::new()
    }

    /// Structural validation, applied before optimization.
    pub fn validate(&self) -> Result<(), QuadStreamError> {
        let nvars = self.vars.len() as u32;
        let check = |v: Var, what: &str| {
            if v.0 >= nvars {
                Err(QuadStreamError::InvalidQuery(format!(
                    "{what} references unknown variable id {}",
                    v.0
                )))
            } else {
                Ok(())
            }
        };
        for v in &self.group_by {
            check(*v, "group-by")?;
        }
        for (v, _) in &self.order_by {
            check(*v, "order-by")?;
        }
        for sel in self.select.selectors() {
            match sel {
                Selector::Var(v) => check(*v, "select")?,
                Selector::Aggregate(agg) => check(agg.var, "aggregate")?,
                Selector::Subgraph { var, .. } => check(*var, "subgraph select")?,
                Selector::Expression { .. } => {}
            }
        }
        if self.select.selectors().is_empty() {
            return Err(QuadStreamError::InvalidQuery(
                "select clause is empty".into(),
            ));
        }
        Ok(())
    }
}

// ── Builder ──────────────────────────────────────────────────────────────

/// Assembles a [`ParsedQuery`]. This is what the surface translators drive;
/// tests use it directly.
pub struct QueryBuilder {
    context: Context,
    vars: VarRegistry,
    values: Vec<(Var, Match)>,
    where_clause: Vec<Pattern>,
    select: Option<SelectMode>,
    group_by: Vec<Var>,
    order_by: Vec<(Var, Direction)>,
    offset: Option<usize>,
    limit: Option<usize>,
    opts: QueryOpts,
}

impl QueryBuilder {
    pub fn new() -> QueryBuilder {
        QueryBuilder {
            context: Context::new(),
            vars: VarRegistry::new(),
            values: Vec::new(),
            where_clause: Vec::new(),
            select: None,
            group_by: Vec::new(),
            order_by: Vec::new(),
            offset: None,
            limit: None,
            opts: QueryOpts::default(),
        }
    }

    pub fn context(mut self, context: Context) -> QueryBuilder {
        self.context = context;
        self
    }

    pub fn var(&mut self, name: &str) -> Var {
        self.vars.intern(name)
    }

    pub fn value(&mut self, var: Var, m: Match) -> &mut QueryBuilder {
        self.values.push((var, m));
        self
    }

    pub fn pattern(&mut self, p: Pattern) -> &mut QueryBuilder {
        self.where_clause.push(p);
        self
    }

    /// Add a `[s p o]` tuple pattern.
    pub fn tuple(&mut self, s: TupleSlot, p: TupleSlot, o: TupleSlot) -> &mut QueryBuilder {
        self.pattern(Pattern::Tuple(TriplePattern::new(s, p, o)))
    }

    /// Add a standalone filter from source text, e.g. `"(> ?a 25)"`.
    pub fn filter(&mut self, src: &str) -> Result<&mut QueryBuilder, QuadStreamError> {
        let compiled = crate::exec::filter::compile(src, &self.vars)?;
        Ok(self.pattern(Pattern::Filter(Arc::new(compiled))))
    }

    /// Add a `bind` pattern computing `var` from expression source text.
    pub fn bind(&mut self, var: Var, src: &str) -> Result<&mut QueryBuilder, QuadStreamError> {
        let compiled = crate::exec::filter::compile(src, &self.vars)?;
        Ok(self.pattern(Pattern::Bind { var, expr: Arc::new(compiled) }))
    }

    /// Parse an aggregate selector against this builder's variables.
    pub fn aggregate(&self, src: &str) -> Result<Selector, QuadStreamError> {
        let spec = crate::exec::aggregate::parse_aggregate(src, &self.vars)?;
        Ok(Selector::Aggregate(spec))
    }

    pub fn select(mut self, selectors: Vec<Selector>) -> QueryBuilder {
        self.select = Some(SelectMode::Many(selectors));
        self
    }

    pub fn select_one(mut self, selectors: Vec<Selector>) -> QueryBuilder {
        self.select = Some(SelectMode::One(selectors));
        self
    }

    pub fn select_distinct(mut self, selectors: Vec<Selector>) -> QueryBuilder {
        self.select = Some(SelectMode::Distinct(selectors));
        self
    }

    /// Shorthand: select plain variables.
    pub fn select_vars(self, vars: &[Var]) -> QueryBuilder {
        self.select(vars.iter().copied().map(Selector::Var).collect())
    }

    pub fn group_by(mut self, vars: &[Var]) -> QueryBuilder {
        self.group_by = vars.to_vec();
        self
    }

    pub fn order_by(mut self, var: Var, dir: Direction) -> QueryBuilder {
        self.order_by.push((var, dir));
        self
    }

    pub fn offset(mut self, n: usize) -> QueryBuilder {
        self.offset = Some(n);
        self
    }

    pub fn limit(mut self, n: usize) -> QueryBuilder {
        self.limit = Some(n);
        self
    }

    pub fn opts(mut self, opts: QueryOpts) -> QueryBuilder {
        self.opts = opts;
        self
    }

    pub fn build(self) -> Result<ParsedQuery, QuadStreamError> {
        let q = ParsedQuery {
            context: self.context,
            vars: self.vars,
            values: self.values,
            where_clause: self.where_clause,
            select: self
                .select
                .ok_or_else(|| QuadStreamError::InvalidQuery("missing select clause".into()))?,
            group_by: self.group_by,
            order_by: self.order_by,
            offset: self.offset,
            limit: self.limit,
            opts: self.opts,
        };
        q.validate()?;
        Ok(q)
    }
}

impl Default for QueryBuilder {
    fn default() -> Self {
        QueryBuilder::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_var_interning_is_stable() {
        let mut reg = VarRegistry::new();
        let s = reg.intern("?s");
        let o = reg.intern("?o");
        assert_eq!(reg.intern("?s"), s);
        assert_ne!(s, o);
        assert_eq!(reg.name(o), "?o");
    }

    #[test]
    fn test_solution_extension_does_not_alias() {
        let mut reg = VarRegistry::new();
        let s = reg.intern("?s");
        let o = reg.intern("?o");
        let base = Solution::empty(reg.len());
        let a = base.with(s, Match::new(Some(s), Object::Int(1), dt::LONG));
        let b = a.with(o, Match::new(Some(o), Object::Int(2), dt::LONG));
        assert!(a.get(o).is_none());
        assert_eq!(b.get(s).unwrap().value, Object::Int(1));
        assert_eq!(b.get(o).unwrap().value, Object::Int(2));
    }

    #[test]
    fn test_builder_rejects_missing_select() {
        let b = QueryBuilder::new();
        let err = b.build().unwrap_err();
        assert_eq!(err.error_tag(), "db/invalid-query");
    }

    #[test]
    fn test_validate_rejects_foreign_var() {
        let mut b = QueryBuilder::new();
        let s = b.var("?s");
        b.tuple(TupleSlot::var(s), TupleSlot::iri("ex:p"), TupleSlot::var(s));
        // An order-by var the registry never interned.
        let q = b.select_vars(&[s]).order_by(Var(99), Direction::Asc).build();
        assert!(q.is_err());
    }
}
