//! Where-clause execution.
//!
//! Each pattern kind has a matcher in its own submodule; [`match_pattern`]
//! dispatches exhaustively over the [`Pattern`] sum. Matchers consume a
//! stream of partial solutions and emit extended ones; [`match_clause`]
//! folds a clause's patterns over the stream, so the whole where-clause
//! becomes one pull pipeline. Backpressure is intrinsic: nothing runs until
//! the collector pulls, and the first error observed ends the query.
//!
//! # Submodules
//! - `tuple` — triple patterns and id constraints
//! - `class` — `rdf:type` matching with subclass expansion
//! - `union` / `optional` / `negation` — compound clause combinators
//! - `property_join` — co-subject triples satisfied by one subject scan
//! - `graph` — named and virtual graph scoping
//! - `filter` — filter compilation and evaluation
//! - `aggregate` — aggregate parsing and folds

pub mod aggregate;
pub mod class;
pub mod filter;
pub mod graph;
pub mod negation;
pub mod optional;
pub mod property_join;
pub mod tuple;
pub mod union;

use std::sync::Arc;

use crate::config::QueryOpts;
use crate::db::Db;
use crate::error::QuadStreamError;
use crate::fuel::Fuel;
use crate::query::{Match, Pattern, Solution};

/// A pull stream of solutions; `Err` ends the query at the collector.
pub type SolutionIter = Box<dyn Iterator<Item = Result<Solution, QuadStreamError>>>;

/// Execution state shared by every matcher of one query.
#[derive(Clone)]
pub struct ExecCtx {
    pub db: Arc<Db>,
    pub fuel: Arc<Fuel>,
    pub opts: QueryOpts,
    /// Active named graph; `None` is the default graph.
    pub graph: Option<String>,
    /// Slot count for fresh solutions.
    pub nvars: usize,
}

impl ExecCtx {
    pub fn new(db: Arc<Db>, opts: QueryOpts, nvars: usize) -> ExecCtx {
        let fuel = Arc::new(Fuel::new(opts.max_fuel));
        ExecCtx { db, fuel, opts, graph: None, nvars }
    }

    pub fn with_graph(&self, graph: Option<String>) -> ExecCtx {
        let mut ctx = self.clone();
        ctx.graph = graph;
        ctx
    }

    /// Base range options for this query's scans.
    pub fn range_opts(&self) -> crate::range::RangeOpts {
        crate::range::RangeOpts {
            flake_limit: self.opts.flake_limit,
            parallelism: self.opts.parallelism,
            graph: self.graph.clone(),
            fuel: Some(Arc::clone(&self.fuel)),
            ..Default::default()
        }
    }
}

/// Lift a per-solution expansion over the stream, passing errors through.
pub(crate) fn per_solution<F>(input: SolutionIter, f: F) -> SolutionIter
where
    F: Fn(Solution) -> SolutionIter + 'static,
{
    Box::new(input.flat_map(move |r| -> SolutionIter {
        match r {
            Ok(sol) => f(sol),
            Err(e) => Box::new(std::iter::once(Err(e))),
        }
    }))
}

/// Lift an eager per-solution expansion (most matchers).
pub(crate) fn per_solution_vec<F>(input: SolutionIter, f: F) -> SolutionIter
where
    F: Fn(&Solution) -> Result<Vec<Solution>, QuadStreamError> + 'static,
{
    per_solution(input, move |sol| {
        let out: SolutionIter = match f(&sol) {
            Ok(out) => Box::new(out.into_iter().map(Ok)),
            Err(e) => Box::new(std::iter::once(Err(e))),
        };
        out
    })
}

/// Run one pattern over a stream of partial solutions.
pub fn match_pattern(ctx: &ExecCtx, pattern: &Pattern, input: SolutionIter) -> SolutionIter {
    match pattern {
        Pattern::Tuple(tp) => tuple::match_tuple(ctx, tp, input),
        Pattern::Class(tp) => class::match_class(ctx, tp, input),
        Pattern::Id { s } => tuple::match_id(ctx, s, input),
        Pattern::Filter(f) => {
            let f = Arc::clone(f);
            Box::new(input.filter(move |r| match r {
                Ok(sol) => f.matches_solution(sol),
                Err(_) => true,
            }))
        }
        Pattern::Bind { var, expr } => {
            let (var, expr) = (*var, Arc::clone(expr));
            Box::new(input.map(move |r| {
                r.map(|sol| match expr.eval_value(&sol) {
                    Ok(v) => match filter::value_object(&v) {
                        Ok((o, datatype)) => sol.with(var, Match::new(Some(var), o, datatype)),
                        // A non-bindable result leaves the variable unbound.
                        Err(_) => sol,
                    },
                    Err(_) => sol,
                })
            }))
        }
        Pattern::Union(branches) => union::match_union(ctx, branches, input),
        Pattern::Optional(clause) => optional::match_optional(ctx, clause, input),
        Pattern::Minus(clause) | Pattern::NotExists(clause) => {
            negation::match_absent(ctx, clause, input)
        }
        Pattern::Exists(clause) => negation::match_present(ctx, clause, input),
        Pattern::Graph { alias, clause } => graph::match_graph(ctx, alias, clause, input),
        Pattern::PropertyJoin { subject, triples } => {
            property_join::match_property_join(ctx, *subject, triples, input)
        }
    }
}

/// Fold a clause over one initial solution.
pub fn match_clause(ctx: &ExecCtx, clause: &[Pattern], initial: Solution) -> SolutionIter {
    let mut stream: SolutionIter = Box::new(std::iter::once(Ok(initial)));
    for pattern in clause {
        stream = match_pattern(ctx, pattern, stream);
    }
    stream
}

/// Drain a stream, stopping at the first error.
pub fn collect_solutions(stream: SolutionIter) -> Result<Vec<Solution>, QuadStreamError> {
    let mut out = Vec::new();
    for r in stream {
        out.push(r?);
    }
    Ok(out)
}
