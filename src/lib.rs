//! quadstream — query execution core for an immutable, time-ordered quad
//! store.
//!
//! The store holds RDF-like assertions as *flakes*: immutable 7-tuples
//! `(s, p, o, dt, t, op, m)` frozen into five covering indexes plus
//! in-memory novelty. This crate evaluates parsed queries against a
//! [`db::Db`] snapshot: where-clause patterns stream partial solutions
//! through per-pattern matchers fed by bounded index scans, an optimizer
//! reorders patterns by statistical selectivity, and a shaping pass
//! groups, orders, and projects the final rows. History queries replay a
//! transaction window into per-commit assert/retract maps.
//!
//! Surface syntaxes (the JSON query language, SPARQL and SQL subsets) are
//! external collaborators: they lower to [`query::ParsedQuery`], the
//! stable in-process contract this crate consumes.
//!
//! # Quick start
//!
//! ```
//! use quadstream::db::DbBuilder;
//! use quadstream::flake::{Object, dt};
//! use quadstream::query::{ParsedQuery, TupleSlot};
//! use quadstream::schema::PropertyInfo;
//!
//! let mut b = DbBuilder::new();
//! let age = b.predicate(PropertyInfo::scalar("ex:age", dt::LONG));
//! let ann = b.subject("ex:ann");
//! b.assert(ann, age, Object::Int(30));
//! let db = b.build();
//!
//! let mut qb = ParsedQuery::builder();
//! let s = qb.var("?s");
//! let a = qb.var("?a");
//! qb.tuple(TupleSlot::var(s), TupleSlot::iri("ex:age"), TupleSlot::var(a));
//! let q = qb.select_vars(&[s, a]).build().unwrap();
//!
//! let rows = quadstream::query(&db, &q).unwrap();
//! assert_eq!(rows, serde_json::json!([["ex:ann", 30]]));
//! ```

#![forbid(unsafe_code)]

pub mod config;
pub mod db;
pub mod error;
pub mod exec;
pub mod flake;
pub mod fuel;
pub mod history;
pub mod index;
pub mod optimizer;
pub mod query;
pub mod range;
pub mod schema;
pub mod sexpr;
pub mod shape;
pub mod stats;
pub mod subgraph;

use std::sync::Arc;

use serde_json::Value;

pub use crate::db::{Db, DbBuilder, Policy};
pub use crate::error::QuadStreamError;
pub use crate::history::{HistoryQuery, history};
pub use crate::optimizer::{Explain, explain};
pub use crate::query::{ParsedQuery, QueryBuilder};

/// Execute a parsed query against a db snapshot.
///
/// The query is optimized, its where-clause streamed to completion, and
/// the solutions shaped into the final JSON result. The first error any
/// stage produces aborts the query.
pub fn query(db: &Arc<Db>, q: &ParsedQuery) -> Result<Value, QuadStreamError> {
    let (optimized, _plan) = optimizer::optimize(db, q)?;
    execute_unoptimized(db, &optimized)
}

/// Execute without the optimizer pass. The optimizer-equivalence suite
/// leans on this; library callers want [`query`].
pub fn execute_unoptimized(db: &Arc<Db>, q: &ParsedQuery) -> Result<Value, QuadStreamError> {
    q.validate()?;
    let ctx = exec::ExecCtx::new(Arc::clone(db), q.opts.clone(), q.vars.len());
    let mut initial = query::Solution::empty(q.vars.len());
    for (var, m) in &q.values {
        initial.bind(*var, m.clone());
    }
    let stream = exec::match_clause(&ctx, &q.where_clause, initial);
    let solutions = exec::collect_solutions(stream)?;
    tracing::debug!(solutions = solutions.len(), fuel = ctx.fuel.used(), "where clause drained");
    shape::shape(&ctx, q, solutions)
}
