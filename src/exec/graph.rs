//! Graph scoping: named graphs and virtual graphs.
//!
//! A named-graph pattern rebinds the scan context to an alternate index
//! family on the db; every scan inside the nested clause then runs against
//! that graph. Virtual graph aliases (`##…`) dispatch the whole nested
//! clause to a pluggable executor registered on the db.

use crate::error::QuadStreamError;
use crate::exec::{ExecCtx, SolutionIter, match_clause, per_solution, per_solution_vec};
use crate::query::{GraphAlias, Pattern};

pub fn match_graph(
    ctx: &ExecCtx,
    alias: &GraphAlias,
    clause: &[Pattern],
    input: SolutionIter,
) -> SolutionIter {
    match alias {
        GraphAlias::Named(name) => {
            let scoped = ctx.with_graph(Some(name.clone()));
            let clause = clause.to_vec();
            per_solution(input, move |sol| match_clause(&scoped, &clause, sol))
        }
        GraphAlias::Virtual(name) => {
            let ctx = ctx.clone();
            let name = name.clone();
            let clause = clause.to_vec();
            per_solution_vec(input, move |sol| {
                let exec = ctx.db.virtual_graph(&name).ok_or_else(|| {
                    QuadStreamError::InvalidQuery(format!("no executor for virtual graph {name}"))
                })?;
                exec.execute(&ctx.db, &clause, sol)
            })
        }
    }
}
