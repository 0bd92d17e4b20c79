//! Optional: left-join semantics over a nested clause.
//!
//! Every input solution survives. When the nested clause extends it, the
//! extensions are emitted; when the clause produces nothing, the input
//! passes through unchanged — after the inner clause is exhausted, so the
//! "did anything match" decision is made exactly once.

use crate::exec::{ExecCtx, SolutionIter, match_clause, per_solution};
use crate::query::Pattern;

pub fn match_optional(ctx: &ExecCtx, clause: &[Pattern], input: SolutionIter) -> SolutionIter {
    let ctx = ctx.clone();
    let clause = clause.to_vec();
    per_solution(input, move |sol| {
        let mut inner = match_clause(&ctx, &clause, sol.clone());
        let out: SolutionIter = match inner.next() {
            None => Box::new(std::iter::once(Ok(sol))),
            Some(first) => Box::new(std::iter::once(first).chain(inner)),
        };
        out
    })
}
