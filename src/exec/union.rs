//! Union: run each branch against the input and concatenate.
//!
//! Branch outputs concatenate in declared order; a branch starts only when
//! the previous one is drained, so cross-branch ordering is deterministic.

use crate::exec::{ExecCtx, SolutionIter, match_clause, per_solution};
use crate::query::Pattern;

pub fn match_union(ctx: &ExecCtx, branches: &[Vec<Pattern>], input: SolutionIter) -> SolutionIter {
    let ctx = ctx.clone();
    let branches = branches.to_vec();
    per_solution(input, move |sol| {
        let mut out: SolutionIter = Box::new(std::iter::empty());
        for branch in &branches {
            out = Box::new(out.chain(match_clause(&ctx, branch, sol.clone())));
        }
        out
    })
}
