//! Negation combinators: minus / not-exists, and exists.
//!
//! `minus` and `not-exists` share one behavior here: the input solution
//! survives iff the nested clause produces zero solutions for it.
//! `exists` inverts the condition. Either way the input passes through
//! unextended — bindings made inside the nested clause never escape.

use crate::error::QuadStreamError;
use crate::exec::{ExecCtx, SolutionIter, match_clause, per_solution_vec};
use crate::query::{Pattern, Solution};

fn nested_matches(
    ctx: &ExecCtx,
    clause: &[Pattern],
    sol: &Solution,
) -> Result<bool, QuadStreamError> {
    let mut inner = match_clause(ctx, clause, sol.clone());
    match inner.next() {
        None => Ok(false),
        Some(Err(e)) => Err(e),
        Some(Ok(_)) => Ok(true),
    }
}

/// Minus / not-exists: keep the input iff the nested clause is empty.
pub fn match_absent(ctx: &ExecCtx, clause: &[Pattern], input: SolutionIter) -> SolutionIter {
    let ctx = ctx.clone();
    let clause = clause.to_vec();
    per_solution_vec(input, move |sol| {
        Ok(if nested_matches(&ctx, &clause, sol)? {
            Vec::new()
        } else {
            vec![sol.clone()]
        })
    })
}

/// Exists: keep the input iff the nested clause matched at least once.
pub fn match_present(ctx: &ExecCtx, clause: &[Pattern], input: SolutionIter) -> SolutionIter {
    let ctx = ctx.clone();
    let clause = clause.to_vec();
    per_solution_vec(input, move |sol| {
        Ok(if nested_matches(&ctx, &clause, sol)? {
            vec![sol.clone()]
        } else {
            Vec::new()
        })
    })
}
