//! Error types for quadstream.
//!
//! All errors that can occur within the query core are represented by
//! [`QuadStreamError`]. Errors are propagated via `Result<T, QuadStreamError>`
//! throughout the codebase; the embedding surface converts them to its own
//! wire format using [`QuadStreamError::status`] and
//! [`QuadStreamError::error_tag`].
//!
//! # Error Classification
//!
//! Errors are classified into three categories:
//! - **Caller** — malformed queries, disallowed filter symbols, unknown
//!   predicates, exceeded cost. Reported with a 4xx status.
//! - **Storage** — index node resolution failures. Surfaced, never retried
//!   at this layer (a node store may retry internally).
//! - **Internal** — broken engine invariants. Bugs.
//!
//! Authorization failures are *not* errors: an unauthorized flake is
//! silently dropped by the range engine. Unknown IRIs are not errors either;
//! a pattern naming one matches zero solutions.

use std::fmt;

/// Primary error type for the query core.
#[derive(Debug, thiserror::Error)]
pub enum QuadStreamError {
    // ── Caller errors — 4xx ──────────────────────────────────────────────
    /// The query structure is malformed (bad pattern shape, bad time bounds,
    /// unknown selector, ...).
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// A filter or aggregate expression used a symbol or literal outside the
    /// allow-list, or referenced a variable that is not in scope.
    #[error("invalid function: {0}")]
    InvalidFn(String),

    /// A predicate IRI was required to resolve strictly and did not.
    #[error("unknown predicate: {0}")]
    InvalidPredicate(String),

    /// A property-path expression could not be interpreted.
    #[error("invalid property path: {0}")]
    InvalidPropertyPath(String),

    /// The query exceeded its fuel budget.
    #[error("query exceeded max fuel of {max_fuel}")]
    ExceededCost { max_fuel: u64 },

    /// The request was not properly authenticated.
    #[error("invalid authorization: {0}")]
    InvalidAuth(String),

    // ── Storage errors — surfaced, not retried here ──────────────────────
    /// An index node could not be resolved by the node store.
    #[error("index node resolution failed: {0}")]
    Storage(String),

    // ── Internal errors — should not happen ──────────────────────────────
    /// The optimizer produced a plan that violates its own invariants.
    #[error("optimization failure: {0}")]
    OptimizationFailure(String),

    /// An unexpected internal error. Indicates a bug.
    #[error("internal error: {0}")]
    Internal(String),
}

impl QuadStreamError {
    /// HTTP-style status code for this error.
    pub fn status(&self) -> u16 {
        match self {
            QuadStreamError::InvalidQuery(_)
            | QuadStreamError::InvalidFn(_)
            | QuadStreamError::InvalidPredicate(_)
            | QuadStreamError::InvalidPropertyPath(_)
            | QuadStreamError::ExceededCost { .. } => 400,
            QuadStreamError::InvalidAuth(_) => 401,
            QuadStreamError::Storage(_)
            | QuadStreamError::OptimizationFailure(_)
            | QuadStreamError::Internal(_) => 500,
        }
    }

    /// Stable machine-readable tag, drawn from the public error taxonomy.
    pub fn error_tag(&self) -> &'static str {
        match self {
            QuadStreamError::InvalidQuery(_) => "db/invalid-query",
            QuadStreamError::InvalidFn(_) => "db/invalid-fn",
            QuadStreamError::InvalidPredicate(_) => "db/invalid-predicate",
            QuadStreamError::InvalidPropertyPath(_) => "db/invalid-property-path",
            QuadStreamError::ExceededCost { .. } => "db/exceeded-cost",
            QuadStreamError::InvalidAuth(_) => "db/invalid-auth",
            QuadStreamError::Storage(_) => "db/storage",
            QuadStreamError::OptimizationFailure(_) => "db/optimization-failure",
            QuadStreamError::Internal(_) => "db/internal",
        }
    }

    /// Whether this error is attributable to the caller rather than the
    /// engine or its storage.
    pub fn is_caller_error(&self) -> bool {
        self.status() < 500
    }
}

/// Wire shape for surfaced errors: `{status, error, message}`.
pub struct ErrorBody<'a>(pub &'a QuadStreamError);

impl fmt::Display for ErrorBody<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            r#"{{"status":{},"error":"{}","message":"{}"}}"#,
            self.0.status(),
            self.0.error_tag(),
            self.0
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(QuadStreamError::InvalidQuery("x".into()).status(), 400);
        assert_eq!(QuadStreamError::InvalidFn("x".into()).status(), 400);
        assert_eq!(QuadStreamError::ExceededCost { max_fuel: 10 }.status(), 400);
        assert_eq!(QuadStreamError::InvalidAuth("x".into()).status(), 401);
        assert_eq!(QuadStreamError::OptimizationFailure("x".into()).status(), 500);
        assert_eq!(QuadStreamError::Storage("x".into()).status(), 500);
    }

    #[test]
    fn test_error_tags_are_stable() {
        assert_eq!(
            QuadStreamError::InvalidQuery("x".into()).error_tag(),
            "db/invalid-query"
        );
        assert_eq!(
            QuadStreamError::ExceededCost { max_fuel: 1 }.error_tag(),
            "db/exceeded-cost"
        );
        assert_eq!(
            QuadStreamError::InvalidPredicate("ex:nope".into()).error_tag(),
            "db/invalid-predicate"
        );
    }

    #[test]
    fn test_error_body_shape() {
        let err = QuadStreamError::ExceededCost { max_fuel: 100 };
        let body = ErrorBody(&err).to_string();
        assert!(body.contains(r#""status":400"#));
        assert!(body.contains("db/exceeded-cost"));
    }
}
