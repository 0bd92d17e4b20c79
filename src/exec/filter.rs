//! Filter compilation and evaluation.
//!
//! Filter source is an S-expression over a fixed symbol set. Compilation
//! validates every symbol against the allow-list (anything else is
//! `db/invalid-fn`), resolves `?var` references against the query's
//! variable registry, and produces an interpreted expression tree — there
//! is no host-language eval.
//!
//! Evaluation is infallible from the query's point of view: an evaluation
//! error (unbound variable, type mismatch, division by zero) makes a filter
//! *fail*, it does not abort the query. `coalesce` leans on this: every
//! non-terminal arm swallows both nil results and evaluation errors.

use std::fmt;
use std::sync::Arc;

use regex::Regex;

use crate::error::QuadStreamError;
use crate::flake::{Dt, Object, Sid, dt};
use crate::query::{Solution, Var, VarRegistry};
use crate::sexpr::{self, SExpr};

/// Runtime value of filter evaluation.
#[derive(Debug, Clone)]
pub enum FilterValue {
    Null,
    Bool(bool),
    Int(i64),
    Double(f64),
    Str(Arc<str>),
    Sid(Sid),
    Regex(Arc<Regex>),
}

impl FilterValue {
    pub fn is_truthy(&self) -> bool {
        match self {
            FilterValue::Null => false,
            FilterValue::Bool(b) => *b,
            _ => true,
        }
    }

    fn class_rank(&self) -> u8 {
        match self {
            FilterValue::Null => 0,
            FilterValue::Bool(_) => 1,
            FilterValue::Int(_) | FilterValue::Double(_) => 2,
            FilterValue::Str(_) => 3,
            FilterValue::Sid(_) => 4,
            FilterValue::Regex(_) => 5,
        }
    }
}

/// Convert a bound object into a filter value.
pub fn object_value(o: &Object, _datatype: Dt) -> FilterValue {
    match o {
        Object::Null => FilterValue::Null,
        Object::Bool(b) => FilterValue::Bool(*b),
        Object::Int(n) => FilterValue::Int(*n),
        Object::Double(d) => FilterValue::Double(*d),
        Object::Str(s) => FilterValue::Str(Arc::clone(s)),
        Object::Sid(s) => FilterValue::Sid(*s),
    }
}

/// Convert a computed filter value back into an object binding (for `bind`
/// and expression selectors).
pub fn value_object(v: &FilterValue) -> Result<(Object, Dt), EvalError> {
    Ok(match v {
        FilterValue::Null => (Object::Null, dt::STRING),
        FilterValue::Bool(b) => (Object::Bool(*b), dt::BOOLEAN),
        FilterValue::Int(n) => (Object::Int(*n), dt::LONG),
        FilterValue::Double(d) => (Object::Double(*d), dt::DOUBLE),
        FilterValue::Str(s) => (Object::Str(Arc::clone(s)), dt::STRING),
        FilterValue::Sid(s) => (Object::Sid(*s), dt::REF),
        FilterValue::Regex(_) => return Err(EvalError::new("regex is not a bindable value")),
    })
}

/// Non-fatal evaluation failure. Filters treat it as false; `coalesce`
/// swallows it.
#[derive(Debug, Clone)]
pub struct EvalError(String);

impl EvalError {
    pub fn new(msg: impl Into<String>) -> EvalError {
        EvalError(msg.into())
    }
}

impl fmt::Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "eval error: {}", self.0)
    }
}

/// Allow-listed operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Bound,
    Not,
    And,
    Or,
    Lt,
    Lte,
    Gt,
    Gte,
    Eq,
    Neq,
    Add,
    Sub,
    Mul,
    Div,
    NilP,
    StrStarts,
    StrEnds,
    ReFind,
    RePattern,
    Coalesce,
    If,
    Now,
}

fn op_for_symbol(sym: &str) -> Option<FilterOp> {
    Some(match sym {
        "bound" => FilterOp::Bound,
        "!" | "not" => FilterOp::Not,
        "&&" | "and" => FilterOp::And,
        "||" | "or" => FilterOp::Or,
        "<" => FilterOp::Lt,
        "<=" => FilterOp::Lte,
        ">" => FilterOp::Gt,
        ">=" => FilterOp::Gte,
        "=" => FilterOp::Eq,
        "not=" => FilterOp::Neq,
        "+" => FilterOp::Add,
        "-" => FilterOp::Sub,
        "*" => FilterOp::Mul,
        "/" => FilterOp::Div,
        "nil?" => FilterOp::NilP,
        "strStarts" => FilterOp::StrStarts,
        "strEnds" => FilterOp::StrEnds,
        "re-find" => FilterOp::ReFind,
        "re-pattern" => FilterOp::RePattern,
        "coalesce" => FilterOp::Coalesce,
        "if" => FilterOp::If,
        "now" => FilterOp::Now,
        _ => return None,
    })
}

/// Compiled expression tree.
#[derive(Debug, Clone)]
pub enum FilterExpr {
    Lit(FilterValue),
    Var(Var),
    Call { op: FilterOp, args: Vec<FilterExpr> },
}

/// A validated, compiled filter.
#[derive(Debug, Clone)]
pub struct CompiledFilter {
    pub src: String,
    /// Variables referenced, in first-appearance order, deduplicated.
    pub vars: Vec<Var>,
    pub expr: FilterExpr,
}

/// Compile filter source against the in-scope variable registry.
pub fn compile(src: &str, vars: &VarRegistry) -> Result<CompiledFilter, QuadStreamError> {
    let form = sexpr::parse(src)?;
    let mut seen = Vec::new();
    let expr = lower(&form, vars, &mut seen, src)?;
    Ok(CompiledFilter { src: src.to_string(), vars: seen, expr })
}

fn lower(
    form: &SExpr,
    vars: &VarRegistry,
    seen: &mut Vec<Var>,
    src: &str,
) -> Result<FilterExpr, QuadStreamError> {
    match form {
        SExpr::Int(n) => Ok(FilterExpr::Lit(FilterValue::Int(*n))),
        SExpr::Float(d) => Ok(FilterExpr::Lit(FilterValue::Double(*d))),
        SExpr::Str(s) => Ok(FilterExpr::Lit(FilterValue::Str(Arc::from(s.as_str())))),
        SExpr::Bool(b) => Ok(FilterExpr::Lit(FilterValue::Bool(*b))),
        SExpr::Nil => Ok(FilterExpr::Lit(FilterValue::Null)),
        SExpr::Sym(sym) => {
            if sym.starts_with('?') {
                let var = vars.lookup(sym).ok_or_else(|| {
                    QuadStreamError::InvalidFn(format!("variable {sym} is not in scope in {src:?}"))
                })?;
                if !seen.contains(&var) {
                    seen.push(var);
                }
                Ok(FilterExpr::Var(var))
            } else {
                Err(QuadStreamError::InvalidFn(format!(
                    "symbol {sym} is not an allowed function in {src:?}"
                )))
            }
        }
        SExpr::List(items) => {
            let Some(head) = items.first().and_then(SExpr::as_sym) else {
                return Err(QuadStreamError::InvalidFn(format!(
                    "expression head must be a function symbol in {src:?}"
                )));
            };
            let op = op_for_symbol(head).ok_or_else(|| {
                QuadStreamError::InvalidFn(format!("function {head} is not allowed in {src:?}"))
            })?;
            let args: Vec<FilterExpr> = items[1..]
                .iter()
                .map(|a| lower(a, vars, seen, src))
                .collect::<Result<_, _>>()?;
            check_arity(op, args.len(), src)?;
            // Fold a literal re-pattern at compile time so the regex
            // compiles once and syntax errors surface as invalid-fn.
            if op == FilterOp::RePattern
                && let [FilterExpr::Lit(FilterValue::Str(pat))] = args.as_slice()
            {
                let re = Regex::new(pat).map_err(|e| {
                    QuadStreamError::InvalidFn(format!("bad regex {pat:?}: {e}"))
                })?;
                return Ok(FilterExpr::Lit(FilterValue::Regex(Arc::new(re))));
            }
            Ok(FilterExpr::Call { op, args })
        }
    }
}

fn check_arity(op: FilterOp, n: usize, src: &str) -> Result<(), QuadStreamError> {
    let ok = match op {
        FilterOp::Bound | FilterOp::Not | FilterOp::NilP | FilterOp::RePattern => n == 1,
        FilterOp::Now => n == 0,
        FilterOp::If => n == 3,
        FilterOp::StrStarts | FilterOp::StrEnds | FilterOp::ReFind => n == 2,
        FilterOp::Lt | FilterOp::Lte | FilterOp::Gt | FilterOp::Gte | FilterOp::Eq
        | FilterOp::Neq => n >= 2,
        FilterOp::And | FilterOp::Or | FilterOp::Coalesce => n >= 1,
        FilterOp::Add | FilterOp::Mul | FilterOp::Sub | FilterOp::Div => n >= 1,
    };
    if ok {
        Ok(())
    } else {
        Err(QuadStreamError::InvalidFn(format!(
            "wrong number of arguments ({n}) for {op:?} in {src:?}"
        )))
    }
}

// ── Evaluation ───────────────────────────────────────────────────────────

/// Variable resolution during evaluation.
pub type Lookup<'a> = dyn Fn(Var) -> Option<FilterValue> + 'a;

pub fn eval(expr: &FilterExpr, lookup: &Lookup<'_>) -> Result<FilterValue, EvalError> {
    match expr {
        FilterExpr::Lit(v) => Ok(v.clone()),
        FilterExpr::Var(var) => {
            lookup(*var).ok_or_else(|| EvalError::new(format!("variable {} unbound", var.0)))
        }
        FilterExpr::Call { op, args } => eval_call(*op, args, lookup),
    }
}

fn eval_call(
    op: FilterOp,
    args: &[FilterExpr],
    lookup: &Lookup<'_>,
) -> Result<FilterValue, EvalError> {
    match op {
        FilterOp::Bound => match &args[0] {
            FilterExpr::Var(v) => Ok(FilterValue::Bool(lookup(*v).is_some())),
            _ => Err(EvalError::new("bound expects a variable")),
        },
        FilterOp::Not => Ok(FilterValue::Bool(!eval(&args[0], lookup)?.is_truthy())),
        FilterOp::And => {
            for a in args {
                if !eval(a, lookup)?.is_truthy() {
                    return Ok(FilterValue::Bool(false));
                }
            }
            Ok(FilterValue::Bool(true))
        }
        FilterOp::Or => {
            for a in args {
                if eval(a, lookup)?.is_truthy() {
                    return Ok(FilterValue::Bool(true));
                }
            }
            Ok(FilterValue::Bool(false))
        }
        FilterOp::Lt | FilterOp::Lte | FilterOp::Gt | FilterOp::Gte => {
            let mut prev = eval(&args[0], lookup)?;
            for a in &args[1..] {
                let next = eval(a, lookup)?;
                let ord = compare(&prev, &next)?;
                let ok = match op {
                    FilterOp::Lt => ord == std::cmp::Ordering::Less,
                    FilterOp::Lte => ord != std::cmp::Ordering::Greater,
                    FilterOp::Gt => ord == std::cmp::Ordering::Greater,
                    FilterOp::Gte => ord != std::cmp::Ordering::Less,
                    _ => unreachable!(),
                };
                if !ok {
                    return Ok(FilterValue::Bool(false));
                }
                prev = next;
            }
            Ok(FilterValue::Bool(true))
        }
        FilterOp::Eq | FilterOp::Neq => {
            let first = eval(&args[0], lookup)?;
            let mut all_eq = true;
            for a in &args[1..] {
                let next = eval(a, lookup)?;
                if !values_equal(&first, &next) {
                    all_eq = false;
                    break;
                }
            }
            Ok(FilterValue::Bool(if op == FilterOp::Eq { all_eq } else { !all_eq }))
        }
        FilterOp::Add | FilterOp::Sub | FilterOp::Mul | FilterOp::Div => {
            arithmetic(op, args, lookup)
        }
        FilterOp::NilP => Ok(FilterValue::Bool(matches!(
            eval(&args[0], lookup)?,
            FilterValue::Null
        ))),
        FilterOp::StrStarts | FilterOp::StrEnds => {
            let (s, fix) = (eval(&args[0], lookup)?, eval(&args[1], lookup)?);
            match (&s, &fix) {
                (FilterValue::Str(s), FilterValue::Str(fix)) => Ok(FilterValue::Bool(
                    if op == FilterOp::StrStarts {
                        s.starts_with(fix.as_ref())
                    } else {
                        s.ends_with(fix.as_ref())
                    },
                )),
                _ => Err(EvalError::new("string function over non-string")),
            }
        }
        FilterOp::ReFind => {
            let pattern = eval(&args[0], lookup)?;
            let re = match &pattern {
                FilterValue::Regex(re) => Arc::clone(re),
                FilterValue::Str(s) => Arc::new(
                    Regex::new(s).map_err(|e| EvalError::new(format!("bad regex: {e}")))?,
                ),
                _ => return Err(EvalError::new("re-find expects a pattern")),
            };
            match eval(&args[1], lookup)? {
                FilterValue::Str(s) => Ok(match re.find(&s) {
                    Some(m) => FilterValue::Str(Arc::from(m.as_str())),
                    None => FilterValue::Null,
                }),
                _ => Err(EvalError::new("re-find expects a string")),
            }
        }
        FilterOp::RePattern => match eval(&args[0], lookup)? {
            FilterValue::Str(s) => Ok(FilterValue::Regex(Arc::new(
                Regex::new(&s).map_err(|e| EvalError::new(format!("bad regex: {e}")))?,
            ))),
            _ => Err(EvalError::new("re-pattern expects a string")),
        },
        FilterOp::Coalesce => {
            // Every non-terminal arm swallows nil and errors alike; only
            // exhausting all arms fails.
            for a in args {
                match eval(a, lookup) {
                    Ok(FilterValue::Null) | Err(_) => continue,
                    Ok(v) => return Ok(v),
                }
            }
            Err(EvalError::new("all coalesce branches were nil or failed"))
        }
        FilterOp::If => {
            if eval(&args[0], lookup)?.is_truthy() {
                eval(&args[1], lookup)
            } else {
                eval(&args[2], lookup)
            }
        }
        FilterOp::Now => Ok(FilterValue::Int(chrono::Utc::now().timestamp_millis())),
    }
}

fn arithmetic(
    op: FilterOp,
    args: &[FilterExpr],
    lookup: &Lookup<'_>,
) -> Result<FilterValue, EvalError> {
    let mut acc = eval(&args[0], lookup)?;
    if args.len() == 1 {
        // Unary minus / reciprocal; `(+ x)` and `(* x)` are identity.
        return match (op, acc) {
            (FilterOp::Sub, FilterValue::Int(n)) => Ok(FilterValue::Int(
                n.checked_neg().ok_or_else(|| EvalError::new("overflow"))?,
            )),
            (FilterOp::Sub, FilterValue::Double(d)) => Ok(FilterValue::Double(-d)),
            (FilterOp::Div, v) => div(&FilterValue::Int(1), &v),
            (_, v @ (FilterValue::Int(_) | FilterValue::Double(_))) => Ok(v),
            _ => Err(EvalError::new("arithmetic over non-number")),
        };
    }
    for a in &args[1..] {
        let rhs = eval(a, lookup)?;
        acc = match op {
            FilterOp::Add => numeric(&acc, &rhs, i64::checked_add, |a, b| a + b)?,
            FilterOp::Sub => numeric(&acc, &rhs, i64::checked_sub, |a, b| a - b)?,
            FilterOp::Mul => numeric(&acc, &rhs, i64::checked_mul, |a, b| a * b)?,
            FilterOp::Div => div(&acc, &rhs)?,
            _ => unreachable!(),
        };
    }
    Ok(acc)
}

fn numeric(
    a: &FilterValue,
    b: &FilterValue,
    int_op: fn(i64, i64) -> Option<i64>,
    dbl_op: fn(f64, f64) -> f64,
) -> Result<FilterValue, EvalError> {
    match (a, b) {
        (FilterValue::Int(a), FilterValue::Int(b)) => int_op(*a, *b)
            .map(FilterValue::Int)
            .ok_or_else(|| EvalError::new("integer overflow")),
        (FilterValue::Int(a), FilterValue::Double(b)) => Ok(FilterValue::Double(dbl_op(*a as f64, *b))),
        (FilterValue::Double(a), FilterValue::Int(b)) => Ok(FilterValue::Double(dbl_op(*a, *b as f64))),
        (FilterValue::Double(a), FilterValue::Double(b)) => Ok(FilterValue::Double(dbl_op(*a, *b))),
        _ => Err(EvalError::new("arithmetic over non-number")),
    }
}

fn div(a: &FilterValue, b: &FilterValue) -> Result<FilterValue, EvalError> {
    let (a, b) = match (a, b) {
        (FilterValue::Int(a), FilterValue::Int(b)) => (*a as f64, *b as f64),
        (FilterValue::Int(a), FilterValue::Double(b)) => (*a as f64, *b),
        (FilterValue::Double(a), FilterValue::Int(b)) => (*a, *b as f64),
        (FilterValue::Double(a), FilterValue::Double(b)) => (*a, *b),
        _ => return Err(EvalError::new("arithmetic over non-number")),
    };
    if b == 0.0 {
        return Err(EvalError::new("division by zero"));
    }
    Ok(FilterValue::Double(a / b))
}

/// Three-way comparison. Same-class values compare by value; cross-class
/// comparison falls back to the class rank (the datatype-then-value rule).
pub fn compare(a: &FilterValue, b: &FilterValue) -> Result<std::cmp::Ordering, EvalError> {
    use std::cmp::Ordering;
    match (a, b) {
        (FilterValue::Int(a), FilterValue::Int(b)) => Ok(a.cmp(b)),
        (FilterValue::Double(a), FilterValue::Double(b)) => Ok(a.total_cmp(b)),
        (FilterValue::Int(a), FilterValue::Double(b)) => Ok((*a as f64).total_cmp(b)),
        (FilterValue::Double(a), FilterValue::Int(b)) => Ok(a.total_cmp(&(*b as f64))),
        (FilterValue::Str(a), FilterValue::Str(b)) => Ok(a.cmp(b)),
        (FilterValue::Bool(a), FilterValue::Bool(b)) => Ok(a.cmp(b)),
        (FilterValue::Sid(a), FilterValue::Sid(b)) => Ok(a.cmp(b)),
        (FilterValue::Regex(_), _) | (_, FilterValue::Regex(_)) => {
            Err(EvalError::new("regex values do not compare"))
        }
        _ => Ok(a.class_rank().cmp(&b.class_rank()).then(Ordering::Equal)),
    }
}

pub fn values_equal(a: &FilterValue, b: &FilterValue) -> bool {
    matches!(compare(a, b), Ok(std::cmp::Ordering::Equal))
}

// ── CompiledFilter entry points ──────────────────────────────────────────

fn solution_lookup<'a>(sol: &'a Solution) -> impl Fn(Var) -> Option<FilterValue> + 'a {
    move |var| sol.get(var).map(|m| object_value(&m.value, m.dt))
}

impl CompiledFilter {
    /// Truthiness over a solution. Evaluation errors and nil are false.
    pub fn matches_solution(&self, sol: &Solution) -> bool {
        let lookup = solution_lookup(sol);
        eval(&self.expr, &lookup).map(|v| v.is_truthy()).unwrap_or(false)
    }

    /// Truthiness with one variable overridden by a candidate value —
    /// how inlined component hooks run while flakes stream, before the
    /// solution is extended.
    pub fn matches_with(&self, sol: &Solution, var: Var, value: &Object, datatype: Dt) -> bool {
        let over = object_value(value, datatype);
        let lookup = |v: Var| {
            if v == var {
                Some(over.clone())
            } else {
                sol.get(v).map(|m| object_value(&m.value, m.dt))
            }
        };
        eval(&self.expr, &lookup).map(|v| v.is_truthy()).unwrap_or(false)
    }

    /// Full evaluation, for `bind` and expression selectors.
    pub fn eval_value(&self, sol: &Solution) -> Result<FilterValue, EvalError> {
        let lookup = solution_lookup(sol);
        eval(&self.expr, &lookup)
    }
}
