//! Aggregate expression parsing and evaluation.
//!
//! Aggregates take the form `(as (f ?var) ?binding)` or `(f ?var)`; the
//! variable may be wrapped as `(f (distinct ?var))` to de-duplicate before
//! the outer fold, and `sample` takes a leading count: `(sample n ?var)`.
//! Without an `as`, the output binding is named `?var-f`.
//!
//! Evaluation folds the grouped values of the variable. Scalar functions
//! (`abs`, `ceil`, `floor`, `str`) map element-wise and unwrap a
//! single-element group.

use rand::RngExt;
use serde_json::Value;

use crate::error::QuadStreamError;
use crate::flake::{Dt, Object};
use crate::query::{Var, VarRegistry};
use crate::sexpr::{self, SExpr};

/// The aggregate function set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggFunc {
    Abs,
    Avg,
    Ceil,
    Count,
    CountDistinct,
    Distinct,
    Floor,
    GroupConcat,
    Median,
    Min,
    Max,
    Rand,
    Sample,
    Stddev,
    Str,
    Sum,
    Variance,
}

impl AggFunc {
    fn for_symbol(sym: &str) -> Option<AggFunc> {
        Some(match sym {
            "abs" => AggFunc::Abs,
            "avg" => AggFunc::Avg,
            "ceil" => AggFunc::Ceil,
            "count" => AggFunc::Count,
            "count-distinct" => AggFunc::CountDistinct,
            "distinct" => AggFunc::Distinct,
            "floor" => AggFunc::Floor,
            "groupconcat" => AggFunc::GroupConcat,
            "median" => AggFunc::Median,
            "min" => AggFunc::Min,
            "max" => AggFunc::Max,
            "rand" => AggFunc::Rand,
            "sample" => AggFunc::Sample,
            "stddev" => AggFunc::Stddev,
            "str" => AggFunc::Str,
            "sum" => AggFunc::Sum,
            "variance" => AggFunc::Variance,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            AggFunc::Abs => "abs",
            AggFunc::Avg => "avg",
            AggFunc::Ceil => "ceil",
            AggFunc::Count => "count",
            AggFunc::CountDistinct => "count-distinct",
            AggFunc::Distinct => "distinct",
            AggFunc::Floor => "floor",
            AggFunc::GroupConcat => "groupconcat",
            AggFunc::Median => "median",
            AggFunc::Min => "min",
            AggFunc::Max => "max",
            AggFunc::Rand => "rand",
            AggFunc::Sample => "sample",
            AggFunc::Stddev => "stddev",
            AggFunc::Str => "str",
            AggFunc::Sum => "sum",
            AggFunc::Variance => "variance",
        }
    }
}

/// A parsed aggregate selector.
#[derive(Debug, Clone)]
pub struct AggregateSpec {
    pub func: AggFunc,
    pub var: Var,
    /// `(f (distinct ?var))`: de-duplicate before the outer fold.
    pub distinct_inner: bool,
    /// `sample` count.
    pub sample_n: Option<usize>,
    /// Output binding name.
    pub out_name: String,
}

/// Parse aggregate source like `"(as (avg ?age) ?mean)"`.
pub fn parse_aggregate(src: &str, vars: &VarRegistry) -> Result<AggregateSpec, QuadStreamError> {
    let form = sexpr::parse(src)?;
    parse_form(&form, vars, src)
}

fn parse_form(form: &SExpr, vars: &VarRegistry, src: &str) -> Result<AggregateSpec, QuadStreamError> {
    let bad = |why: &str| QuadStreamError::InvalidFn(format!("{why} in aggregate {src:?}"));
    let items = form.as_list().ok_or_else(|| bad("expected a list"))?;
    let head = items.first().and_then(SExpr::as_sym).ok_or_else(|| bad("missing function"))?;

    if head == "as" {
        let [_, inner, out] = items else {
            return Err(bad("as expects (as (f ?var) ?binding)"));
        };
        let SExpr::Sym(out_name) = out else {
            return Err(bad("as binding must be a variable"));
        };
        if !out_name.starts_with('?') {
            return Err(bad("as binding must be a variable"));
        }
        let mut spec = parse_form(inner, vars, src)?;
        spec.out_name = out_name.clone();
        return Ok(spec);
    }

    let func = AggFunc::for_symbol(head).ok_or_else(|| bad("unknown aggregate function"))?;
    let mut args = &items[1..];

    let mut sample_n = None;
    if func == AggFunc::Sample {
        let Some(SExpr::Int(n)) = args.first() else {
            return Err(bad("sample expects (sample n ?var)"));
        };
        if *n <= 0 {
            return Err(bad("sample count must be positive"));
        }
        sample_n = Some(*n as usize);
        args = &args[1..];
    }

    let [arg] = args else {
        return Err(bad("aggregate expects a single variable"));
    };

    let (var_sym, distinct_inner) = match arg {
        SExpr::Sym(sym) => (sym.as_str(), false),
        SExpr::List(inner) => {
            let [SExpr::Sym(d), SExpr::Sym(sym)] = inner.as_slice() else {
                return Err(bad("expected (distinct ?var)"));
            };
            if d != "distinct" {
                return Err(bad("only distinct may wrap the variable"));
            }
            (sym.as_str(), true)
        }
        _ => return Err(bad("aggregate argument must be a variable")),
    };
    if !var_sym.starts_with('?') {
        return Err(bad("aggregate argument must be a variable"));
    }
    let var = vars
        .lookup(var_sym)
        .ok_or_else(|| bad("aggregate variable is not in scope"))?;

    Ok(AggregateSpec {
        func,
        var,
        distinct_inner,
        sample_n,
        out_name: format!("{var_sym}-{}", func.name()),
    })
}

// ── Evaluation ───────────────────────────────────────────────────────────

fn dedup(values: &[(Object, Dt)]) -> Vec<(Object, Dt)> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for (o, datatype) in values {
        let mut key = Vec::new();
        o.encode_for_hash(&mut key);
        key.extend_from_slice(&datatype.to_le_bytes());
        if seen.insert(key) {
            out.push((o.clone(), *datatype));
        }
    }
    out
}

fn numbers(values: &[(Object, Dt)], func: AggFunc) -> Result<Vec<f64>, QuadStreamError> {
    values
        .iter()
        .map(|(o, _)| {
            o.as_f64().ok_or_else(|| {
                QuadStreamError::InvalidFn(format!("{} over non-numeric value", func.name()))
            })
        })
        .collect()
}

fn display_string(o: &Object) -> String {
    match o {
        Object::Null => "nil".to_string(),
        Object::Bool(b) => b.to_string(),
        Object::Int(n) => n.to_string(),
        Object::Double(d) => d.to_string(),
        Object::Str(s) => s.to_string(),
        Object::Sid(s) => s.to_string(),
    }
}

/// Map element-wise, unwrapping a single-element group to a scalar.
fn elementwise(
    values: &[(Object, Dt)],
    f: impl Fn(&Object) -> Result<Value, QuadStreamError>,
) -> Result<Value, QuadStreamError> {
    if values.len() == 1 {
        return f(&values[0].0);
    }
    let out: Vec<Value> = values.iter().map(|(o, _)| f(o)).collect::<Result<_, _>>()?;
    Ok(Value::Array(out))
}

impl AggregateSpec {
    /// Fold the grouped values of this spec's variable.
    pub fn apply(&self, values: &[(Object, Dt)]) -> Result<Value, QuadStreamError> {
        let deduped;
        let values: &[(Object, Dt)] = if self.distinct_inner {
            deduped = dedup(values);
            &deduped
        } else {
            values
        };

        match self.func {
            AggFunc::Count => Ok(Value::from(values.len() as i64)),
            AggFunc::CountDistinct => Ok(Value::from(dedup(values).len() as i64)),
            AggFunc::Distinct => Ok(Value::Array(
                dedup(values).iter().map(|(o, _)| o.to_json()).collect(),
            )),
            AggFunc::Sum => {
                let ns = numbers(values, self.func)?;
                if values.iter().all(|(o, _)| matches!(o, Object::Int(_))) {
                    Ok(Value::from(ns.iter().map(|n| *n as i64).sum::<i64>()))
                } else {
                    Ok(Value::from(ns.iter().sum::<f64>()))
                }
            }
            AggFunc::Avg => {
                let ns = numbers(values, self.func)?;
                if ns.is_empty() {
                    return Ok(Value::Null);
                }
                Ok(Value::from(ns.iter().sum::<f64>() / ns.len() as f64))
            }
            AggFunc::Median => {
                let mut ns = numbers(values, self.func)?;
                if ns.is_empty() {
                    return Ok(Value::Null);
                }
                ns.sort_by(f64::total_cmp);
                let mid = ns.len() / 2;
                let median = if ns.len() % 2 == 1 {
                    ns[mid]
                } else {
                    (ns[mid - 1] + ns[mid]) / 2.0
                };
                Ok(Value::from(median))
            }
            AggFunc::Variance | AggFunc::Stddev => {
                let ns = numbers(values, self.func)?;
                if ns.len() < 2 {
                    return Ok(Value::from(0.0));
                }
                let mean = ns.iter().sum::<f64>() / ns.len() as f64;
                let var =
                    ns.iter().map(|n| (n - mean) * (n - mean)).sum::<f64>() / (ns.len() - 1) as f64;
                Ok(Value::from(if self.func == AggFunc::Stddev {
                    var.sqrt()
                } else {
                    var
                }))
            }
            AggFunc::Min => Ok(values
                .iter()
                .map(|(o, _)| o)
                .min()
                .map(Object::to_json)
                .unwrap_or(Value::Null)),
            AggFunc::Max => Ok(values
                .iter()
                .map(|(o, _)| o)
                .max()
                .map(Object::to_json)
                .unwrap_or(Value::Null)),
            AggFunc::GroupConcat => Ok(Value::from(
                values
                    .iter()
                    .map(|(o, _)| display_string(o))
                    .collect::<Vec<_>>()
                    .join(" "),
            )),
            AggFunc::Rand => {
                if values.is_empty() {
                    return Ok(Value::Null);
                }
                let i = rand::rng().random_range(0..values.len());
                Ok(values[i].0.to_json())
            }
            AggFunc::Sample => {
                let n = self.sample_n.unwrap_or(1).min(values.len());
                // Partial Fisher–Yates over an index vector.
                let mut idx: Vec<usize> = (0..values.len()).collect();
                let mut rng = rand::rng();
                for i in 0..n {
                    let j = rng.random_range(i..idx.len());
                    idx.swap(i, j);
                }
                Ok(Value::Array(
                    idx[..n].iter().map(|&i| values[i].0.to_json()).collect(),
                ))
            }
            AggFunc::Abs => elementwise(values, |o| match o {
                Object::Int(n) => Ok(Value::from(n.abs())),
                Object::Double(d) => Ok(Value::from(d.abs())),
                _ => Err(QuadStreamError::InvalidFn("abs over non-numeric value".into())),
            }),
            AggFunc::Ceil => elementwise(values, |o| match o {
                Object::Int(n) => Ok(Value::from(*n)),
                Object::Double(d) => Ok(Value::from(d.ceil() as i64)),
                _ => Err(QuadStreamError::InvalidFn("ceil over non-numeric value".into())),
            }),
            AggFunc::Floor => elementwise(values, |o| match o {
                Object::Int(n) => Ok(Value::from(*n)),
                Object::Double(d) => Ok(Value::from(d.floor() as i64)),
                _ => Err(QuadStreamError::InvalidFn("floor over non-numeric value".into())),
            }),
            AggFunc::Str => elementwise(values, |o| Ok(Value::from(display_string(o)))),
        }
    }
}
