//! A JSONata-style expression language over `serde_json::Value`.
//!
//! Supported: literals, field paths (`a.b`, `` `odd-name` ``), `$` (context),
//! `$$` (root), variables bound by the caller or with `:=` inside `( ...; ... )`
//! blocks, index and filter predicates (`[0]`, `[-1]`, `[role = 'user']`), `[]`
//! to keep arrays, object and array constructors, arithmetic, comparison,
//! `and`/`or`/`in`, string concatenation with `&`, the `? :` conditional, and a
//! set of built-in functions (see `functions.rs`).
//!
//! Mapping a path over an array always yields an array, even with a single
//! element. Undefined results are dropped from constructors.

mod eval;
mod functions;
mod lexer;
mod parser;

use std::collections::BTreeMap;

use serde_json::{Number, Value};

use crate::error::ConvertError;

/// A compiled expression, reusable across evaluations.
#[derive(Debug, Clone)]
pub struct Expression {
    source: String,
    ast: parser::Expr,
}

impl Expression {
    /// Compile the expression source.
    pub fn compile(source: &str) -> Result<Self, ConvertError> {
        let ast = parser::parse(source)?;

        Ok(Self {
            source: source.to_string(),
            ast,
        })
    }

    /// The source text this expression was compiled from.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluate against `input` with `variables` bound as `$name`.
    ///
    /// Returns `None` when the expression is undefined for this input.
    pub fn evaluate(&self, input: Option<&Value>, variables: &BTreeMap<String, Value>) -> Result<Option<Value>, ConvertError> {
        eval::evaluate(&self.ast, input, variables)
    }
}

/// Numbers with no fractional part are kept as integers so `1` does not render as `1.0`.
pub(crate) fn number(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 {
        Value::Number(Number::from(n as i64))
    } else {
        Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null)
    }
}
