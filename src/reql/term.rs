//! Query term model - the wire shape of a chained query.
//!
//! A query is an ordered sequence of `Term`s, each a named operation with
//! positional arguments. Arguments form a closed tagged union (`Arg`):
//!
//! - `value`: a literal scalar/array/map
//! - `array`: an ordered list of arguments
//! - `object`: a name -> argument mapping
//! - `func`: a lambda over positional placeholders (parameter indices plus a
//!   nested body)
//! - `query`: a nested term sequence (sub-query)
//! - `var`: a named deferred-literal placeholder
//!
//! The JSON encoding is the tagged form produced by the query builder:
//!
//! ```json
//! [
//!   {"id": "db",    "args": [{"type": "value", "value": "mydb"}]},
//!   {"id": "table", "args": [{"type": "value", "value": "users"}]},
//!   {"id": "filter", "args": [{"type": "func", "args": [0], "value": {
//!     "type": "query", "value": [
//!       {"id": "arg",   "args": [{"type": "value", "value": 0}]},
//!       {"id": "index", "args": [{"type": "value", "value": "isActive"}]},
//!       {"id": "eq",    "args": [{"type": "value", "value": true}]}
//!     ]}}]}
//! ]
//! ```

use bson::Bson;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One named operation with positional arguments in the query AST.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Term {
    /// Operation name (`db`, `table`, `filter`, `eq`, ...)
    pub id: String,

    /// Positional arguments
    #[serde(default)]
    pub args: Vec<Arg>,
}

impl Term {
    /// Create a new term with the given operation id
    pub fn op<S: Into<String>>(id: S) -> Self {
        Self {
            id: id.into(),
            args: Vec::new(),
        }
    }

    /// Add a positional argument
    pub fn with_arg(mut self, arg: Arg) -> Self {
        self.args.push(arg);
        self
    }

    /// Add multiple positional arguments
    pub fn with_args(mut self, args: Vec<Arg>) -> Self {
        self.args.extend(args);
        self
    }

    /// Get argument at index
    pub fn arg(&self, index: usize) -> Option<&Arg> {
        self.args.get(index)
    }

    /// Get the literal value of the argument at index, if it is a `value` arg
    pub fn literal(&self, index: usize) -> Option<&Bson> {
        self.args.get(index).and_then(Arg::as_literal)
    }

    /// Get the argument at index as a literal string
    pub fn str_arg(&self, index: usize) -> Option<&str> {
        self.literal(index).and_then(Bson::as_str)
    }

    /// Get the argument at index as a literal non-negative integer
    pub fn u32_arg(&self, index: usize) -> Option<u32> {
        bson_u32(self.literal(index)?)
    }
}

/// A tagged argument value in the query AST.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Arg {
    /// Literal scalar or document
    Value { value: Bson },
    /// Ordered list of arguments
    Array { value: Vec<Arg> },
    /// Mapping from field name to argument
    Object { value: BTreeMap<String, Arg> },
    /// Lambda over positional placeholders: parameter indices + body
    Func { args: Vec<u32>, value: Box<Arg> },
    /// Nested term sequence
    Query { value: Vec<Term> },
    /// Named deferred-literal placeholder
    Var { value: String },
}

impl Arg {
    /// Literal value constructor
    pub fn value<B: Into<Bson>>(value: B) -> Self {
        Arg::Value {
            value: value.into(),
        }
    }

    /// Array constructor
    pub fn array(value: Vec<Arg>) -> Self {
        Arg::Array { value }
    }

    /// Object constructor
    pub fn object<I: IntoIterator<Item = (String, Arg)>>(entries: I) -> Self {
        Arg::Object {
            value: entries.into_iter().collect(),
        }
    }

    /// Lambda constructor
    pub fn func(params: Vec<u32>, body: Arg) -> Self {
        Arg::Func {
            args: params,
            value: Box::new(body),
        }
    }

    /// Sub-query constructor
    pub fn query(terms: Vec<Term>) -> Self {
        Arg::Query { value: terms }
    }

    /// Variable placeholder constructor
    pub fn var<S: Into<String>>(name: S) -> Self {
        Arg::Var {
            value: name.into(),
        }
    }

    /// Get the literal value if this is a `value` arg
    pub fn as_literal(&self) -> Option<&Bson> {
        match self {
            Arg::Value { value } => Some(value),
            _ => None,
        }
    }

    /// Get the nested term sequence if this is a `query` arg
    pub fn as_query(&self) -> Option<&[Term]> {
        match self {
            Arg::Query { value } => Some(value),
            _ => None,
        }
    }
}

/// Join strategies understood by the join synthesizer.
///
/// The numeric codes match the builder's join-type constants carried in the
/// second argument of a `join` term.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JoinType {
    /// Uncorrelated cartesian product
    Cross = 0,
    /// Anti-join: left rows with zero matches on the right
    LeftExcl = 1,
    /// Matched pairs only
    Inner = 2,
    /// One row per left document, right side null when unmatched
    Left = 3,
}

impl JoinType {
    /// Decode a numeric join-type code
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(JoinType::Cross),
            1 => Some(JoinType::LeftExcl),
            2 => Some(JoinType::Inner),
            3 => Some(JoinType::Left),
            _ => None,
        }
    }
}

/// Read a BSON numeric as a non-negative integer (parameter indices, counts).
pub(crate) fn bson_u32(value: &Bson) -> Option<u32> {
    match value {
        Bson::Int32(n) if *n >= 0 => Some(*n as u32),
        Bson::Int64(n) if *n >= 0 && *n <= u32::MAX as i64 => Some(*n as u32),
        Bson::Double(n) if *n >= 0.0 && n.fract() == 0.0 && *n <= u32::MAX as f64 => {
            Some(*n as u32)
        }
        _ => None,
    }
}

/// Read a BSON numeric as a signed integer (join-type codes, skip counts).
pub(crate) fn bson_i64(value: &Bson) -> Option<i64> {
    match value {
        Bson::Int32(n) => Some(*n as i64),
        Bson::Int64(n) => Some(*n),
        Bson::Double(n) if n.fract() == 0.0 && n.abs() <= i64::MAX as f64 => Some(*n as i64),
        _ => None,
    }
}
