//! Query compilation: term sequences -> aggregation pipelines.
//!
//! The compiler is a synchronous fold over a term sequence. Stage handlers
//! ([`stage`]) mutate a [`CompiledQuery`] in place; whenever a stage argument
//! is itself an expression or nested query they consult the per-document
//! expression compiler ([`expr`]) or, inside group-reduction lambdas, the
//! array-level accumulation compiler ([`accum`]). Join stages delegate to the
//! join synthesizer ([`join`]).
//!
//! The produced [`CompiledQuery`] is the bit-exact contract with the backing
//! store: a `Vec<bson::Document>` pipeline plus a dispatch [`Mode`] and two
//! result-shape flags.

pub mod accum;
pub mod expr;
pub mod join;
pub mod stage;

use bson::{Bson, Document};
use std::collections::HashMap;

use crate::error::Result;
use crate::reql::Term;

/// Dispatch mode of a compiled query.
///
/// Defaults to `Get`; write and administrative stages overwrite it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    #[default]
    Get,
    Insert,
    Update,
    Replace,
    Delete,
    IndexCreate,
    IndexDrop,
    IndexList,
    TableCreate,
    TableDrop,
    TableList,
    DbCreate,
    DbDrop,
    DbList,
}

/// The intermediate representation produced by the stage compiler.
///
/// Built once per invocation, consumed immediately by the mode dispatcher or
/// the cursor manager, then discarded.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompiledQuery {
    /// Target database, set by the `db` stage
    pub database: Option<String>,
    /// Target collection, set by the `table` stage
    pub collection: Option<String>,
    /// How the dispatcher executes this query
    pub mode: Mode,
    /// Aggregation pipeline stages, in order
    pub pipeline: Vec<Document>,
    /// Mode-specific captured arguments (insert payload, index specs, ...)
    pub args: Vec<Bson>,
    /// Nested patch query for update/replace writes
    pub patch: Option<Box<CompiledQuery>>,
    /// The logical row shape has collapsed to a bare scalar, carried under
    /// the private `__singleval` field until final unwrap. Monotonic.
    pub single_value: bool,
    /// The chain guarantees at most one logical result. Monotonic.
    pub is_datum: bool,
}

impl CompiledQuery {
    pub fn new() -> Self {
        Self::default()
    }
}

/// A named deferred-literal slot, declared by a `var` argument.
///
/// Written at most once before being read; no stage handler consumes these
/// yet, the compiler only collects the declarations.
#[derive(Debug, Clone, PartialEq)]
pub struct VarSlot {
    pub name: String,
    pub value: Option<Bson>,
}

impl VarSlot {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            value: None,
        }
    }
}

/// Mutable state threaded by reference through one top-level compilation.
#[derive(Debug, Default)]
pub struct TranslationContext {
    /// Parameter index -> currently-bound expression value. Entries are
    /// pushed before entering a lambda body and popped on exit.
    pub args: HashMap<u32, Bson>,
    /// Parameter index bound to the array of grouped rows inside an
    /// accumulation lambda; presence routes expression compilation through
    /// the accumulation translator table.
    pub group_stream: Option<u32>,
    /// Declared variable placeholders, append-only.
    pub vars: Vec<VarSlot>,
    next_temp: u32,
}

impl TranslationContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next temporary variable name, unique within this compilation.
    pub fn temp_name(&mut self) -> String {
        let n = self.next_temp;
        self.next_temp += 1;
        format!("temporary_{n}")
    }
}

/// Compile a term sequence into a [`CompiledQuery`].
pub fn compile_query(terms: &[Term], ctx: &mut TranslationContext) -> Result<CompiledQuery> {
    let mut compiled = CompiledQuery::new();
    for term in terms {
        stage::compile_stage(term, &mut compiled, ctx)?;
    }
    Ok(compiled)
}

/// Reference to the current document root, with optional field suffixes.
///
/// `$$ROOT` for whole documents, `$__singleval` once the row shape has
/// collapsed to a scalar.
pub fn root_path(compiled: &CompiledQuery, fields: &[&str]) -> String {
    let base = if compiled.single_value {
        "$__singleval"
    } else {
        "$$ROOT"
    };
    let mut path = String::from(base);
    for field in fields {
        path.push('.');
        path.push_str(field);
    }
    path
}

/// Classify whether a compiled lambda result is a bare value rather than a
/// multi-field document shape.
///
/// A document whose single key starts with the `$` operator sigil is an
/// operator expression (one computed value), and an array is always a bare
/// value. Downstream stages depend on this exact boundary: bare values are
/// re-projected under `__singleval` and flip the query's `single_value` flag.
pub fn is_bare_value(value: &Bson) -> bool {
    match value {
        Bson::Document(doc) => is_operator_expression(doc),
        _ => true,
    }
}

fn is_operator_expression(doc: &Document) -> bool {
    doc.len() == 1 && doc.keys().next().is_some_and(|k| k.starts_with('$'))
}

/// Coerce a compiled lambda result into a projection document, collapsing
/// bare values under `__singleval`.
pub fn ensure_projection(value: Bson) -> Document {
    match value {
        Bson::Document(doc) if !is_operator_expression(&doc) => doc,
        other => {
            let mut doc = Document::new();
            doc.insert("__singleval", other);
            doc
        }
    }
}
