//! Per-document expression compilation.
//!
//! Translates argument trees into backend expressions, threading a `prev`
//! reference (the "current value") through a left-to-right fold over a term
//! sequence whose first term is always `arg` (bind a parameter) or `expr`
//! (a literal). Each operation id resolves to either a fixed backend
//! operator name or a custom rewrite for operators the backend has no direct
//! equivalent for (bit shifts, substring membership, key/value listing, ...).

use bson::{bson, doc, Bson, Document};

use super::accum;
use super::{compile_query, CompiledQuery, TranslationContext, VarSlot};
use crate::error::{Error, Result};
use crate::reql::{Arg, Term};

type CustomFn = fn(Bson, &Term, &mut CompiledQuery, &mut TranslationContext) -> Result<Bson>;

/// A tagged expression handler: rewrite as a fixed backend operator, or run
/// a custom translation.
pub(crate) enum Translator {
    Operator(&'static str),
    Custom(CustomFn),
}

fn translator(id: &str) -> Option<Translator> {
    use Translator::{Custom, Operator};
    Some(match id {
        "arg" => Custom(arg_ref),
        "expr" => Custom(literal_expr),
        "index" => Custom(field_access),
        "default" => Operator("$ifNull"),

        "and" => Operator("$and"),
        "or" => Operator("$or"),
        "not" => Operator("$not"),

        "during" => Custom(during),
        "timeOfDay" => Custom(time_of_day),
        "year" => Operator("$year"),
        "month" => Operator("$month"),
        "day" => Operator("$dayOfMonth"),
        "dayOfWeek" => Operator("$dayOfWeek"),
        "dayOfYear" => Operator("$dayOfYear"),
        "hours" => Operator("$hour"),
        "minutes" => Operator("$minute"),
        "seconds" => Operator("$second"),

        "add" => Operator("$add"),
        "sub" => Operator("$subtract"),
        "mul" => Operator("$multiply"),
        "div" => Operator("$divide"),
        "mod" => Operator("$mod"),
        "bitAnd" => Operator("$bitAnd"),
        "bitOr" => Operator("$bitOr"),
        "bitXor" => Operator("$bitXor"),
        "bitNot" => Operator("$bitNot"),
        "bitLShift" => Custom(bit_lshift),
        "bitRShift" => Custom(bit_rshift),
        "round" => Operator("$round"),
        "ceil" => Operator("$ceil"),
        "floor" => Operator("$floor"),

        "eq" => Operator("$eq"),
        "ne" => Operator("$ne"),
        "gt" => Operator("$gt"),
        "ge" => Operator("$gte"),
        "lt" => Operator("$lt"),
        "le" => Operator("$lte"),

        "split" => Operator("$split"),
        "upcase" => Operator("$toUpper"),
        "downcase" => Operator("$toLower"),
        "count" => Custom(count_value),
        "match" => Custom(regex_match),
        "includes" => Custom(includes),

        "slice" => Custom(slice_range),
        "map" => Custom(map_elements),
        "filter" => Custom(filter_elements),
        "isEmpty" => Custom(is_empty),
        "sum" => Operator("$sum"),
        "avg" => Custom(fold_avg),
        "min" => Custom(fold_min),
        "max" => Custom(fold_max),

        "merge" => Custom(merge_objects),
        "keys" => Custom(object_keys),
        "values" => Custom(object_values),
        _ => return None,
    })
}

/// Translate one expression term against the accumulated `prev` value.
pub fn compile_expression(
    prev: Bson,
    term: &Term,
    compiled: &mut CompiledQuery,
    ctx: &mut TranslationContext,
) -> Result<Bson> {
    match translator(&term.id) {
        Some(Translator::Operator(op)) => apply_operator(op, prev, term, compiled, ctx),
        Some(Translator::Custom(custom)) => custom(prev, term, compiled, ctx),
        None => Err(Error::MalformedQuery(format!(
            "unknown expression term `{}`",
            term.id
        ))),
    }
}

/// Fixed-operator form: `{op: prev}` for zero-arg terms, otherwise
/// `{op: [prev, compiled args...]}`.
pub(crate) fn apply_operator(
    op: &str,
    prev: Bson,
    term: &Term,
    compiled: &mut CompiledQuery,
    ctx: &mut TranslationContext,
) -> Result<Bson> {
    if term.args.is_empty() {
        return Ok(operator(op, prev));
    }
    let mut operands = Vec::with_capacity(term.args.len() + 1);
    operands.push(prev);
    for arg in &term.args {
        operands.push(compile_value(arg, compiled, ctx)?);
    }
    Ok(operator(op, Bson::Array(operands)))
}

/// Build a single-operator expression document with a dynamic operator key.
pub(crate) fn operator<B: Into<Bson>>(op: &str, value: B) -> Bson {
    let mut doc = Document::new();
    doc.insert(op, value);
    Bson::Document(doc)
}

/// Compile an argument tree to a backend expression value.
pub fn compile_value(
    arg: &Arg,
    compiled: &mut CompiledQuery,
    ctx: &mut TranslationContext,
) -> Result<Bson> {
    match arg {
        Arg::Value { value } => Ok(literal_value(value)),
        Arg::Array { value } => {
            let mut items = Vec::with_capacity(value.len());
            for item in value {
                items.push(compile_value(item, compiled, ctx)?);
            }
            Ok(Bson::Array(items))
        }
        Arg::Object { value } => {
            let mut doc = Document::new();
            for (key, item) in value {
                doc.insert(key.as_str(), compile_value(item, compiled, ctx)?);
            }
            Ok(Bson::Document(doc))
        }
        Arg::Func { value, .. } => compile_value(value, compiled, ctx),
        Arg::Query { value } => compile_subexpression(value, compiled, ctx),
        Arg::Var { value } => {
            // deferred-write slot; the declaration is collected, the
            // expression carries a null literal placeholder
            ctx.vars.push(VarSlot::new(value.clone()));
            Ok(operator("$literal", Bson::Null))
        }
    }
}

/// Plain maps become opaque literals so the backend does not reinterpret
/// their keys as operators.
fn literal_value(value: &Bson) -> Bson {
    match value {
        Bson::Document(_) => operator("$literal", value.clone()),
        other => other.clone(),
    }
}

/// Compile a nested term sequence appearing in value position.
///
/// Sequences starting with `arg`/`expr` are expression chains folded in
/// place; anything else is a correlated sub-query embedded as a `$lookup`
/// against the enclosing pipeline.
fn compile_subexpression(
    terms: &[Term],
    compiled: &mut CompiledQuery,
    ctx: &mut TranslationContext,
) -> Result<Bson> {
    if let Some(first) = terms.first() {
        if first.id == "arg" || first.id == "expr" {
            let use_accum = ctx.group_stream.is_some()
                && first.id == "arg"
                && first.u32_arg(0) == ctx.group_stream;
            let mut prev = Bson::Null;
            for term in terms {
                prev = if use_accum {
                    accum::compile_accum_expression(prev, term, compiled, ctx)?
                } else {
                    compile_expression(prev, term, compiled, ctx)?
                };
            }
            return Ok(prev);
        }
    }
    embed_correlated_query(terms, compiled, ctx)
}

/// Correlated sub-query embedding: rebind the enclosing root to a fresh
/// capture variable, compile the nested query, and splice it as a `$lookup`
/// with a `let` capture of the enclosing document.
fn embed_correlated_query(
    terms: &[Term],
    compiled: &mut CompiledQuery,
    ctx: &mut TranslationContext,
) -> Result<Bson> {
    let root_param = ctx
        .args
        .iter()
        .find(|(_, bound)| matches!(bound, Bson::String(s) if s == "$$ROOT"))
        .map(|(index, _)| *index)
        .ok_or_else(|| {
            Error::MalformedQuery("correlated sub-query outside an enclosing lambda".into())
        })?;

    let capture = ctx.temp_name();
    ctx.args
        .insert(root_param, Bson::String(format!("$${capture}")));
    let sub = compile_query(terms, ctx);
    ctx.args.insert(root_param, Bson::String("$$ROOT".into()));
    let sub = sub?;

    let from = sub.collection.clone().ok_or_else(|| {
        Error::MissingTarget("correlated sub-query selects no table".into())
    })?;
    let out_field = ctx.temp_name();
    let mut let_doc = Document::new();
    let_doc.insert(capture.as_str(), "$$ROOT");
    compiled.pipeline.push(doc! {
        "$lookup": {
            "from": from,
            "let": let_doc,
            "pipeline": sub.pipeline,
            "as": out_field.as_str(),
        }
    });

    let mut field_ref = format!("${out_field}");
    if sub.single_value {
        field_ref.push_str(".__singleval");
    }
    let mut result = Bson::String(field_ref);
    if sub.is_datum {
        result = bson!({"$arrayElemAt": [result, 0]});
    }
    Ok(result)
}

/// Compile a lambda argument with positional parameters bound for the
/// duration of its body. Non-lambda arguments compile as plain values.
///
/// Bindings are restored on every exit path, including errors.
pub fn compile_function(
    arg: &Arg,
    compiled: &mut CompiledQuery,
    ctx: &mut TranslationContext,
    wrap_expr: bool,
    params: &[Bson],
) -> Result<Bson> {
    let Arg::Func {
        args: param_ids,
        value,
    } = arg
    else {
        return compile_value(arg, compiled, ctx);
    };
    let result = with_bindings(param_ids, params, ctx, |ctx| {
        compile_value(value, compiled, ctx)
    })?;
    Ok(if wrap_expr {
        operator("$expr", result)
    } else {
        result
    })
}

/// Push parameter bindings, run `body`, and pop the bindings again,
/// restoring any shadowed outer binding.
pub(crate) fn with_bindings<F>(
    param_ids: &[u32],
    params: &[Bson],
    ctx: &mut TranslationContext,
    body: F,
) -> Result<Bson>
where
    F: FnOnce(&mut TranslationContext) -> Result<Bson>,
{
    let mut shadowed = Vec::with_capacity(param_ids.len().min(params.len()));
    for (index, value) in param_ids.iter().zip(params) {
        shadowed.push((*index, ctx.args.insert(*index, value.clone())));
    }
    let result = body(ctx);
    for (index, previous) in shadowed.into_iter().rev() {
        match previous {
            Some(value) => {
                ctx.args.insert(index, value);
            }
            None => {
                ctx.args.remove(&index);
            }
        }
    }
    result
}

// ---- custom translators ----------------------------------------------------

pub(crate) fn arg_ref(
    _prev: Bson,
    term: &Term,
    _compiled: &mut CompiledQuery,
    ctx: &mut TranslationContext,
) -> Result<Bson> {
    let index = term
        .u32_arg(0)
        .ok_or_else(|| Error::MalformedQuery("`arg` expects a parameter index".into()))?;
    ctx.args
        .get(&index)
        .cloned()
        .ok_or_else(|| Error::MalformedQuery(format!("unbound parameter {index}")))
}

fn literal_expr(
    _prev: Bson,
    term: &Term,
    _compiled: &mut CompiledQuery,
    _ctx: &mut TranslationContext,
) -> Result<Bson> {
    let value = term
        .literal(0)
        .ok_or_else(|| Error::MalformedQuery("`expr` expects a literal value".into()))?;
    Ok(operator("$literal", value.clone()))
}

/// Field access: dotted-path concatenation when both sides are plain
/// strings, dynamic `$getField` otherwise (needed when the key is computed).
pub(crate) fn field_access(
    prev: Bson,
    term: &Term,
    compiled: &mut CompiledQuery,
    ctx: &mut TranslationContext,
) -> Result<Bson> {
    if let (Bson::String(base), Some(Bson::String(key))) = (&prev, term.literal(0)) {
        return Ok(Bson::String(format!("{base}.{key}")));
    }
    let arg = term
        .arg(0)
        .ok_or_else(|| Error::MalformedQuery("`index` expects a field argument".into()))?;
    let field = compile_value(arg, compiled, ctx)?;
    Ok(bson!({"$getField": {"field": field, "input": prev}}))
}

fn during(
    prev: Bson,
    term: &Term,
    compiled: &mut CompiledQuery,
    ctx: &mut TranslationContext,
) -> Result<Bson> {
    let start = compile_required(term, 0, compiled, ctx)?;
    let end = compile_required(term, 1, compiled, ctx)?;
    Ok(bson!({
        "$and": [
            {"$gte": [prev.clone(), start]},
            {"$lt": [prev, end]},
        ]
    }))
}

fn time_of_day(
    prev: Bson,
    _term: &Term,
    _compiled: &mut CompiledQuery,
    _ctx: &mut TranslationContext,
) -> Result<Bson> {
    Ok(bson!({
        "$add": [
            {"$mul": [{"$hour": prev.clone()}, 3600]},
            {"$mul": [{"$minute": prev.clone()}, 60]},
            {"$second": prev},
        ]
    }))
}

// Shifts rewrite as multiply/divide by a power of two; the backend has no
// shift operators.
fn bit_lshift(
    prev: Bson,
    term: &Term,
    compiled: &mut CompiledQuery,
    ctx: &mut TranslationContext,
) -> Result<Bson> {
    let amount = compile_required(term, 0, compiled, ctx)?;
    Ok(bson!({"$multiply": [prev, {"$pow": [2, amount]}]}))
}

fn bit_rshift(
    prev: Bson,
    term: &Term,
    compiled: &mut CompiledQuery,
    ctx: &mut TranslationContext,
) -> Result<Bson> {
    let amount = compile_required(term, 0, compiled, ctx)?;
    Ok(bson!({"$divide": [prev, {"$pow": [2, amount]}]}))
}

/// Polymorphic count: array length or string length.
fn count_value(
    prev: Bson,
    _term: &Term,
    _compiled: &mut CompiledQuery,
    _ctx: &mut TranslationContext,
) -> Result<Bson> {
    Ok(bson!({
        "$cond": {
            "if": {"$isArray": prev.clone()},
            "then": {"$size": prev.clone()},
            "else": {"$strLenCP": prev},
        }
    }))
}

fn regex_match(
    prev: Bson,
    term: &Term,
    compiled: &mut CompiledQuery,
    ctx: &mut TranslationContext,
) -> Result<Bson> {
    let regex = compile_required(term, 0, compiled, ctx)?;
    Ok(bson!({"$regexMatch": {"input": prev, "regex": regex}}))
}

/// Array membership via a limited filter-and-size check.
fn includes(
    prev: Bson,
    term: &Term,
    compiled: &mut CompiledQuery,
    ctx: &mut TranslationContext,
) -> Result<Bson> {
    let needle = compile_required(term, 0, compiled, ctx)?;
    let tmp = ctx.temp_name();
    Ok(bson!({
        "$ne": [0, {
            "$size": {
                "$filter": {
                    "input": prev,
                    "as": tmp.as_str(),
                    "cond": {"$eq": [format!("$${tmp}"), needle]},
                    "limit": 1,
                }
            }
        }]
    }))
}

fn slice_range(
    prev: Bson,
    term: &Term,
    compiled: &mut CompiledQuery,
    ctx: &mut TranslationContext,
) -> Result<Bson> {
    let start = compile_required(term, 0, compiled, ctx)?;
    let end = match term.arg(1) {
        Some(arg) => compile_value(arg, compiled, ctx)?,
        None => bson!({"$size": prev.clone()}),
    };
    Ok(bson!({
        "$slice": [prev, start.clone(), {"$subtract": [end, start]}]
    }))
}

pub(crate) fn map_elements(
    prev: Bson,
    term: &Term,
    compiled: &mut CompiledQuery,
    ctx: &mut TranslationContext,
) -> Result<Bson> {
    let arg = term
        .arg(0)
        .ok_or_else(|| Error::MalformedQuery("`map` expects a lambda".into()))?;
    let tmp = ctx.temp_name();
    let body = compile_function(
        arg,
        compiled,
        ctx,
        false,
        &[Bson::String(format!("$${tmp}"))],
    )?;
    Ok(bson!({"$map": {"input": prev, "as": tmp.as_str(), "in": body}}))
}

pub(crate) fn filter_elements(
    prev: Bson,
    term: &Term,
    compiled: &mut CompiledQuery,
    ctx: &mut TranslationContext,
) -> Result<Bson> {
    let arg = term
        .arg(0)
        .ok_or_else(|| Error::MalformedQuery("`filter` expects a predicate lambda".into()))?;
    let tmp = ctx.temp_name();
    let cond = compile_function(
        arg,
        compiled,
        ctx,
        false,
        &[Bson::String(format!("$${tmp}"))],
    )?;
    Ok(bson!({"$filter": {"input": prev, "as": tmp.as_str(), "cond": cond}}))
}

fn is_empty(
    prev: Bson,
    _term: &Term,
    _compiled: &mut CompiledQuery,
    _ctx: &mut TranslationContext,
) -> Result<Bson> {
    Ok(bson!({"$eq": [0, {"$size": prev}]}))
}

pub(crate) fn fold_avg(
    prev: Bson,
    _term: &Term,
    _compiled: &mut CompiledQuery,
    _ctx: &mut TranslationContext,
) -> Result<Bson> {
    Ok(bson!({
        "$divide": [{"$sum": prev.clone()}, {"$size": prev}]
    }))
}

pub(crate) fn fold_min(
    prev: Bson,
    _term: &Term,
    _compiled: &mut CompiledQuery,
    _ctx: &mut TranslationContext,
) -> Result<Bson> {
    Ok(bson!({"$arrayElemAt": [{"$minN": {"n": 1, "input": prev}}, 0]}))
}

pub(crate) fn fold_max(
    prev: Bson,
    _term: &Term,
    _compiled: &mut CompiledQuery,
    _ctx: &mut TranslationContext,
) -> Result<Bson> {
    Ok(bson!({"$arrayElemAt": [{"$maxN": {"n": 1, "input": prev}}, 0]}))
}

fn merge_objects(
    prev: Bson,
    term: &Term,
    compiled: &mut CompiledQuery,
    ctx: &mut TranslationContext,
) -> Result<Bson> {
    let other = compile_required(term, 0, compiled, ctx)?;
    Ok(bson!({"$mergeObjects": [prev, other]}))
}

fn object_keys(
    prev: Bson,
    _term: &Term,
    _compiled: &mut CompiledQuery,
    _ctx: &mut TranslationContext,
) -> Result<Bson> {
    Ok(bson!({
        "$map": {
            "input": {"$objectToArray": prev},
            "as": "temporary_entries",
            "in": "$$temporary_entries.k",
        }
    }))
}

fn object_values(
    prev: Bson,
    _term: &Term,
    _compiled: &mut CompiledQuery,
    _ctx: &mut TranslationContext,
) -> Result<Bson> {
    Ok(bson!({
        "$map": {
            "input": {"$objectToArray": prev},
            "as": "temporary_entries",
            "in": "$$temporary_entries.v",
        }
    }))
}

fn compile_required(
    term: &Term,
    index: usize,
    compiled: &mut CompiledQuery,
    ctx: &mut TranslationContext,
) -> Result<Bson> {
    let arg = term.arg(index).ok_or_else(|| {
        Error::MalformedQuery(format!("`{}` is missing argument {index}", term.id))
    })?;
    compile_value(arg, compiled, ctx)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain(terms: Vec<Term>) -> (Bson, CompiledQuery, TranslationContext) {
        let mut compiled = CompiledQuery::new();
        let mut ctx = TranslationContext::new();
        ctx.args.insert(0, Bson::String("$$ROOT".into()));
        let mut prev = Bson::Null;
        for term in &terms {
            prev = compile_expression(prev, term, &mut compiled, &mut ctx).unwrap();
        }
        (prev, compiled, ctx)
    }

    #[test]
    fn test_dotted_path_concatenation() {
        let (value, _, _) = chain(vec![
            Term::op("arg").with_arg(Arg::value(0)),
            Term::op("index").with_arg(Arg::value("address")),
            Term::op("index").with_arg(Arg::value("city")),
        ]);
        assert_eq!(value, Bson::String("$$ROOT.address.city".into()));
    }

    #[test]
    fn test_dynamic_field_access() {
        // a computed key falls back to $getField
        let term = Term::op("index").with_arg(Arg::value(3));
        let mut compiled = CompiledQuery::new();
        let mut ctx = TranslationContext::new();
        let value =
            compile_expression(Bson::String("$$ROOT".into()), &term, &mut compiled, &mut ctx)
                .unwrap();
        assert_eq!(
            value,
            bson!({"$getField": {"field": 3, "input": "$$ROOT"}})
        );
    }

    #[test]
    fn test_comparison_operator_form() {
        let (value, _, _) = chain(vec![
            Term::op("arg").with_arg(Arg::value(0)),
            Term::op("index").with_arg(Arg::value("age")),
            Term::op("ge").with_arg(Arg::value(21)),
        ]);
        assert_eq!(value, bson!({"$gte": ["$$ROOT.age", 21]}));
    }

    #[test]
    fn test_zero_arg_operator_wraps_prev() {
        let (value, _, _) = chain(vec![
            Term::op("arg").with_arg(Arg::value(0)),
            Term::op("index").with_arg(Arg::value("flag")),
            Term::op("not"),
        ]);
        assert_eq!(value, bson!({"$not": "$$ROOT.flag"}));
    }

    #[test]
    fn test_bit_shift_rewrite() {
        let (value, _, _) = chain(vec![
            Term::op("arg").with_arg(Arg::value(0)),
            Term::op("index").with_arg(Arg::value("mask")),
            Term::op("bitLShift").with_arg(Arg::value(3)),
        ]);
        assert_eq!(
            value,
            bson!({"$multiply": ["$$ROOT.mask", {"$pow": [2, 3]}]})
        );
    }

    #[test]
    fn test_includes_uses_limited_filter() {
        let (value, _, _) = chain(vec![
            Term::op("arg").with_arg(Arg::value(0)),
            Term::op("index").with_arg(Arg::value("tags")),
            Term::op("includes").with_arg(Arg::value("vip")),
        ]);
        assert_eq!(
            value,
            bson!({
                "$ne": [0, {"$size": {"$filter": {
                    "input": "$$ROOT.tags",
                    "as": "temporary_0",
                    "cond": {"$eq": ["$$temporary_0", "vip"]},
                    "limit": 1,
                }}}]
            })
        );
    }

    #[test]
    fn test_plain_map_literal_is_opaque() {
        let mut compiled = CompiledQuery::new();
        let mut ctx = TranslationContext::new();
        let value = compile_value(
            &Arg::value(doc! {"status": "new"}),
            &mut compiled,
            &mut ctx,
        )
        .unwrap();
        assert_eq!(value, bson!({"$literal": {"status": "new"}}));

        // scalars pass through untouched
        let scalar = compile_value(&Arg::value(7), &mut compiled, &mut ctx).unwrap();
        assert_eq!(scalar, Bson::Int32(7));
    }

    #[test]
    fn test_unknown_expression_term_is_rejected() {
        let mut compiled = CompiledQuery::new();
        let mut ctx = TranslationContext::new();
        let err =
            compile_expression(Bson::Null, &Term::op("teleport"), &mut compiled, &mut ctx)
                .unwrap_err();
        assert!(matches!(err, Error::MalformedQuery(_)));
    }

    #[test]
    fn test_bindings_restored_after_lambda() {
        let mut compiled = CompiledQuery::new();
        let mut ctx = TranslationContext::new();
        ctx.args.insert(0, Bson::String("$$ROOT".into()));

        let lambda = Arg::func(
            vec![0],
            Arg::query(vec![
                Term::op("arg").with_arg(Arg::value(0)),
                Term::op("index").with_arg(Arg::value("n")),
            ]),
        );
        let body = compile_function(
            &lambda,
            &mut compiled,
            &mut ctx,
            false,
            &[Bson::String("$$item".into())],
        )
        .unwrap();
        assert_eq!(body, Bson::String("$$item.n".into()));

        // the outer binding for parameter 0 is back in place
        assert_eq!(ctx.args.get(&0), Some(&Bson::String("$$ROOT".into())));
    }

    #[test]
    fn test_bindings_restored_on_error() {
        let mut compiled = CompiledQuery::new();
        let mut ctx = TranslationContext::new();
        ctx.args.insert(0, Bson::String("$$ROOT".into()));

        let lambda = Arg::func(
            vec![0],
            Arg::query(vec![
                Term::op("arg").with_arg(Arg::value(0)),
                Term::op("no-such-op"),
            ]),
        );
        let result = compile_function(
            &lambda,
            &mut compiled,
            &mut ctx,
            false,
            &[Bson::String("$$item".into())],
        );
        assert!(result.is_err());
        assert_eq!(ctx.args.get(&0), Some(&Bson::String("$$ROOT".into())));
    }

    #[test]
    fn test_var_allocates_slot() {
        let mut compiled = CompiledQuery::new();
        let mut ctx = TranslationContext::new();
        let value = compile_value(&Arg::var("cutoff"), &mut compiled, &mut ctx).unwrap();
        assert_eq!(value, bson!({"$literal": Bson::Null}));
        assert_eq!(ctx.vars.len(), 1);
        assert_eq!(ctx.vars[0].name, "cutoff");
        assert_eq!(ctx.vars[0].value, None);
    }
}
