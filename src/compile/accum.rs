//! Array-level expression compilation for group-reduction contexts.
//!
//! A parallel translator table used only when the expression chain operates
//! over the materialized array of grouped rows (the parameter recorded in
//! `TranslationContext::group_stream`) rather than a single document.
//! Operators here mean "over the whole array": `count` is the array size,
//! `sum`/`avg`/`min`/`max` fold it, `pluck` maps and projects each element,
//! `orderBy` sorts it in place.

use bson::{bson, Bson};

use super::expr::{self, Translator};
use super::stage::multifield;
use super::{CompiledQuery, TranslationContext};
use crate::error::{Error, Result};
use crate::reql::{Arg, Term};

fn translator(id: &str) -> Option<Translator> {
    use Translator::{Custom, Operator};
    Some(match id {
        "arg" => Custom(expr::arg_ref),
        "index" => Custom(expr::field_access),
        "default" => Operator("$ifNull"),

        "map" => Custom(expr::map_elements),
        "filter" => Custom(expr::filter_elements),
        "orderBy" => Custom(sort_array),

        "count" => Operator("$size"),
        "sum" => Operator("$sum"),
        "avg" => Custom(expr::fold_avg),
        "min" => Custom(expr::fold_min),
        "max" => Custom(expr::fold_max),
        "distinct" => Custom(dedupe),
        "pluck" => Custom(pluck_elements),

        "slice" => Operator("$slice"),
        "nth" => Operator("$arrayElemAt"),
        _ => return None,
    })
}

/// Translate one accumulation term against the accumulated `prev` value.
pub fn compile_accum_expression(
    prev: Bson,
    term: &Term,
    compiled: &mut CompiledQuery,
    ctx: &mut TranslationContext,
) -> Result<Bson> {
    match translator(&term.id) {
        Some(Translator::Operator(op)) => expr::apply_operator(op, prev, term, compiled, ctx),
        Some(Translator::Custom(custom)) => custom(prev, term, compiled, ctx),
        None => Err(Error::MalformedQuery(format!(
            "unknown accumulation term `{}`",
            term.id
        ))),
    }
}

/// Compile a group-reduction lambda. Binds positional parameters like
/// [`expr::compile_function`] and additionally records which parameter is
/// the grouped-rows array for the duration of the body.
pub fn compile_accum_function(
    arg: &Arg,
    compiled: &mut CompiledQuery,
    ctx: &mut TranslationContext,
    stream_index: usize,
    params: &[Bson],
) -> Result<Bson> {
    let Arg::Func {
        args: param_ids,
        value,
    } = arg
    else {
        return expr::compile_value(arg, compiled, ctx);
    };
    let saved_stream = ctx.group_stream;
    ctx.group_stream = param_ids.get(stream_index).copied();
    let result = expr::with_bindings(param_ids, params, ctx, |ctx| {
        expr::compile_value(value, compiled, ctx)
    });
    ctx.group_stream = saved_stream;
    result
}

fn sort_array(
    prev: Bson,
    term: &Term,
    _compiled: &mut CompiledQuery,
    _ctx: &mut TranslationContext,
) -> Result<Bson> {
    let field = term
        .str_arg(0)
        .ok_or_else(|| Error::MalformedQuery("`orderBy` expects a field name".into()))?;
    let direction = if term.str_arg(1) == Some("desc") { -1 } else { 1 };
    let mut sort_by = bson::Document::new();
    sort_by.insert(field, direction);
    Ok(bson!({"$sortArray": {"input": prev, "sortBy": sort_by}}))
}

fn dedupe(
    prev: Bson,
    _term: &Term,
    _compiled: &mut CompiledQuery,
    _ctx: &mut TranslationContext,
) -> Result<Bson> {
    Ok(bson!({"$setIntersection": [prev]}))
}

/// Per-element projection of the grouped rows: map each element to the
/// multifield selection.
fn pluck_elements(
    prev: Bson,
    term: &Term,
    _compiled: &mut CompiledQuery,
    ctx: &mut TranslationContext,
) -> Result<Bson> {
    let tmp = ctx.temp_name();
    let projection = multifield(&term.args, &mut |path, keep| {
        keep.then(|| Bson::String(format!("$${tmp}.{path}")))
    })?;
    Ok(bson!({"$map": {"input": prev, "as": tmp.as_str(), "in": projection}}))
}

#[cfg(test)]
mod tests {
    use super::*;


    fn accum_chain(terms: Vec<Term>) -> Bson {
        let mut compiled = CompiledQuery::new();
        let mut ctx = TranslationContext::new();
        ctx.args.insert(1, Bson::String("$stream".into()));
        let mut prev = Bson::Null;
        for term in &terms {
            prev = compile_accum_expression(prev, term, &mut compiled, &mut ctx).unwrap();
        }
        prev
    }

    #[test]
    fn test_count_is_array_size() {
        let value = accum_chain(vec![
            Term::op("arg").with_arg(Arg::value(1)),
            Term::op("count"),
        ]);
        assert_eq!(value, bson!({"$size": "$stream"}));
    }

    #[test]
    fn test_sum_over_plucked_field() {
        let value = accum_chain(vec![
            Term::op("arg").with_arg(Arg::value(1)),
            Term::op("index").with_arg(Arg::value("amount")),
            Term::op("sum"),
        ]);
        assert_eq!(value, bson!({"$sum": "$stream.amount"}));
    }

    #[test]
    fn test_order_by_sorts_array_in_place() {
        let value = accum_chain(vec![
            Term::op("arg").with_arg(Arg::value(1)),
            Term::op("orderBy")
                .with_arg(Arg::value("age"))
                .with_arg(Arg::value("desc")),
        ]);
        assert_eq!(
            value,
            bson!({"$sortArray": {"input": "$stream", "sortBy": {"age": -1}}})
        );
    }

    #[test]
    fn test_pluck_maps_each_element() {
        let value = accum_chain(vec![
            Term::op("arg").with_arg(Arg::value(1)),
            Term::op("pluck")
                .with_arg(Arg::value("name"))
                .with_arg(Arg::value("age")),
        ]);
        assert_eq!(
            value,
            bson!({"$map": {
                "input": "$stream",
                "as": "temporary_0",
                "in": {"name": "$$temporary_0.name", "age": "$$temporary_0.age"},
            }})
        );
    }

    #[test]
    fn test_accum_function_records_stream() {
        let mut compiled = CompiledQuery::new();
        let mut ctx = TranslationContext::new();

        let lambda = Arg::func(
            vec![1, 2],
            Arg::query(vec![
                Term::op("arg").with_arg(Arg::value(1)),
                Term::op("count"),
            ]),
        );
        let value = compile_accum_function(
            &lambda,
            &mut compiled,
            &mut ctx,
            0,
            &[Bson::String("$stream".into()), Bson::String("$_id".into())],
        )
        .unwrap();
        assert_eq!(value, bson!({"$size": "$stream"}));
        // stream routing is scoped to the lambda body
        assert_eq!(ctx.group_stream, None);
    }
}
