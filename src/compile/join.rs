//! Join synthesis.
//!
//! Four strategies over a compiled right-hand query, all expressed as
//! `$lookup` variants on the enclosing pipeline:
//!
//! - cross: uncorrelated lookup, unwound - a cartesian product
//! - inner: predicate pushed into the lookup pipeline, non-preserving unwind
//! - left: same correlated lookup, preserving unwind
//! - left-exclusive: correlated lookup kept as an array, then a zero-size
//!   match - the anti-join
//!
//! Each returns the pair `(left row path, joined field name)` the caller
//! feeds to the row-merge lambda.

use bson::{doc, Bson, Document};

use super::expr;
use super::{root_path, CompiledQuery, TranslationContext};
use crate::error::{Error, Result};
use crate::reql::Arg;

fn right_collection(right: &CompiledQuery) -> Result<&str> {
    right
        .collection
        .as_deref()
        .ok_or_else(|| Error::MissingTarget("join sub-query selects no table".into()))
}

/// Cartesian product: every left row paired with every right row.
pub fn join_cross(
    compiled: &mut CompiledQuery,
    right: &CompiledQuery,
    ctx: &mut TranslationContext,
) -> Result<(String, String)> {
    let from = right_collection(right)?;
    let joined = ctx.temp_name();
    compiled.pipeline.push(doc! {
        "$lookup": {
            "from": from,
            "pipeline": right.pipeline.clone(),
            "as": joined.as_str(),
        }
    });
    compiled.pipeline.push(doc! {
        "$unwind": {"path": format!("${joined}")}
    });
    Ok((root_path(compiled, &[]), joined))
}

/// Correlated lookup shared by the three predicate joins: capture the left
/// row under `let`, run the right pipeline, and match the predicate inside
/// the lookup with the pair `(left row, right row)` bound positionally.
fn correlated_lookup(
    compiled: &mut CompiledQuery,
    right: &CompiledQuery,
    predicate: &Arg,
    ctx: &mut TranslationContext,
    out_field: &str,
    capture: &str,
) -> Result<()> {
    let from = right_collection(right)?.to_string();
    let condition = expr::compile_function(
        predicate,
        compiled,
        ctx,
        true,
        &[
            Bson::String(format!("$${capture}")),
            Bson::String("$$ROOT".into()),
        ],
    )?;
    let mut pipeline = right.pipeline.clone();
    pipeline.push(doc! {"$match": condition});

    let mut let_doc = Document::new();
    let_doc.insert(capture, root_path(compiled, &[]));
    compiled.pipeline.push(doc! {
        "$lookup": {
            "from": from,
            "let": let_doc,
            "pipeline": pipeline,
            "as": out_field,
        }
    });
    Ok(())
}

/// Matched pairs only: unwinding without preservation drops left rows with
/// an empty match array.
pub fn join_inner(
    compiled: &mut CompiledQuery,
    right: &CompiledQuery,
    predicate: &Arg,
    ctx: &mut TranslationContext,
) -> Result<(String, String)> {
    let joined = ctx.temp_name();
    correlated_lookup(compiled, right, predicate, ctx, &joined, &joined)?;
    compiled.pipeline.push(doc! {
        "$unwind": {"path": format!("${joined}"), "preserveNullAndEmptyArrays": false}
    });
    Ok((root_path(compiled, &[]), joined))
}

/// One row per left document; the joined field is null when nothing matched.
pub fn join_left(
    compiled: &mut CompiledQuery,
    right: &CompiledQuery,
    predicate: &Arg,
    ctx: &mut TranslationContext,
) -> Result<(String, String)> {
    let capture = ctx.temp_name();
    let joined = ctx.temp_name();
    correlated_lookup(compiled, right, predicate, ctx, &joined, &capture)?;
    compiled.pipeline.push(doc! {
        "$unwind": {"path": format!("${joined}"), "preserveNullAndEmptyArrays": true}
    });
    Ok((root_path(compiled, &[]), joined))
}

/// Anti-join: keep only left rows whose match array came back empty.
pub fn join_left_excl(
    compiled: &mut CompiledQuery,
    right: &CompiledQuery,
    predicate: &Arg,
    ctx: &mut TranslationContext,
) -> Result<(String, String)> {
    let capture = ctx.temp_name();
    let joined = ctx.temp_name();
    correlated_lookup(compiled, right, predicate, ctx, &joined, &capture)?;
    compiled.pipeline.push(doc! {
        "$match": {"$expr": {"$eq": [{"$size": format!("${joined}")}, 0]}}
    });
    Ok((root_path(compiled, &[]), joined))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reql::Term;

    fn right_query(table: &str) -> CompiledQuery {
        let mut right = CompiledQuery::new();
        right.collection = Some(table.to_string());
        right
    }

    fn eq_predicate() -> Arg {
        // (left, right) -> left.city == right.city
        Arg::func(
            vec![0, 1],
            Arg::query(vec![
                Term::op("arg").with_arg(Arg::value(0)),
                Term::op("index").with_arg(Arg::value("city")),
                Term::op("eq").with_arg(Arg::query(vec![
                    Term::op("arg").with_arg(Arg::value(1)),
                    Term::op("index").with_arg(Arg::value("city")),
                ])),
            ]),
        )
    }

    #[test]
    fn test_cross_join_shape() {
        let mut compiled = CompiledQuery::new();
        let mut ctx = TranslationContext::new();
        let (root, joined) =
            join_cross(&mut compiled, &right_query("cities"), &mut ctx).unwrap();
        assert_eq!(root, "$$ROOT");
        assert_eq!(joined, "temporary_0");
        assert_eq!(
            compiled.pipeline,
            vec![
                doc! {"$lookup": {
                    "from": "cities",
                    "pipeline": [],
                    "as": "temporary_0",
                }},
                doc! {"$unwind": {"path": "$temporary_0"}},
            ]
        );
    }

    #[test]
    fn test_inner_join_pushes_predicate_into_lookup() {
        let mut compiled = CompiledQuery::new();
        let mut ctx = TranslationContext::new();
        let (_, joined) = join_inner(
            &mut compiled,
            &right_query("cities"),
            &eq_predicate(),
            &mut ctx,
        )
        .unwrap();
        assert_eq!(joined, "temporary_0");
        assert_eq!(
            compiled.pipeline,
            vec![
                doc! {"$lookup": {
                    "from": "cities",
                    "let": {"temporary_0": "$$ROOT"},
                    "pipeline": [{"$match": {"$expr": {
                        "$eq": ["$$temporary_0.city", "$$ROOT.city"]
                    }}}],
                    "as": "temporary_0",
                }},
                doc! {"$unwind": {
                    "path": "$temporary_0",
                    "preserveNullAndEmptyArrays": false,
                }},
            ]
        );
    }

    #[test]
    fn test_left_join_preserves_unmatched_rows() {
        let mut compiled = CompiledQuery::new();
        let mut ctx = TranslationContext::new();
        let (_, joined) = join_left(
            &mut compiled,
            &right_query("cities"),
            &eq_predicate(),
            &mut ctx,
        )
        .unwrap();
        // the capture variable and the output field are distinct names
        assert_eq!(joined, "temporary_1");
        let unwind = compiled.pipeline.last().unwrap();
        assert_eq!(
            unwind,
            &doc! {"$unwind": {
                "path": "$temporary_1",
                "preserveNullAndEmptyArrays": true,
            }}
        );
    }

    #[test]
    fn test_left_exclusive_join_keeps_empty_matches() {
        let mut compiled = CompiledQuery::new();
        let mut ctx = TranslationContext::new();
        let (_, joined) = join_left_excl(
            &mut compiled,
            &right_query("cities"),
            &eq_predicate(),
            &mut ctx,
        )
        .unwrap();
        assert_eq!(joined, "temporary_1");
        let check = compiled.pipeline.last().unwrap();
        assert_eq!(
            check,
            &doc! {"$match": {"$expr": {"$eq": [{"$size": "$temporary_1"}, 0]}}}
        );
    }

    #[test]
    fn test_join_requires_right_table() {
        let mut compiled = CompiledQuery::new();
        let mut ctx = TranslationContext::new();
        let err = join_cross(&mut compiled, &CompiledQuery::new(), &mut ctx).unwrap_err();
        assert!(matches!(err, Error::MissingTarget(_)));
    }
}
