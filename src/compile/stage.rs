//! Top-level stage compilation.
//!
//! One handler per term id, each mutating the [`CompiledQuery`] in place:
//! appending pipeline stages, switching the dispatch mode, or capturing
//! mode-specific arguments. Stages whose arguments are expressions or nested
//! queries consult [`expr`]/[`accum`]; join stages delegate to [`join`].

use bson::{bson, doc, Bson, Document};

use super::expr::{self, compile_value};
use super::join;
use super::{accum, compile_query, ensure_projection, root_path};
use super::{CompiledQuery, Mode, TranslationContext};
use crate::error::{Error, Result};
use crate::reql::term::bson_i64;
use crate::reql::{Arg, JoinType, Term};

/// Compile one top-level term into the query under construction.
pub fn compile_stage(
    term: &Term,
    compiled: &mut CompiledQuery,
    ctx: &mut TranslationContext,
) -> Result<()> {
    match term.id.as_str() {
        "db" => {
            compiled.database = Some(require_str(term, 0)?.to_string());
        }
        "table" => {
            compiled.collection = Some(require_str(term, 0)?.to_string());
        }

        "index" => {
            let field = require_str(term, 0)?;
            let path = root_path(compiled, &[field]);
            compiled.pipeline.push(doc! {"$project": {"__singleval": path}});
            compiled.single_value = true;
        }
        "default" => {
            let fallback = compile_required(term, 1, compiled, ctx)?;
            let current = root_path(compiled, &[]);
            compiled.pipeline.push(doc! {
                "$project": {"__singleval": {"$ifNull": [current, fallback]}}
            });
            compiled.single_value = true;
        }

        "append" => {
            let values = compile_all(&term.args, compiled, ctx)?;
            compiled.pipeline.push(doc! {
                "$project": {"__singleval": {"$concatArrays": ["$__singleval", values]}}
            });
        }
        "prepend" => {
            let values = compile_all(&term.args, compiled, ctx)?;
            compiled.pipeline.push(doc! {
                "$project": {"__singleval": {"$concatArrays": [values, "$__singleval"]}}
            });
        }

        // emitted by value proxies in the builder; carries no stage
        "value" => {}

        "map" | "do" => {
            let root = Bson::String(root_path(compiled, &[]));
            let body = expr::compile_function(require_arg(term, 0)?, compiled, ctx, false, &[root])?;
            let projection = ensure_projection(body);
            let collapses = projection.contains_key("__singleval");
            compiled.pipeline.push(doc! {"$project": projection});
            if collapses {
                compiled.single_value = true;
            }
        }
        "filter" => {
            let root = Bson::String(root_path(compiled, &[]));
            let predicate =
                expr::compile_function(require_arg(term, 0)?, compiled, ctx, true, &[root])?;
            compiled.pipeline.push(doc! {"$match": predicate});
        }
        "orderBy" => {
            let field = require_str(term, 0)?;
            let direction = if term.str_arg(1) == Some("desc") { -1 } else { 1 };
            let mut sort = Document::new();
            sort.insert(field, direction);
            compiled.pipeline.push(doc! {"$sort": sort});
        }

        "group" => {
            let key_term = Term {
                id: "index".into(),
                args: vec![require_arg(term, 0)?.clone()],
            };
            let root = Bson::String(root_path(compiled, &[]));
            let key = expr::compile_expression(root, &key_term, compiled, ctx)?;
            compiled.pipeline.push(doc! {
                "$group": {"_id": key, "stream": {"$push": "$$ROOT"}}
            });
            let reduced = accum::compile_accum_function(
                require_arg(term, 1)?,
                compiled,
                ctx,
                0,
                &[Bson::String("$stream".into()), Bson::String("$_id".into())],
            )?;
            let projection = ensure_projection(reduced);
            let collapses = projection.contains_key("__singleval");
            compiled.pipeline.push(doc! {"$project": projection});
            if collapses {
                compiled.single_value = true;
            }
        }

        "count" => {
            compiled
                .pipeline
                .push(doc! {"$group": {"_id": 1, "__singleval": {"$count": {}}}});
            compiled.single_value = true;
            compiled.is_datum = true;
        }
        "sum" => {
            let field = field_or_singleval(term);
            compiled.pipeline.push(doc! {
                "$group": {"_id": 1, "__singleval": {"$sum": format!("${field}")}}
            });
            compiled.single_value = true;
            compiled.is_datum = true;
        }
        "avg" => {
            let field = field_or_singleval(term);
            compiled.pipeline.push(doc! {
                "$group": {"_id": 1, "__singleval": {"$avg": format!("${field}")}}
            });
            compiled.single_value = true;
            compiled.is_datum = true;
        }
        "min" => {
            extremum(term, compiled, 1);
        }
        "max" => {
            extremum(term, compiled, -1);
        }
        "distinct" => {
            let field = field_or_singleval(term);
            compiled.pipeline.push(doc! {
                "$group": {"_id": 1, "__singleval": {"$addToSet": format!("${field}")}}
            });
            compiled
                .pipeline
                .push(doc! {"$unwind": {"path": "$__singleval"}});
            compiled.single_value = true;
        }

        "pluck" => {
            let projection = multifield(&term.args, &mut |_path, keep| {
                Some(Bson::Int32(if keep { 1 } else { 0 }))
            })?;
            let stage = if compiled.single_value {
                doc! {"__singleval": projection}
            } else {
                projection
            };
            compiled.pipeline.push(doc! {"$project": stage});
        }

        "slice" => {
            if let Some(arg) = term.arg(0) {
                if !is_zero_literal(arg) {
                    let skip = compile_value(arg, compiled, ctx)?;
                    compiled.pipeline.push(doc! {"$skip": skip});
                }
            }
            if let Some(arg) = term.arg(1) {
                let limit = compile_value(arg, compiled, ctx)?;
                compiled.pipeline.push(doc! {"$limit": limit});
            }
        }
        "nth" => {
            compiled.is_datum = true;
            if let Some(arg) = term.arg(0) {
                if !is_zero_literal(arg) {
                    let skip = compile_value(arg, compiled, ctx)?;
                    compiled.pipeline.push(doc! {"$skip": skip});
                }
            }
            compiled.pipeline.push(doc! {"$limit": 1});
        }

        "insert" => {
            compiled.mode = Mode::Insert;
            compiled.args = compile_all(&term.args, compiled, ctx)?;
        }
        "update" => {
            let mut patch = CompiledQuery::new();
            patch.is_datum = true;
            let set_data = expr::compile_function(
                require_arg(term, 0)?,
                &mut patch,
                ctx,
                false,
                &[Bson::String("$$ROOT".into())],
            )?;
            let set_data = extract_id_predicate(set_data, compiled);
            patch.pipeline.push(doc! {"$set": set_data});
            finish_write(term, compiled, ctx, patch)?;
        }
        "replace" => {
            let mut patch = CompiledQuery::new();
            patch.is_datum = true;
            let new_root = expr::compile_function(
                require_arg(term, 0)?,
                &mut patch,
                ctx,
                false,
                &[Bson::String("$$ROOT".into())],
            )?;
            patch
                .pipeline
                .push(doc! {"$replaceRoot": {"newRoot": new_root}});
            finish_write(term, compiled, ctx, patch)?;
        }
        "delete" => {
            compiled.mode = Mode::Delete;
        }

        "get" => {
            let arg = require_arg(term, 0)?;
            if let Some(value) = arg.as_literal() {
                let key = coerce_object_id(value);
                compiled.pipeline.push(doc! {"$match": {"_id": key}});
            } else {
                let key = compile_value(arg, compiled, ctx)?;
                compiled
                    .pipeline
                    .push(doc! {"$match": {"$expr": {"$eq": ["$_id", key]}}});
            }
            compiled.is_datum = true;
        }
        "getAll" => {
            let field = match term.arg(0) {
                Some(arg) if !is_falsy_literal(arg) => {
                    let field_term = Term {
                        id: "index".into(),
                        args: vec![arg.clone()],
                    };
                    expr::compile_expression(
                        Bson::String("$$ROOT".into()),
                        &field_term,
                        compiled,
                        ctx,
                    )?
                }
                _ => Bson::String("$_id".into()),
            };
            let value = compile_required(term, 1, compiled, ctx)?;
            compiled
                .pipeline
                .push(doc! {"$match": {"$expr": {"$eq": [field, value]}}});
        }
        "between" => {
            let field_term = Term {
                id: "index".into(),
                args: vec![require_arg(term, 0)?.clone()],
            };
            let field =
                expr::compile_expression(Bson::String("$$ROOT".into()), &field_term, compiled, ctx)?;
            let left = compile_required(term, 1, compiled, ctx)?;
            let right = compile_required(term, 2, compiled, ctx)?;
            compiled.pipeline.push(doc! {
                "$match": {"$expr": {"$and": [
                    {"$gte": [field.clone(), left]},
                    {"$lt": [field, right]},
                ]}}
            });
        }

        "join" => {
            compile_join(term, compiled, ctx)?;
        }
        "lookup" => {
            compile_lookup(term, compiled, ctx)?;
        }
        "union" => {
            let sub_terms = require_query(term, 0)?;
            let sub = compile_query(sub_terms, ctx)?;
            let coll = sub.collection.ok_or_else(|| {
                Error::MissingTarget("union sub-query selects no table".into())
            })?;
            compiled.pipeline.push(doc! {
                "$unionWith": {"coll": coll, "pipeline": sub.pipeline}
            });
        }

        "indexCreate" => {
            compiled.mode = Mode::IndexCreate;
            compiled.args = literal_args(term)?;
        }
        "indexDrop" => {
            compiled.mode = Mode::IndexDrop;
            compiled.args = vec![require_literal(term, 0)?.clone()];
        }
        "indexList" => {
            compiled.mode = Mode::IndexList;
            compiled.args = compile_all(&term.args, compiled, ctx)?;
        }
        "tableCreate" => {
            compiled.mode = Mode::TableCreate;
            compiled.args = vec![require_literal(term, 0)?.clone()];
        }
        "tableDrop" => {
            compiled.mode = Mode::TableDrop;
            compiled.args = vec![require_literal(term, 0)?.clone()];
        }
        "tableList" => {
            compiled.mode = Mode::TableList;
            compiled.args = compile_all(&term.args, compiled, ctx)?;
        }
        "dbCreate" => {
            compiled.mode = Mode::DbCreate;
            compiled.args = vec![require_literal(term, 0)?.clone()];
        }
        "dbDrop" => {
            compiled.mode = Mode::DbDrop;
            compiled.args = vec![require_literal(term, 0)?.clone()];
        }
        "dbList" => {
            compiled.mode = Mode::DbList;
            compiled.args = compile_all(&term.args, compiled, ctx)?;
        }

        "expr" => {
            let value = require_literal(term, 0)?;
            compiled.pipeline.push(doc! {
                "$documents": [{"__singleval": {"$literal": value.clone()}}]
            });
            compiled.single_value = true;
            compiled.is_datum = true;
        }

        other => {
            return Err(Error::Unsupported(format!("unknown term `{other}`")));
        }
    }
    Ok(())
}

fn compile_join(
    term: &Term,
    compiled: &mut CompiledQuery,
    ctx: &mut TranslationContext,
) -> Result<()> {
    let right = compile_query(require_query(term, 0)?, ctx)?;

    let code = require_literal(term, 1)
        .ok()
        .and_then(bson_i64)
        .ok_or_else(|| Error::MalformedQuery("join expects a numeric join type".into()))?;
    let join_type = JoinType::from_code(code)
        .ok_or_else(|| Error::Unsupported(format!("join type {code}")))?;

    let (root_field, joined_field) = match join_type {
        JoinType::Cross => join::join_cross(compiled, &right, ctx)?,
        JoinType::Inner => join::join_inner(compiled, &right, require_arg(term, 3)?, ctx)?,
        JoinType::Left => join::join_left(compiled, &right, require_arg(term, 3)?, ctx)?,
        JoinType::LeftExcl => {
            join::join_left_excl(compiled, &right, require_arg(term, 3)?, ctx)?
        }
    };

    let merged = expr::compile_function(
        require_arg(term, 2)?,
        compiled,
        ctx,
        false,
        &[
            Bson::String(root_field),
            Bson::String(format!("${joined_field}")),
        ],
    )?;
    let projection = ensure_projection(merged);
    let collapses = projection.contains_key("__singleval");
    compiled.pipeline.push(doc! {"$project": projection});
    if collapses {
        compiled.single_value = true;
    }

    // strip the raw joined array from the final shape
    let mut remove = Document::new();
    remove.insert(joined_field.as_str(), 0);
    if compiled.single_value {
        let mut wrapped = Document::new();
        wrapped.insert("__singleval", remove);
        remove = wrapped;
    }
    compiled.pipeline.push(doc! {"$project": remove});
    Ok(())
}

/// Direct lookup-by-local/foreign-field shortcut. The replacement projection
/// resolves one-to-many vs one-to-one depending on whether the local field
/// is itself an array.
fn compile_lookup(
    term: &Term,
    compiled: &mut CompiledQuery,
    ctx: &mut TranslationContext,
) -> Result<()> {
    let sub = compile_query(require_query(term, 0)?, ctx)?;
    if compiled.database != sub.database {
        return Err(Error::MalformedQuery(
            "lookup sub-query must target the same database".into(),
        ));
    }
    let from = sub
        .collection
        .ok_or_else(|| Error::MissingTarget("lookup sub-query selects no table".into()))?;
    let local = require_str(term, 1)?;
    let foreign = require_str(term, 2)?;
    let tmp = ctx.temp_name();

    compiled.pipeline.push(doc! {
        "$lookup": {
            "from": from,
            "localField": local,
            "foreignField": foreign,
            "as": tmp.as_str(),
            "pipeline": sub.pipeline,
        }
    });
    let mut projection = Document::new();
    projection.insert(
        local,
        bson!({
            "$cond": {
                "if": {"$isArray": format!("${local}")},
                "then": format!("${tmp}"),
                "else": {"$arrayElemAt": [format!("${tmp}"), 0]},
            }
        }),
    );
    compiled.pipeline.push(doc! {"$project": projection});
    Ok(())
}

/// min/max compile to sort + limit 1 plus a single-value re-projection so the
/// document shape matches the `single_value` flag.
fn extremum(term: &Term, compiled: &mut CompiledQuery, direction: i32) {
    let field = field_or_singleval(term);
    let mut sort = Document::new();
    sort.insert(field.as_str(), direction);
    compiled.pipeline.push(doc! {"$sort": sort});
    compiled.pipeline.push(doc! {"$limit": 1});
    compiled
        .pipeline
        .push(doc! {"$project": {"__singleval": format!("${field}")}});
    compiled.single_value = true;
    compiled.is_datum = true;
}

/// A patch with an `_id` key turns it into a match predicate on the outer
/// query instead of part of the write payload.
fn extract_id_predicate(set_data: Bson, compiled: &mut CompiledQuery) -> Bson {
    match set_data {
        Bson::Document(mut doc) if !doc.contains_key("$literal") => {
            if let Some(id) = doc.remove("_id") {
                if compiled.pipeline.is_empty() {
                    compiled.pipeline.push(doc! {"$match": {"_id": id}});
                }
            }
            Bson::Document(doc)
        }
        other => other,
    }
}

fn finish_write(
    term: &Term,
    compiled: &mut CompiledQuery,
    ctx: &mut TranslationContext,
    patch: CompiledQuery,
) -> Result<()> {
    compiled.mode = Mode::Replace;
    if let Some(options) = term.arg(1) {
        let value = compile_value(options, compiled, ctx)?;
        compiled.args.push(value);
    }
    compiled.patch = Some(Box::new(patch));
    Ok(())
}

/// 24-hex-character strings are coerced to the backend's native object
/// identifier before matching.
fn coerce_object_id(value: &Bson) -> Bson {
    if let Bson::String(text) = value {
        if text.len() == 24 && text.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
            if let Ok(oid) = bson::oid::ObjectId::parse_str(text) {
                return Bson::ObjectId(oid);
            }
        }
    }
    value.clone()
}

/// Multifield projection: each selector is a plain field name, an array of
/// sibling names, or a nested selector object. The callback decides the
/// projection value for every terminal leaf, keyed by its dotted path;
/// returning `None` drops the leaf.
pub(crate) fn multifield(
    args: &[Arg],
    callback: &mut dyn FnMut(&str, bool) -> Option<Bson>,
) -> Result<Document> {
    let mut projection = Document::new();
    for arg in args {
        let value = arg.as_literal().ok_or_else(|| {
            Error::MalformedQuery("field selector must be a literal".into())
        })?;
        match value {
            Bson::String(name) => {
                if let Some(entry) = callback(name, true) {
                    projection.insert(name.as_str(), entry);
                }
            }
            Bson::Array(names) => {
                for name in names {
                    let name = name.as_str().ok_or_else(|| {
                        Error::MalformedQuery("field selector group must hold strings".into())
                    })?;
                    if let Some(entry) = callback(name, true) {
                        projection.insert(name, entry);
                    }
                }
            }
            Bson::Document(selector) => {
                let nested = multifield_recurse(selector, &mut Vec::new(), callback)?;
                for (key, entry) in nested {
                    projection.insert(key, entry);
                }
            }
            other => {
                return Err(Error::MalformedQuery(format!(
                    "unsupported field selector: {other}"
                )));
            }
        }
    }
    Ok(projection)
}

fn multifield_recurse(
    selector: &Document,
    path: &mut Vec<String>,
    callback: &mut dyn FnMut(&str, bool) -> Option<Bson>,
) -> Result<Document> {
    let mut result = Document::new();
    for (key, value) in selector {
        path.push(key.clone());
        match value {
            Bson::Boolean(flag) => {
                if let Some(entry) = callback(&path.join("."), *flag) {
                    result.insert(key.as_str(), entry);
                }
            }
            Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) => {
                let keep = bson_i64(value) != Some(0);
                if let Some(entry) = callback(&path.join("."), keep) {
                    result.insert(key.as_str(), entry);
                }
            }
            Bson::Array(names) => {
                let mut group = Document::new();
                for name in names {
                    let name = name.as_str().ok_or_else(|| {
                        Error::MalformedQuery("field selector group must hold strings".into())
                    })?;
                    path.push(name.to_string());
                    if let Some(entry) = callback(&path.join("."), true) {
                        group.insert(name, entry);
                    }
                    path.pop();
                }
                result.insert(key.as_str(), group);
            }
            Bson::Document(nested) => {
                let entry = multifield_recurse(nested, path, callback)?;
                result.insert(key.as_str(), entry);
            }
            other => {
                path.pop();
                return Err(Error::MalformedQuery(format!(
                    "unsupported field selector leaf: {other}"
                )));
            }
        }
        path.pop();
    }
    Ok(result)
}

// ---- small helpers ---------------------------------------------------------

fn compile_all(
    args: &[Arg],
    compiled: &mut CompiledQuery,
    ctx: &mut TranslationContext,
) -> Result<Vec<Bson>> {
    let mut values = Vec::with_capacity(args.len());
    for arg in args {
        values.push(compile_value(arg, compiled, ctx)?);
    }
    Ok(values)
}

fn compile_required(
    term: &Term,
    index: usize,
    compiled: &mut CompiledQuery,
    ctx: &mut TranslationContext,
) -> Result<Bson> {
    compile_value(require_arg(term, index)?, compiled, ctx)
}

fn require_arg(term: &Term, index: usize) -> Result<&Arg> {
    term.arg(index).ok_or_else(|| {
        Error::MalformedQuery(format!("`{}` is missing argument {index}", term.id))
    })
}

fn require_literal(term: &Term, index: usize) -> Result<&Bson> {
    term.literal(index).ok_or_else(|| {
        Error::MalformedQuery(format!("`{}` expects a literal argument {index}", term.id))
    })
}

fn require_str(term: &Term, index: usize) -> Result<&str> {
    term.str_arg(index).ok_or_else(|| {
        Error::MalformedQuery(format!("`{}` expects a string argument {index}", term.id))
    })
}

fn require_query(term: &Term, index: usize) -> Result<&[Term]> {
    require_arg(term, index)?.as_query().ok_or_else(|| {
        Error::MalformedQuery(format!("`{}` expects a sub-query argument {index}", term.id))
    })
}

fn literal_args(term: &Term) -> Result<Vec<Bson>> {
    term.args
        .iter()
        .map(|arg| {
            arg.as_literal().cloned().ok_or_else(|| {
                Error::MalformedQuery(format!("`{}` expects literal arguments", term.id))
            })
        })
        .collect()
}

fn field_or_singleval(term: &Term) -> String {
    term.str_arg(0).unwrap_or("__singleval").to_string()
}

fn is_zero_literal(arg: &Arg) -> bool {
    arg.as_literal().and_then(bson_i64) == Some(0)
}

/// True for literals that do not select an index: null, false, zero, the
/// empty string. `getAll` falls back to the primary key for these.
fn is_falsy_literal(arg: &Arg) -> bool {
    match arg.as_literal() {
        Some(Bson::Null) => true,
        Some(Bson::Boolean(flag)) => !*flag,
        Some(Bson::Int32(n)) => *n == 0,
        Some(Bson::Int64(n)) => *n == 0,
        Some(Bson::Double(n)) => *n == 0.0 || n.is_nan(),
        Some(Bson::String(name)) => name.is_empty(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_multifield_flat_and_grouped() {
        let projection = multifield(
            &[
                Arg::value("name"),
                Arg::value(vec![Bson::from("age"), Bson::from("email")]),
            ],
            &mut |_, keep| Some(Bson::Int32(if keep { 1 } else { 0 })),
        )
        .unwrap();
        assert_eq!(projection, doc! {"name": 1, "age": 1, "email": 1});
    }

    #[test]
    fn test_multifield_nested_selector() {
        let mut seen = Vec::new();
        let projection = multifield(
            &[Arg::value(doc! {"address": {"city": true, "geo": ["lat", "lng"]}})],
            &mut |path, keep| {
                seen.push(path.to_string());
                Some(Bson::Int32(if keep { 1 } else { 0 }))
            },
        )
        .unwrap();
        assert_eq!(
            projection,
            doc! {"address": {"city": 1, "geo": {"lat": 1, "lng": 1}}}
        );
        assert_eq!(
            seen,
            vec!["address.city", "address.geo.lat", "address.geo.lng"]
        );
    }

    #[test]
    fn test_multifield_rejects_non_literal() {
        let err = multifield(&[Arg::var("x")], &mut |_, _| Some(Bson::Int32(1))).unwrap_err();
        assert!(matches!(err, Error::MalformedQuery(_)));
    }

    #[test]
    fn test_object_id_coercion_boundary() {
        let coerced = coerce_object_id(&Bson::String("507f1f77bcf86cd799439011".into()));
        assert!(matches!(coerced, Bson::ObjectId(_)));

        // wrong length or non-hex stays a plain string
        let kept = coerce_object_id(&Bson::String("user-42".into()));
        assert_eq!(kept, Bson::String("user-42".into()));
        let kept = coerce_object_id(&Bson::String("507F1F77BCF86CD799439011".into()));
        assert_eq!(kept, Bson::String("507F1F77BCF86CD799439011".into()));
    }
}
