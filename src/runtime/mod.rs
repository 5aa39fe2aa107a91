//! Query execution: mode dispatch and cursor management.
//!
//! [`QueryRuntime`] owns the store handle, the primary-key policy, and the
//! table of open cursors. Each dispatcher call compiles the term sequence,
//! then issues exactly one backend call for its mode. Cursor reads pull one
//! row at a time; pulls for a given id must be serialized by the caller.

use bson::{doc, Bson, Document};
use dashmap::DashMap;
use futures::TryStreamExt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::backend::{
    CollectionHandle, DatabaseHandle, DocumentStore, DocumentStream, IdProvider, MongoOptions,
    MongoStore,
};
use crate::compile::{compile_query, CompiledQuery, Mode, TranslationContext};
use crate::error::{Error, Result};
use crate::reql::Term;

/// One incremental cursor pull: `done` marks exhaustion, `value` carries the
/// row otherwise.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct CursorItem {
    pub done: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Bson>,
}

struct CursorEntry {
    single_value: bool,
    stream: Mutex<DocumentStream>,
}

/// Executes compiled queries against a [`DocumentStore`].
pub struct QueryRuntime {
    store: Arc<dyn DocumentStore>,
    id_provider: IdProvider,
    cursors: DashMap<u64, Arc<CursorEntry>>,
}

impl QueryRuntime {
    pub fn new(store: Arc<dyn DocumentStore>, id_provider: IdProvider) -> Self {
        Self {
            store,
            id_provider,
            cursors: DashMap::new(),
        }
    }

    /// Connect to MongoDB and build a runtime from the same options.
    pub async fn connect(options: &MongoOptions) -> Result<Self> {
        let store = MongoStore::connect(options).await?;
        Ok(Self::new(Arc::new(store), options.id_provider))
    }

    /// Compile and execute a term sequence, returning its result value.
    pub async fn run_query(&self, terms: &[Term]) -> Result<Bson> {
        let mut ctx = TranslationContext::new();
        let compiled = compile_query(terms, &mut ctx)?;
        debug!(
            mode = ?compiled.mode,
            database = compiled.database.as_deref().unwrap_or(""),
            collection = compiled.collection.as_deref().unwrap_or(""),
            stages = compiled.pipeline.len(),
            "dispatching query"
        );
        match compiled.mode {
            Mode::Get => self.run_get(&compiled).await,
            Mode::Insert => self.run_insert(&compiled).await,
            Mode::Update | Mode::Replace => self.run_replace(&compiled).await,
            Mode::Delete => self.run_delete(&compiled).await,
            Mode::IndexCreate => self.run_index_create(&compiled).await,
            Mode::IndexDrop => self.run_index_drop(&compiled).await,
            Mode::IndexList => {
                let names = self.collection(&compiled)?.list_indexes().await?;
                Ok(Bson::Array(names.into_iter().map(Bson::String).collect()))
            }
            Mode::TableCreate => {
                let name = string_arg(&compiled, 0, "tableCreate")?;
                self.database(&compiled)?.create_collection(&name).await?;
                Ok(Bson::Document(doc! {"tables_created": 1}))
            }
            Mode::TableDrop => {
                let name = string_arg(&compiled, 0, "tableDrop")?;
                self.database(&compiled)?
                    .collection(&name)
                    .drop_collection()
                    .await?;
                Ok(Bson::Document(doc! {"tables_dropped": 1}))
            }
            Mode::TableList => {
                let names = self.database(&compiled)?.list_collections().await?;
                Ok(Bson::Array(names.into_iter().map(Bson::String).collect()))
            }
            Mode::DbCreate => {
                // databases come into being on first write; nothing to do
                Ok(Bson::Null)
            }
            Mode::DbDrop => {
                let name = string_arg(&compiled, 0, "dbDrop")?;
                self.store.database(&name).drop_database().await?;
                Ok(Bson::Document(doc! {"dbs_dropped": 1}))
            }
            Mode::DbList => {
                let names = self.store.list_databases().await?;
                Ok(Bson::Array(names.into_iter().map(Bson::String).collect()))
            }
        }
    }

    /// Incrementally pull one row for the given request id, opening the
    /// cursor on the first call. Exhaustion removes the entry and returns
    /// `{done: true}`.
    pub async fn read_cursor(&self, id: u64, terms: &[Term]) -> Result<CursorItem> {
        let existing = self.cursors.get(&id).map(|entry| Arc::clone(entry.value()));
        let entry = match existing {
            Some(entry) => entry,
            None => {
                let mut ctx = TranslationContext::new();
                let compiled = compile_query(terms, &mut ctx)?;
                if compiled.mode != Mode::Get {
                    return Err(Error::Unsupported(
                        "cursors can only read; use run_query for writes".into(),
                    ));
                }
                debug!(id, stages = compiled.pipeline.len(), "opening cursor");
                let stream = self
                    .collection(&compiled)?
                    .aggregate(compiled.pipeline.clone())
                    .await?;
                let entry = Arc::new(CursorEntry {
                    single_value: compiled.single_value,
                    stream: Mutex::new(stream),
                });
                self.cursors.insert(id, Arc::clone(&entry));
                entry
            }
        };

        let mut stream = entry.stream.lock().await;
        match stream.try_next().await? {
            Some(row) => Ok(CursorItem {
                done: false,
                value: Some(unwrap_row(row, entry.single_value)),
            }),
            None => {
                drop(stream);
                self.cursors.remove(&id);
                Ok(CursorItem {
                    done: true,
                    value: None,
                })
            }
        }
    }

    /// Release the cursor for `id`, if one is open.
    pub fn close_cursor(&self, id: u64) {
        if self.cursors.remove(&id).is_some() {
            debug!(id, "cursor closed");
        }
    }

    async fn run_get(&self, compiled: &CompiledQuery) -> Result<Bson> {
        let mut stream = self
            .collection(compiled)?
            .aggregate(compiled.pipeline.clone())
            .await?;
        if compiled.is_datum {
            return Ok(match stream.try_next().await? {
                Some(row) => unwrap_row(row, compiled.single_value),
                None => Bson::Null,
            });
        }
        let mut rows = Vec::new();
        while let Some(row) = stream.try_next().await? {
            rows.push(unwrap_row(row, compiled.single_value));
        }
        Ok(Bson::Array(rows))
    }

    async fn run_insert(&self, compiled: &CompiledQuery) -> Result<Bson> {
        let mut documents = Vec::new();
        for value in &compiled.args {
            match value {
                // a single array argument is a bulk insert
                Bson::Array(items) => {
                    for item in items {
                        documents.push(insert_document(item)?);
                    }
                }
                other => documents.push(insert_document(other)?),
            }
        }

        let mut missing = Vec::new();
        for (position, document) in documents.iter_mut().enumerate() {
            if !document.contains_key("_id") {
                if self.id_provider == IdProvider::Uuid {
                    document.insert("_id", Uuid::new_v4().to_string());
                }
                missing.push(position);
            }
        }

        let keys = self
            .collection(compiled)?
            .insert_many(documents)
            .await?;
        let mut generated = Document::new();
        for position in missing {
            // a store acknowledging fewer keys than documents yields nulls
            let key = keys.get(position).cloned().unwrap_or(Bson::Null);
            generated.insert(position.to_string(), key);
        }
        Ok(Bson::Document(doc! {
            "inserted": keys.len() as i64,
            "generated_keys": generated,
        }))
    }

    async fn run_replace(&self, compiled: &CompiledQuery) -> Result<Bson> {
        let patch = compiled
            .patch
            .as_ref()
            .ok_or_else(|| Error::MalformedQuery("write carries no patch".into()))?;
        let filter = filter_from_pipeline(&compiled.pipeline)?;
        let counts = self
            .collection(compiled)?
            .update_many(filter, patch.pipeline.clone())
            .await?;
        Ok(Bson::Document(doc! {
            "replaced": counts.modified as i64,
            "unchanged": counts.matched.saturating_sub(counts.modified) as i64,
        }))
    }

    async fn run_delete(&self, compiled: &CompiledQuery) -> Result<Bson> {
        let filter = match compiled.pipeline.as_slice() {
            [] => Document::new(),
            [stage] => stage
                .get_document("$match")
                .map_err(|_| {
                    Error::Unsupported("delete supports only a plain match filter".into())
                })?
                .clone(),
            _ => {
                return Err(Error::Unsupported(
                    "delete after multiple pipeline stages".into(),
                ))
            }
        };
        let deleted = self.collection(compiled)?.delete_many(filter).await?;
        Ok(Bson::Document(doc! {"deleted": deleted as i64}))
    }

    async fn run_index_create(&self, compiled: &CompiledQuery) -> Result<Bson> {
        let name = string_arg(compiled, 0, "indexCreate")?;
        let keys = match compiled.args.get(1) {
            Some(Bson::Document(keys)) => keys.clone(),
            Some(other) => {
                return Err(Error::MalformedQuery(format!(
                    "indexCreate expects a key document, got {other}"
                )))
            }
            None => {
                let mut keys = Document::new();
                keys.insert(name.as_str(), 1);
                keys
            }
        };
        self.collection(compiled)?
            .create_index(keys, Some(name))
            .await?;
        Ok(Bson::Document(doc! {"created": 1}))
    }

    async fn run_index_drop(&self, compiled: &CompiledQuery) -> Result<Bson> {
        let name = string_arg(compiled, 0, "indexDrop")?;
        self.collection(compiled)?.drop_index(&name).await?;
        Ok(Bson::Document(doc! {"dropped": 1}))
    }

    fn database(&self, compiled: &CompiledQuery) -> Result<Box<dyn DatabaseHandle>> {
        let database = compiled
            .database
            .as_deref()
            .ok_or_else(|| Error::MissingTarget("no database selected".into()))?;
        Ok(self.store.database(database))
    }

    fn collection(&self, compiled: &CompiledQuery) -> Result<Box<dyn CollectionHandle>> {
        let collection = compiled
            .collection
            .as_deref()
            .ok_or_else(|| Error::MissingTarget("no table selected".into()))?;
        Ok(self.database(compiled)?.collection(collection))
    }
}

fn string_arg(compiled: &CompiledQuery, index: usize, op: &str) -> Result<String> {
    match compiled.args.get(index) {
        Some(Bson::String(name)) => Ok(name.clone()),
        _ => Err(Error::MalformedQuery(format!(
            "`{op}` expects a name argument"
        ))),
    }
}

/// Unwrap the `__singleval` carrier when the query collapsed to a scalar.
fn unwrap_row(row: Document, single_value: bool) -> Bson {
    if single_value {
        row.get("__singleval").cloned().unwrap_or(Bson::Null)
    } else {
        Bson::Document(row)
    }
}

/// Strip the literal wrapper the compiler puts around insert payloads.
fn insert_document(value: &Bson) -> Result<Document> {
    let document = match value {
        Bson::Document(doc) => match doc.get("$literal") {
            Some(Bson::Document(inner)) if doc.len() == 1 => inner.clone(),
            _ => doc.clone(),
        },
        other => {
            return Err(Error::MalformedQuery(format!(
                "insert expects documents, got {other}"
            )))
        }
    };
    Ok(document)
}

/// Rebuild a single filter from the match stages of an already-compiled
/// pipeline. Expression-form predicates are AND-ed together; plain match
/// bodies merge key-wise. Any other stage before a write is unsupported.
fn filter_from_pipeline(pipeline: &[Document]) -> Result<Document> {
    let mut filter = Document::new();
    let mut expressions = Vec::new();
    for stage in pipeline {
        let body = stage.get_document("$match").map_err(|_| {
            let op = stage.keys().next().map(String::as_str).unwrap_or("empty");
            Error::Unsupported(format!("`{op}` stage before a write"))
        })?;
        for (key, value) in body {
            if key == "$expr" {
                expressions.push(value.clone());
            } else {
                filter.insert(key.as_str(), value.clone());
            }
        }
    }
    match expressions.len() {
        0 => {}
        1 => {
            filter.insert("$expr", expressions.remove(0));
        }
        _ => {
            filter.insert("$expr", doc! {"$and": expressions});
        }
    }
    Ok(filter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::bson;

    #[test]
    fn test_filter_from_single_plain_match() {
        let filter =
            filter_from_pipeline(&[doc! {"$match": {"_id": "u1"}}]).unwrap();
        assert_eq!(filter, doc! {"_id": "u1"});
    }

    #[test]
    fn test_filter_ands_expression_matches() {
        let filter = filter_from_pipeline(&[
            doc! {"$match": {"$expr": {"$gt": ["$age", 21]}}},
            doc! {"$match": {"$expr": {"$eq": ["$active", true]}}},
        ])
        .unwrap();
        assert_eq!(
            filter,
            doc! {"$expr": {"$and": [
                {"$gt": ["$age", 21]},
                {"$eq": ["$active", true]},
            ]}}
        );
    }

    #[test]
    fn test_filter_rejects_non_match_stage() {
        let err = filter_from_pipeline(&[
            doc! {"$match": {"_id": 1}},
            doc! {"$sort": {"age": 1}},
        ])
        .unwrap_err();
        assert!(matches!(err, Error::Unsupported(_)));
    }

    #[test]
    fn test_insert_document_unwraps_literal() {
        let unwrapped =
            insert_document(&bson!({"$literal": {"name": "ada"}})).unwrap();
        assert_eq!(unwrapped, doc! {"name": "ada"});

        let plain = insert_document(&bson!({"name": "ada"})).unwrap();
        assert_eq!(plain, doc! {"name": "ada"});

        assert!(insert_document(&Bson::Int32(7)).is_err());
    }

    #[test]
    fn test_unwrap_row() {
        let row = doc! {"__singleval": 42};
        assert_eq!(unwrap_row(row.clone(), true), Bson::Int32(42));
        assert_eq!(unwrap_row(row.clone(), false), Bson::Document(row));
        assert_eq!(unwrap_row(doc! {}, true), Bson::Null);
    }

    /// Store whose insert acknowledges zero keys regardless of input size.
    struct LossyStore;
    struct LossyCollection;

    #[async_trait::async_trait]
    impl DocumentStore for LossyStore {
        fn database(&self, _name: &str) -> Box<dyn DatabaseHandle> {
            Box::new(LossyStore)
        }

        async fn list_databases(&self) -> Result<Vec<String>> {
            Ok(Vec::new())
        }
    }

    #[async_trait::async_trait]
    impl DatabaseHandle for LossyStore {
        fn collection(&self, _name: &str) -> Box<dyn CollectionHandle> {
            Box::new(LossyCollection)
        }

        async fn create_collection(&self, _name: &str) -> Result<()> {
            Ok(())
        }

        async fn list_collections(&self) -> Result<Vec<String>> {
            Ok(Vec::new())
        }

        async fn drop_database(&self) -> Result<()> {
            Ok(())
        }
    }

    #[async_trait::async_trait]
    impl CollectionHandle for LossyCollection {
        async fn aggregate(&self, _pipeline: Vec<Document>) -> Result<DocumentStream> {
            Ok(Box::pin(futures::stream::empty()))
        }

        async fn insert_many(&self, _documents: Vec<Document>) -> Result<Vec<Bson>> {
            Ok(Vec::new())
        }

        async fn update_many(
            &self,
            _filter: Document,
            _pipeline: Vec<Document>,
        ) -> Result<crate::backend::WriteCounts> {
            Ok(crate::backend::WriteCounts::default())
        }

        async fn delete_many(&self, _filter: Document) -> Result<u64> {
            Ok(0)
        }

        async fn create_index(&self, _keys: Document, name: Option<String>) -> Result<String> {
            Ok(name.unwrap_or_default())
        }

        async fn drop_index(&self, _name: &str) -> Result<()> {
            Ok(())
        }

        async fn list_indexes(&self) -> Result<Vec<String>> {
            Ok(Vec::new())
        }

        async fn drop_collection(&self) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_insert_tolerates_short_key_acknowledgement() {
        use crate::reql::Arg;

        let runtime = QueryRuntime::new(Arc::new(LossyStore), IdProvider::Uuid);
        let result = runtime
            .run_query(&[
                Term::op("db").with_arg(Arg::value("app")),
                Term::op("table").with_arg(Arg::value("users")),
                Term::op("insert")
                    .with_arg(Arg::object([("name".to_string(), Arg::value("ada"))])),
            ])
            .await
            .unwrap();
        let result = match result {
            Bson::Document(doc) => doc,
            other => panic!("expected a result document, got {other}"),
        };
        assert_eq!(result.get("inserted"), Some(&Bson::Int64(0)));
        assert_eq!(
            result.get_document("generated_keys").unwrap().get("0"),
            Some(&Bson::Null)
        );
    }
}
