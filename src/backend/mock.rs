//! In-memory store for tests.
//!
//! Collections are plain row vectors; `aggregate` ignores the pipeline and
//! streams the seeded rows back, so tests seed the shape the pipeline would
//! produce and assert on the recorded calls instead. Every store operation
//! is recorded in arrival order.
//!
//! This means data-level outcomes that depend on the server evaluating the
//! pipeline (join cardinalities, accumulator arithmetic, sort order) are out
//! of reach here; exercising those requires a live server.

use async_trait::async_trait;
use bson::{Bson, Document};
use dashmap::DashMap;
use futures::stream;
use std::sync::{Arc, Mutex};

use super::{CollectionHandle, DatabaseHandle, DocumentStore, DocumentStream, WriteCounts};
use crate::error::Result;

/// One recorded store operation.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCall {
    Aggregate {
        database: String,
        collection: String,
        pipeline: Vec<Document>,
    },
    Insert {
        database: String,
        collection: String,
        documents: Vec<Document>,
    },
    Update {
        database: String,
        collection: String,
        filter: Document,
        pipeline: Vec<Document>,
    },
    Delete {
        database: String,
        collection: String,
        filter: Document,
    },
}

#[derive(Default)]
struct Inner {
    rows: DashMap<(String, String), Vec<Document>>,
    indexes: DashMap<(String, String), Vec<String>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl Inner {
    fn record(&self, call: RecordedCall) {
        self.calls
            .lock()
            .expect("mock call log poisoned")
            .push(call);
    }
}

/// Scriptable [`DocumentStore`] holding everything in memory.
#[derive(Clone, Default)]
pub struct MockStore {
    inner: Arc<Inner>,
}

impl MockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a collection with rows, creating it if needed.
    pub fn seed(&self, database: &str, collection: &str, rows: Vec<Document>) {
        self.inner
            .rows
            .insert((database.to_string(), collection.to_string()), rows);
    }

    /// Current rows of a collection.
    pub fn rows(&self, database: &str, collection: &str) -> Vec<Document> {
        self.inner
            .rows
            .get(&(database.to_string(), collection.to_string()))
            .map(|entry| entry.clone())
            .unwrap_or_default()
    }

    /// All recorded operations, in arrival order.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.inner.calls.lock().expect("mock call log poisoned").clone()
    }

    /// The pipeline of the most recent aggregation, if any.
    pub fn last_pipeline(&self) -> Option<Vec<Document>> {
        self.calls().into_iter().rev().find_map(|call| match call {
            RecordedCall::Aggregate { pipeline, .. } => Some(pipeline),
            _ => None,
        })
    }
}

#[async_trait]
impl DocumentStore for MockStore {
    fn database(&self, name: &str) -> Box<dyn DatabaseHandle> {
        Box::new(MockDatabase {
            inner: Arc::clone(&self.inner),
            database: name.to_string(),
        })
    }

    async fn list_databases(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self
            .inner
            .rows
            .iter()
            .map(|entry| entry.key().0.clone())
            .collect();
        names.sort();
        names.dedup();
        Ok(names)
    }
}

struct MockDatabase {
    inner: Arc<Inner>,
    database: String,
}

#[async_trait]
impl DatabaseHandle for MockDatabase {
    fn collection(&self, name: &str) -> Box<dyn CollectionHandle> {
        Box::new(MockCollection {
            inner: Arc::clone(&self.inner),
            key: (self.database.clone(), name.to_string()),
        })
    }

    async fn create_collection(&self, name: &str) -> Result<()> {
        self.inner
            .rows
            .entry((self.database.clone(), name.to_string()))
            .or_default();
        Ok(())
    }

    async fn list_collections(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self
            .inner
            .rows
            .iter()
            .filter(|entry| entry.key().0 == self.database)
            .map(|entry| entry.key().1.clone())
            .collect();
        names.sort();
        Ok(names)
    }

    async fn drop_database(&self) -> Result<()> {
        self.inner.rows.retain(|key, _| key.0 != self.database);
        self.inner.indexes.retain(|key, _| key.0 != self.database);
        Ok(())
    }
}

struct MockCollection {
    inner: Arc<Inner>,
    key: (String, String),
}

impl MockCollection {
    fn rows(&self) -> Vec<Document> {
        self.inner
            .rows
            .get(&self.key)
            .map(|entry| entry.clone())
            .unwrap_or_default()
    }
}

/// Equality-only filter evaluation; `$expr` predicates match everything
/// since the mock has no expression engine.
fn matches_filter(row: &Document, filter: &Document) -> bool {
    filter
        .iter()
        .all(|(key, value)| key == "$expr" || row.get(key) == Some(value))
}

#[async_trait]
impl CollectionHandle for MockCollection {
    async fn aggregate(&self, pipeline: Vec<Document>) -> Result<DocumentStream> {
        self.inner.record(RecordedCall::Aggregate {
            database: self.key.0.clone(),
            collection: self.key.1.clone(),
            pipeline,
        });
        let rows: Vec<Result<Document>> = self.rows().into_iter().map(Ok).collect();
        Ok(Box::pin(stream::iter(rows)))
    }

    async fn insert_many(&self, documents: Vec<Document>) -> Result<Vec<Bson>> {
        self.inner.record(RecordedCall::Insert {
            database: self.key.0.clone(),
            collection: self.key.1.clone(),
            documents: documents.clone(),
        });
        let mut keys = Vec::with_capacity(documents.len());
        let mut stored = documents;
        for document in &mut stored {
            let key = match document.get("_id") {
                Some(id) => id.clone(),
                None => {
                    // the real server fills missing keys in the same way
                    let id = Bson::ObjectId(bson::oid::ObjectId::new());
                    document.insert("_id", id.clone());
                    id
                }
            };
            keys.push(key);
        }
        self.inner
            .rows
            .entry(self.key.clone())
            .or_default()
            .extend(stored);
        Ok(keys)
    }

    async fn update_many(
        &self,
        filter: Document,
        pipeline: Vec<Document>,
    ) -> Result<WriteCounts> {
        let matched = self
            .rows()
            .iter()
            .filter(|row| matches_filter(row, &filter))
            .count() as u64;
        self.inner.record(RecordedCall::Update {
            database: self.key.0.clone(),
            collection: self.key.1.clone(),
            filter,
            pipeline,
        });
        Ok(WriteCounts {
            matched,
            modified: matched,
        })
    }

    async fn delete_many(&self, filter: Document) -> Result<u64> {
        let mut deleted = 0;
        if let Some(mut entry) = self.inner.rows.get_mut(&self.key) {
            let before = entry.len();
            entry.retain(|row| !matches_filter(row, &filter));
            deleted = (before - entry.len()) as u64;
        }
        self.inner.record(RecordedCall::Delete {
            database: self.key.0.clone(),
            collection: self.key.1.clone(),
            filter,
        });
        Ok(deleted)
    }

    async fn create_index(&self, keys: Document, name: Option<String>) -> Result<String> {
        let name = name.unwrap_or_else(|| {
            keys.iter()
                .map(|(field, order)| format!("{field}_{order}"))
                .collect::<Vec<_>>()
                .join("_")
        });
        self.inner
            .indexes
            .entry(self.key.clone())
            .or_default()
            .push(name.clone());
        Ok(name)
    }

    async fn drop_index(&self, name: &str) -> Result<()> {
        if let Some(mut entry) = self.inner.indexes.get_mut(&self.key) {
            entry.retain(|existing| existing != name);
        }
        Ok(())
    }

    async fn list_indexes(&self) -> Result<Vec<String>> {
        Ok(self
            .inner
            .indexes
            .get(&self.key)
            .map(|entry| entry.clone())
            .unwrap_or_default())
    }

    async fn drop_collection(&self) -> Result<()> {
        self.inner.rows.remove(&self.key);
        self.inner.indexes.remove(&self.key);
        Ok(())
    }
}
