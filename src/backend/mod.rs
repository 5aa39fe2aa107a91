//! Storage backend abstraction.
//!
//! The compiler produces plain pipeline documents; everything that actually
//! touches a server goes through these handle traits. [`mongo`] is the real
//! driver-backed implementation, [`mock`] a scriptable in-memory one for
//! tests.

pub mod mock;
pub mod mongo;

use async_trait::async_trait;
use bson::{Bson, Document};
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;

use crate::error::Result;

pub use mock::MockStore;
pub use mongo::{MongoOptions, MongoStore};

/// Stream of result documents from an aggregation.
pub type DocumentStream = Pin<Box<dyn Stream<Item = Result<Document>> + Send>>;

/// Counts reported by a bulk update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WriteCounts {
    pub matched: u64,
    pub modified: u64,
}

/// Strategy for primary keys of inserted documents that carry none.
///
/// `objectid` defers to the server's native identifiers; `uuid` generates a
/// random v4 string client-side so the key is known before the round trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdProvider {
    ObjectId,
    #[default]
    Uuid,
}

/// Entry point to a document store.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Handle on a database; never fails, the database is created lazily.
    fn database(&self, name: &str) -> Box<dyn DatabaseHandle>;

    async fn list_databases(&self) -> Result<Vec<String>>;
}

/// Handle on one database.
#[async_trait]
pub trait DatabaseHandle: Send + Sync {
    /// Handle on a collection; never fails, the collection is created lazily.
    fn collection(&self, name: &str) -> Box<dyn CollectionHandle>;

    async fn create_collection(&self, name: &str) -> Result<()>;
    async fn list_collections(&self) -> Result<Vec<String>>;

    /// Drop the whole database. Named to stay clear of the `Drop` destructor,
    /// which method lookup on `Box<dyn DatabaseHandle>` would find first.
    async fn drop_database(&self) -> Result<()>;
}

/// Handle on one collection.
#[async_trait]
pub trait CollectionHandle: Send + Sync {
    /// Run an aggregation pipeline and stream the result documents.
    async fn aggregate(&self, pipeline: Vec<Document>) -> Result<DocumentStream>;

    /// Insert documents, returning their primary keys in input order.
    async fn insert_many(&self, documents: Vec<Document>) -> Result<Vec<Bson>>;

    /// Apply an update pipeline to every document matching `filter`.
    async fn update_many(
        &self,
        filter: Document,
        pipeline: Vec<Document>,
    ) -> Result<WriteCounts>;

    /// Delete every document matching `filter`, returning the count removed.
    async fn delete_many(&self, filter: Document) -> Result<u64>;

    /// Create an index over `keys`, returning its name.
    async fn create_index(&self, keys: Document, name: Option<String>) -> Result<String>;

    async fn drop_index(&self, name: &str) -> Result<()>;
    async fn list_indexes(&self) -> Result<Vec<String>>;

    /// Drop the collection; see [`DatabaseHandle::drop_database`] for the
    /// naming.
    async fn drop_collection(&self) -> Result<()>;
}
