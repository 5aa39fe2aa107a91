//! MongoDB-backed store.
//!
//! Thin adapters from the handle traits onto the official driver. No
//! translation happens here; pipelines arrive ready to run.

use async_trait::async_trait;
use bson::{Bson, Document};
use futures::TryStreamExt;
use mongodb::options::{IndexOptions, UpdateModifications};
use mongodb::{Client, Collection, Database, IndexModel};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{
    CollectionHandle, DatabaseHandle, DocumentStore, DocumentStream, IdProvider, WriteCounts,
};
use crate::error::{Error, Result};

/// Connection settings, usually deserialized from the service config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoOptions {
    /// Connection string
    #[serde(default = "default_url")]
    pub url: String,

    /// Primary-key strategy for inserts
    #[serde(default)]
    pub id_provider: IdProvider,
}

fn default_url() -> String {
    "mongodb://127.0.0.1:27017".to_string()
}

impl Default for MongoOptions {
    fn default() -> Self {
        Self {
            url: default_url(),
            id_provider: IdProvider::default(),
        }
    }
}

/// A connected MongoDB client implementing [`DocumentStore`].
#[derive(Debug, Clone)]
pub struct MongoStore {
    client: Client,
}

impl MongoStore {
    /// Connect using the given options.
    pub async fn connect(options: &MongoOptions) -> Result<Self> {
        debug!(url = %options.url, "connecting to mongodb");
        let client = Client::with_uri_str(&options.url).await?;
        Ok(Self { client })
    }

    /// Wrap an already-connected client.
    pub fn from_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl DocumentStore for MongoStore {
    fn database(&self, name: &str) -> Box<dyn DatabaseHandle> {
        Box::new(MongoDatabase {
            database: self.client.database(name),
        })
    }

    async fn list_databases(&self) -> Result<Vec<String>> {
        Ok(self.client.list_database_names().await?)
    }
}

struct MongoDatabase {
    database: Database,
}

#[async_trait]
impl DatabaseHandle for MongoDatabase {
    fn collection(&self, name: &str) -> Box<dyn CollectionHandle> {
        Box::new(MongoCollection {
            collection: self.database.collection::<Document>(name),
        })
    }

    async fn create_collection(&self, name: &str) -> Result<()> {
        self.database.create_collection(name).await?;
        Ok(())
    }

    async fn list_collections(&self) -> Result<Vec<String>> {
        Ok(self.database.list_collection_names().await?)
    }

    async fn drop_database(&self) -> Result<()> {
        self.database.drop().await?;
        Ok(())
    }
}

struct MongoCollection {
    collection: Collection<Document>,
}

#[async_trait]
impl CollectionHandle for MongoCollection {
    async fn aggregate(&self, pipeline: Vec<Document>) -> Result<DocumentStream> {
        let cursor = self.collection.aggregate(pipeline).await?;
        Ok(Box::pin(cursor.map_err(Error::from)))
    }

    async fn insert_many(&self, documents: Vec<Document>) -> Result<Vec<Bson>> {
        let count = documents.len();
        let outcome = self.collection.insert_many(documents).await?;
        // inserted_ids is keyed by input position
        let mut keys = Vec::with_capacity(count);
        for index in 0..count {
            keys.push(
                outcome
                    .inserted_ids
                    .get(&index)
                    .cloned()
                    .unwrap_or(Bson::Null),
            );
        }
        Ok(keys)
    }

    async fn update_many(
        &self,
        filter: Document,
        pipeline: Vec<Document>,
    ) -> Result<WriteCounts> {
        let outcome = self
            .collection
            .update_many(filter, UpdateModifications::Pipeline(pipeline))
            .await?;
        Ok(WriteCounts {
            matched: outcome.matched_count,
            modified: outcome.modified_count,
        })
    }

    async fn delete_many(&self, filter: Document) -> Result<u64> {
        let outcome = self.collection.delete_many(filter).await?;
        Ok(outcome.deleted_count)
    }

    async fn create_index(&self, keys: Document, name: Option<String>) -> Result<String> {
        let model = match name {
            Some(name) => IndexModel::builder()
                .keys(keys)
                .options(IndexOptions::builder().name(name).build())
                .build(),
            None => IndexModel::builder().keys(keys).build(),
        };
        let outcome = self.collection.create_index(model).await?;
        Ok(outcome.index_name)
    }

    async fn drop_index(&self, name: &str) -> Result<()> {
        self.collection.drop_index(name).await?;
        Ok(())
    }

    async fn list_indexes(&self) -> Result<Vec<String>> {
        Ok(self.collection.list_index_names().await?)
    }

    async fn drop_collection(&self) -> Result<()> {
        self.collection.drop().await?;
        Ok(())
    }
}
