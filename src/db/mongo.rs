//! MongoDB client and collection wrapper

use bson::{doc, Document};
use futures_util::StreamExt;
use mongodb::{
    error::{ErrorKind, WriteFailure},
    options::{IndexOptions, ReturnDocument, UpdateModifications},
    results::UpdateResult,
    Client, Collection, IndexModel,
};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{error, info};

use crate::types::RisklineError;

/// Server error code for unique index violations
const DUPLICATE_KEY_CODE: i32 = 11000;

/// Trait for schemas that provide index definitions
pub trait IntoIndexes {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)>;
}

/// Whether a driver error is a unique-index violation
pub fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    match err.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(write_error)) => {
            write_error.code == DUPLICATE_KEY_CODE
        }
        _ => false,
    }
}

/// MongoDB client wrapper
#[derive(Clone)]
pub struct MongoClient {
    client: Client,
    db_name: String,
}

impl MongoClient {
    /// Connect and verify the server answers a ping
    pub async fn new(uri: &str, db_name: &str) -> Result<Self, RisklineError> {
        info!("Connecting to MongoDB at {}", uri);

        // Fail fast on an unreachable server instead of hanging startup
        let timeout_uri = if uri.contains('?') {
            format!("{}&serverSelectionTimeoutMS=3000&connectTimeoutMS=3000", uri)
        } else {
            format!("{}?serverSelectionTimeoutMS=3000&connectTimeoutMS=3000", uri)
        };

        let client = Client::with_uri_str(&timeout_uri)
            .await
            .map_err(|e| RisklineError::Database(format!("Failed to connect to MongoDB: {}", e)))?;

        let mongo = Self {
            client,
            db_name: db_name.to_string(),
        };
        mongo.ping().await?;

        info!("Connected to MongoDB database '{}'", db_name);
        Ok(mongo)
    }

    pub async fn ping(&self) -> Result<(), RisklineError> {
        self.client
            .database(&self.db_name)
            .run_command(doc! { "ping": 1 })
            .await
            .map(|_| ())
            .map_err(|e| RisklineError::Database(format!("MongoDB ping failed: {}", e)))
    }

    /// Open a typed collection and apply its indexes
    pub async fn collection<T>(&self, name: &str) -> Result<MongoCollection<T>, RisklineError>
    where
        T: Serialize + DeserializeOwned + Unpin + Send + Sync + IntoIndexes,
    {
        MongoCollection::new(&self.client, &self.db_name, name).await
    }
}

/// Typed MongoDB collection with automatic indexing
#[derive(Debug, Clone)]
pub struct MongoCollection<T>
where
    T: Serialize + DeserializeOwned + Unpin + Send + Sync,
{
    inner: Collection<T>,
}

impl<T> MongoCollection<T>
where
    T: Serialize + DeserializeOwned + Unpin + Send + Sync + IntoIndexes,
{
    pub async fn new(
        client: &Client,
        db_name: &str,
        collection_name: &str,
    ) -> Result<Self, RisklineError> {
        let collection = client.database(db_name).collection::<T>(collection_name);
        let mongo_collection = MongoCollection { inner: collection };

        mongo_collection.apply_indexes().await?;

        Ok(mongo_collection)
    }

    async fn apply_indexes(&self) -> Result<(), RisklineError> {
        let schema_indices = T::into_indices();

        if schema_indices.is_empty() {
            return Ok(());
        }

        let indices: Vec<IndexModel> = schema_indices
            .into_iter()
            .map(|(keys, opts)| IndexModel::builder().keys(keys).options(opts).build())
            .collect();

        self.inner
            .create_indexes(indices)
            .await
            .map_err(|e| RisklineError::Database(format!("Failed to create indexes: {}", e)))?;

        Ok(())
    }

    /// Insert a document; unique-index violations surface as `Conflict`
    pub async fn insert_one(&self, item: &T) -> Result<(), RisklineError> {
        self.inner.insert_one(item).await.map(|_| ()).map_err(|e| {
            if is_duplicate_key(&e) {
                RisklineError::Conflict(format!("Duplicate key: {}", e))
            } else {
                RisklineError::Database(format!("Insert failed: {}", e))
            }
        })
    }

    pub async fn find_one(&self, filter: Document) -> Result<Option<T>, RisklineError> {
        self.inner
            .find_one(filter)
            .await
            .map_err(|e| RisklineError::Database(format!("Find failed: {}", e)))
    }

    /// Find documents matching `filter`, sorted and capped
    pub async fn find_many(
        &self,
        filter: Document,
        sort: Document,
        limit: Option<i64>,
    ) -> Result<Vec<T>, RisklineError> {
        let mut find = self.inner.find(filter).sort(sort);
        if let Some(limit) = limit {
            find = find.limit(limit);
        }

        let cursor = find
            .await
            .map_err(|e| RisklineError::Database(format!("Find failed: {}", e)))?;

        let results: Vec<T> = cursor
            .filter_map(|doc| async {
                match doc {
                    Ok(d) => Some(d),
                    Err(e) => {
                        error!("Error reading document: {}", e);
                        None
                    }
                }
            })
            .collect()
            .await;

        Ok(results)
    }

    pub async fn update_one(
        &self,
        filter: Document,
        update: impl Into<UpdateModifications>,
    ) -> Result<UpdateResult, RisklineError> {
        self.inner
            .update_one(filter, update.into())
            .await
            .map_err(|e| RisklineError::Database(format!("Update failed: {}", e)))
    }

    /// Update and return the document as it is after the update
    pub async fn find_one_and_update(
        &self,
        filter: Document,
        update: Document,
        upsert: bool,
    ) -> Result<Option<T>, RisklineError> {
        self.inner
            .find_one_and_update(filter, update)
            .upsert(upsert)
            .return_document(ReturnDocument::After)
            .await
            .map_err(|e| RisklineError::Database(format!("Update failed: {}", e)))
    }

    /// Hard delete; returns the number of removed documents
    pub async fn delete_many(&self, filter: Document) -> Result<u64, RisklineError> {
        self.inner
            .delete_many(filter)
            .await
            .map(|result| result.deleted_count)
            .map_err(|e| RisklineError::Database(format!("Delete failed: {}", e)))
    }

    pub fn inner(&self) -> &Collection<T> {
        &self.inner
    }
}
