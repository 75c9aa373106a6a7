//! MongoDB document store
//!
//! One [`MongoStore`] wraps the pooled driver handle for a single logical
//! database. The driver pools connections internally, so the store is cheap
//! to share behind an `Arc`.

use async_trait::async_trait;
use bson::{doc, Bson, Document};
use futures_util::TryStreamExt;
use mongodb::{
    options::{ClientOptions, FindOptions, ReplaceOptions},
    Client, Collection, Database,
};
use std::time::Duration;
use tracing::{debug, info};

use super::store::{DocumentStore, RecordFilter};
use crate::types::{DatastoreError, Result};

/// MongoDB-backed store for one logical database
#[derive(Clone)]
pub struct MongoStore {
    database: Database,
    label: String,
}

impl MongoStore {
    /// Connect and verify the connection with a ping.
    ///
    /// The database name comes from the URL path; `fallback_db` is used when
    /// the URL does not name one.
    pub async fn connect(
        uri: &str,
        fallback_db: &str,
        label: &str,
        timeout: Duration,
    ) -> Result<Self> {
        info!(database = %label, "Connecting to MongoDB");

        let mut options = ClientOptions::parse(uri)
            .await
            .map_err(|e| connection_error(label, format!("invalid connection string: {}", e)))?;

        // Fail fast instead of hanging on an unreachable server
        options.server_selection_timeout = Some(timeout);
        options.connect_timeout = Some(timeout);
        options.app_name = Some("raseen-vault".to_string());

        let db_name = options
            .default_database
            .clone()
            .unwrap_or_else(|| fallback_db.to_string());

        let client = Client::with_options(options)
            .map_err(|e| connection_error(label, format!("failed to build client: {}", e)))?;
        let database = client.database(&db_name);

        database
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| connection_error(label, format!("ping failed: {}", e)))?;

        info!(database = %label, db_name = %db_name, "Connected to MongoDB");

        Ok(Self {
            database,
            label: label.to_string(),
        })
    }

    fn collection(&self, name: &str) -> Collection<Document> {
        self.database.collection::<Document>(name)
    }
}

fn connection_error(label: &str, message: String) -> DatastoreError {
    DatastoreError::Connection {
        database: label.to_string(),
        message,
    }
}

#[async_trait]
impl DocumentStore for MongoStore {
    fn name(&self) -> &str {
        &self.label
    }

    async fn ping(&self) -> Result<()> {
        self.database
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| connection_error(&self.label, format!("ping failed: {}", e)))?;
        Ok(())
    }

    async fn list_collections(&self) -> Result<Vec<String>> {
        let names = self
            .database
            .list_collection_names()
            .await
            .map_err(|e| DatastoreError::Database(format!("List collections failed: {}", e)))?;

        Ok(names
            .into_iter()
            .filter(|name| !name.starts_with("system."))
            .collect())
    }

    async fn find(&self, collection: &str, filter: RecordFilter) -> Result<Vec<Document>> {
        // ObjectIds are monotonic per writer, so _id order is insertion order
        let options = FindOptions::builder().sort(doc! { "_id": 1 }).build();

        let cursor = self
            .collection(collection)
            .find(filter.to_document())
            .with_options(options)
            .await
            .map_err(|e| DatastoreError::Database(format!("Find failed: {}", e)))?;

        // A cursor error mid-scan fails the whole read rather than returning a
        // partial batch
        cursor
            .try_collect()
            .await
            .map_err(|e| DatastoreError::Database(format!("Find failed: {}", e)))
    }

    async fn upsert(&self, collection: &str, key: Document, document: Document) -> Result<()> {
        let options = ReplaceOptions::builder().upsert(true).build();

        self.collection(collection)
            .replace_one(key, document)
            .with_options(options)
            .await
            .map_err(|e| DatastoreError::Database(format!("Upsert failed: {}", e)))?;

        debug!(database = %self.label, collection, "Document upserted");
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &Bson) -> Result<u64> {
        let result = self
            .collection(collection)
            .delete_one(doc! { "_id": id.clone() })
            .await
            .map_err(|e| DatastoreError::Database(format!("Delete failed: {}", e)))?;

        Ok(result.deleted_count)
    }

    async fn count(&self, collection: &str, filter: RecordFilter) -> Result<u64> {
        self.collection(collection)
            .count_documents(filter.to_document())
            .await
            .map_err(|e| DatastoreError::Database(format!("Count failed: {}", e)))
    }
}
