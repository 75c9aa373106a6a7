//! In-memory document store
//!
//! Backs `memory://` connection URLs for local development and serves as the
//! test double for every [`DocumentStore`] consumer. Collections keep
//! insertion order, matching how staging is scanned.

use async_trait::async_trait;
use bson::{oid::ObjectId, Bson, Document};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::schemas::ID_FIELD;
use super::store::{DocumentStore, RecordFilter};
use crate::types::Result;

/// Simple in-memory document store
pub struct InMemoryStore {
    name: String,
    collections: Arc<RwLock<BTreeMap<String, Vec<Document>>>>,
}

impl InMemoryStore {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            collections: Arc::new(RwLock::new(BTreeMap::new())),
        }
    }

    /// Insert a document, assigning an `_id` when it has none
    pub async fn insert(&self, collection: &str, mut document: Document) -> Bson {
        let id = match document.get(ID_FIELD) {
            Some(id) => id.clone(),
            None => {
                let id = Bson::ObjectId(ObjectId::new());
                document.insert(ID_FIELD, id.clone());
                id
            }
        };

        self.collections
            .write()
            .await
            .entry(collection.to_string())
            .or_default()
            .push(document);

        id
    }

    /// Snapshot of a collection's documents
    pub async fn documents(&self, collection: &str) -> Vec<Document> {
        self.collections
            .read()
            .await
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn list_collections(&self) -> Result<Vec<String>> {
        Ok(self
            .collections
            .read()
            .await
            .iter()
            .filter(|(_, docs)| !docs.is_empty())
            .map(|(name, _)| name.clone())
            .collect())
    }

    async fn find(&self, collection: &str, filter: RecordFilter) -> Result<Vec<Document>> {
        Ok(self
            .collections
            .read()
            .await
            .get(collection)
            .map(|docs| docs.iter().filter(|d| filter.matches(d)).cloned().collect())
            .unwrap_or_default())
    }

    async fn upsert(&self, collection: &str, key: Document, mut document: Document) -> Result<()> {
        let filter = RecordFilter::Matches(key);
        let mut collections = self.collections.write().await;
        let docs = collections.entry(collection.to_string()).or_default();

        match docs.iter_mut().find(|d| filter.matches(d)) {
            Some(existing) => {
                // Replacement keeps the stored _id
                if let Some(id) = existing.get(ID_FIELD).cloned() {
                    document.insert(ID_FIELD, id);
                }
                *existing = document;
            }
            None => {
                if !document.contains_key(ID_FIELD) {
                    document.insert(ID_FIELD, ObjectId::new());
                }
                docs.push(document);
            }
        }

        Ok(())
    }

    async fn delete(&self, collection: &str, id: &Bson) -> Result<u64> {
        let mut collections = self.collections.write().await;
        let Some(docs) = collections.get_mut(collection) else {
            return Ok(0);
        };

        match docs.iter().position(|d| d.get(ID_FIELD) == Some(id)) {
            Some(index) => {
                docs.remove(index);
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn count(&self, collection: &str, filter: RecordFilter) -> Result<u64> {
        Ok(self.find(collection, filter).await?.len() as u64)
    }
}
