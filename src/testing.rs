//! Shared test fixtures
//!
//! A connector that hands out pre-built stores per role, and a store wrapper
//! that fails selected operations.

use async_trait::async_trait;
use bson::{doc, Bson, DateTime, Document};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::config::DatabaseUrls;
use crate::connection::{ConnectionManager, Connector, DatabaseRole, ManagerConfig, RetryPolicy};
use crate::db::{DocumentStore, InMemoryStore, RecordFilter};
use crate::types::{CancelFlag, DatastoreError, Result};

/// Which store operation a [`FlakyStore`] rejects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOn {
    Find,
    Upsert,
    Delete,
}

/// Wraps an in-memory store and fails one operation, either for every call
/// or only for documents whose `record_key` is listed
pub struct FlakyStore {
    inner: Arc<InMemoryStore>,
    fail_on: FailOn,
    keys: Mutex<Vec<String>>,
}

impl FlakyStore {
    pub fn new(inner: Arc<InMemoryStore>, fail_on: FailOn) -> Self {
        Self {
            inner,
            fail_on,
            keys: Mutex::new(Vec::new()),
        }
    }

    /// Only fail for these record keys
    pub fn for_keys(self, keys: &[&str]) -> Self {
        *self.keys.lock().unwrap() = keys.iter().map(|k| k.to_string()).collect();
        self
    }

    fn should_fail(&self, op: FailOn, key: Option<&str>) -> bool {
        if op != self.fail_on {
            return false;
        }
        let keys = self.keys.lock().unwrap();
        keys.is_empty() || key.map(|k| keys.iter().any(|x| x == k)).unwrap_or(false)
    }

    fn failure(&self) -> DatastoreError {
        DatastoreError::Database(format!("{}: injected failure", self.inner.name()))
    }
}

fn record_key(document: &Document) -> Option<&str> {
    document.get_str("record_key").ok()
}

#[async_trait]
impl DocumentStore for FlakyStore {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn ping(&self) -> Result<()> {
        self.inner.ping().await
    }

    async fn list_collections(&self) -> Result<Vec<String>> {
        self.inner.list_collections().await
    }

    async fn find(&self, collection: &str, filter: RecordFilter) -> Result<Vec<Document>> {
        if self.should_fail(FailOn::Find, None) {
            return Err(self.failure());
        }
        self.inner.find(collection, filter).await
    }

    async fn upsert(&self, collection: &str, key: Document, document: Document) -> Result<()> {
        if self.should_fail(FailOn::Upsert, record_key(&document)) {
            return Err(self.failure());
        }
        self.inner.upsert(collection, key, document).await
    }

    async fn delete(&self, collection: &str, id: &Bson) -> Result<u64> {
        let docs = self.inner.documents(collection).await;
        let key = docs
            .iter()
            .find(|d| d.get("_id") == Some(id))
            .and_then(|d| record_key(d).map(str::to_string));
        if self.should_fail(FailOn::Delete, key.as_deref()) {
            return Err(self.failure());
        }
        self.inner.delete(collection, id).await
    }

    async fn count(&self, collection: &str, filter: RecordFilter) -> Result<u64> {
        self.inner.count(collection, filter).await
    }
}

/// Fires a cancel flag while its first upsert is in flight; the write
/// itself still lands
pub struct CancellingStore {
    inner: Arc<InMemoryStore>,
    cancel: CancelFlag,
}

impl CancellingStore {
    pub fn new(inner: Arc<InMemoryStore>, cancel: CancelFlag) -> Self {
        Self { inner, cancel }
    }
}

#[async_trait]
impl DocumentStore for CancellingStore {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn ping(&self) -> Result<()> {
        self.inner.ping().await
    }

    async fn list_collections(&self) -> Result<Vec<String>> {
        self.inner.list_collections().await
    }

    async fn find(&self, collection: &str, filter: RecordFilter) -> Result<Vec<Document>> {
        self.inner.find(collection, filter).await
    }

    async fn upsert(&self, collection: &str, key: Document, document: Document) -> Result<()> {
        self.cancel.cancel();
        self.inner.upsert(collection, key, document).await
    }

    async fn delete(&self, collection: &str, id: &Bson) -> Result<u64> {
        self.inner.delete(collection, id).await
    }

    async fn count(&self, collection: &str, filter: RecordFilter) -> Result<u64> {
        self.inner.count(collection, filter).await
    }
}

/// Connector serving fixed stores per role; unlisted roles are refused
#[derive(Default)]
pub struct FixtureConnector {
    stores: HashMap<DatabaseRole, Arc<dyn DocumentStore>>,
}

#[async_trait]
impl Connector for FixtureConnector {
    async fn connect(&self, role: DatabaseRole, _url: &str) -> Result<Arc<dyn DocumentStore>> {
        self.stores
            .get(&role)
            .cloned()
            .ok_or_else(|| DatastoreError::Connection {
                database: role.as_str().to_string(),
                message: "connection refused".to_string(),
            })
    }
}

/// In-memory deployment with direct access to every backing store
pub struct Fixture {
    pub memory: HashMap<DatabaseRole, Arc<InMemoryStore>>,
    connector: FixtureConnector,
    urls: DatabaseUrls,
}

impl Fixture {
    /// Every required role backed by memory; HR staging left unconfigured
    pub fn new() -> Self {
        let mut fixture = Self {
            memory: HashMap::new(),
            connector: FixtureConnector::default(),
            urls: DatabaseUrls::default(),
        };
        for role in DatabaseRole::ALL.into_iter().filter(|r| r.is_required()) {
            fixture = fixture.with_role(role);
        }
        fixture
    }

    pub fn with_role(mut self, role: DatabaseRole) -> Self {
        let store = Arc::new(InMemoryStore::new(role.as_str()));
        self.memory.insert(role, store.clone());
        self.connector.stores.insert(role, store);
        self.urls = self.urls.with(role, format!("memory://{}", role.as_str()));
        self
    }

    /// Replace the store a role connects to
    pub fn with_store(mut self, role: DatabaseRole, store: Arc<dyn DocumentStore>) -> Self {
        self.connector.stores.insert(role, store);
        self
    }

    /// Configured but never reachable
    pub fn with_down(mut self, role: DatabaseRole) -> Self {
        self.connector.stores.remove(&role);
        self
    }

    pub fn store(&self, role: DatabaseRole) -> Arc<InMemoryStore> {
        self.memory[&role].clone()
    }

    pub fn manager(self) -> (Arc<ConnectionManager>, HashMap<DatabaseRole, Arc<InMemoryStore>>) {
        let config = ManagerConfig {
            retry: RetryPolicy::new(1, Duration::from_millis(10)),
            ..ManagerConfig::default()
        };
        let manager = ConnectionManager::with_connector(self.urls, config, Arc::new(self.connector));
        (Arc::new(manager), self.memory)
    }
}

pub fn hours_ago(hours: i64) -> DateTime {
    DateTime::from_chrono(chrono::Utc::now() - chrono::Duration::hours(hours))
}

/// Staged record with a business key and creation time
pub fn staged(key: &str, created_at: DateTime) -> Document {
    doc! {
        "record_key": key,
        "username": "octocat",
        "score": 42,
        "created_at": created_at,
    }
}

/// Staged record carrying the explicit HR marker
pub fn staged_hr(key: &str, created_at: DateTime) -> Document {
    let mut document = staged(key, created_at);
    document.insert("is_hr", true);
    document
}
