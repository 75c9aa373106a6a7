//! Connector seam between the connection manager and storage drivers

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::database::DatabaseRole;
use crate::db::{DocumentStore, InMemoryStore, MongoStore};
use crate::types::{DatastoreError, Result};

/// Opens a live store for a role. One call is one connection attempt;
/// retrying is the manager's job.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, role: DatabaseRole, url: &str) -> Result<Arc<dyn DocumentStore>>;
}

/// Production connector: `mongodb://` and `mongodb+srv://` go to MongoDB,
/// `memory://<name>` resolves to a process-wide in-memory store per role
/// and URL, so two roles never share a store even with identical URLs.
pub struct DefaultConnector {
    timeout: Duration,
    memory: DashMap<(DatabaseRole, String), Arc<InMemoryStore>>,
}

impl DefaultConnector {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            memory: DashMap::new(),
        }
    }
}

#[async_trait]
impl Connector for DefaultConnector {
    async fn connect(&self, role: DatabaseRole, url: &str) -> Result<Arc<dyn DocumentStore>> {
        if url.starts_with("memory://") {
            debug!(database = %role, "Using in-memory store");
            let store: Arc<dyn DocumentStore> = self
                .memory
                .entry((role, url.to_string()))
                .or_insert_with(|| Arc::new(InMemoryStore::new(role.as_str())))
                .value()
                .clone();
            return Ok(store);
        }

        if url.starts_with("mongodb://") || url.starts_with("mongodb+srv://") {
            let store =
                MongoStore::connect(url, role.default_db_name(), role.as_str(), self.timeout).await?;
            return Ok(Arc::new(store));
        }

        Err(DatastoreError::Configuration {
            variable: role.env_var(),
            reason: "has an unsupported scheme".to_string(),
        })
    }
}
