//! Connection manager
//!
//! Owns exactly one pooled handle per logical database. Handles are created
//! lazily (or eagerly through [`ConnectionManager::connect_all`]) with bounded
//! exponential backoff, and a database that exhausts its attempts is marked
//! unreachable instead of taking the process down.
//!
//! The manager is an explicitly constructed value; callers share it through
//! an `Arc`. There is no global instance.

use dashmap::DashMap;
use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::connector::{Connector, DefaultConnector};
use super::database::DatabaseRole;
use super::health::{DatabaseHealth, HealthCache, HealthReport};
use super::retry::RetryPolicy;
use crate::config::DatabaseUrls;
use crate::db::DocumentStore;
use crate::types::{DatastoreError, Result};

/// Connection manager configuration
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub retry: RetryPolicy,
    /// Timeout for one connection attempt
    pub connect_timeout: Duration,
    /// Timeout for one health ping
    pub health_timeout: Duration,
    pub health_cache_ttl: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            connect_timeout: Duration::from_secs(5),
            health_timeout: Duration::from_secs(2),
            health_cache_ttl: Duration::from_secs(60),
        }
    }
}

/// Live handle to one logical database
#[derive(Clone)]
pub struct DatabaseHandle {
    role: DatabaseRole,
    store: Arc<dyn DocumentStore>,
}

impl DatabaseHandle {
    pub fn new(role: DatabaseRole, store: Arc<dyn DocumentStore>) -> Self {
        Self { role, store }
    }

    pub fn role(&self) -> DatabaseRole {
        self.role
    }

    pub fn store(&self) -> &dyn DocumentStore {
        self.store.as_ref()
    }
}

impl std::fmt::Debug for DatabaseHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseHandle")
            .field("role", &self.role)
            .field("store", &self.store.name())
            .finish()
    }
}

/// Connection lifecycle of a logical database
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Unconnected,
    Connected,
    Unreachable,
    Misconfigured,
}

/// Bookkeeping for one logical database
#[derive(Debug, Clone, Serialize)]
pub struct DatabaseState {
    pub status: ConnectionStatus,
    /// Failed attempts in the most recent connection cycle
    pub retry_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl Default for DatabaseState {
    fn default() -> Self {
        Self {
            status: ConnectionStatus::Unconnected,
            retry_count: 0,
            last_error: None,
        }
    }
}

pub struct ConnectionManager {
    urls: DatabaseUrls,
    config: ManagerConfig,
    connector: Arc<dyn Connector>,
    handles: DashMap<DatabaseRole, DatabaseHandle>,
    states: DashMap<DatabaseRole, DatabaseState>,
    health: HealthCache,
}

impl ConnectionManager {
    /// Create a manager using the default MongoDB / in-memory connector
    pub fn new(urls: DatabaseUrls, config: ManagerConfig) -> Self {
        let connector = Arc::new(DefaultConnector::new(config.connect_timeout));
        Self::with_connector(urls, config, connector)
    }

    pub fn with_connector(
        urls: DatabaseUrls,
        config: ManagerConfig,
        connector: Arc<dyn Connector>,
    ) -> Self {
        let health = HealthCache::new(config.health_cache_ttl);
        Self {
            urls,
            config,
            connector,
            handles: DashMap::new(),
            states: DashMap::new(),
            health,
        }
    }

    /// Validated connection URL for a role.
    ///
    /// Fails with a configuration error naming the exact variable; no
    /// default URL is ever substituted.
    pub fn get_url(&self, role: DatabaseRole) -> Result<&str> {
        self.urls.get(role)
    }

    /// Whether a role takes part in this deployment: every required role,
    /// plus optional roles that were given a URL
    pub fn is_configured(&self, role: DatabaseRole) -> bool {
        role.is_required() || self.urls.is_set(role)
    }

    /// Roles this deployment uses
    pub fn configured_roles(&self) -> Vec<DatabaseRole> {
        DatabaseRole::ALL
            .into_iter()
            .filter(|role| self.is_configured(*role))
            .collect()
    }

    /// Configuration problems for every configured role, without aborting on
    /// the first one
    pub fn configuration_report(&self) -> Vec<DatastoreError> {
        self.configured_roles()
            .into_iter()
            .filter_map(|role| self.get_url(role).err())
            .collect()
    }

    pub fn state(&self, role: DatabaseRole) -> DatabaseState {
        self.states
            .get(&role)
            .map(|s| s.value().clone())
            .unwrap_or_default()
    }

    fn set_state(&self, role: DatabaseRole, status: ConnectionStatus, retry_count: u32, error: Option<String>) {
        self.states.insert(
            role,
            DatabaseState {
                status,
                retry_count,
                last_error: error,
            },
        );
    }

    /// Connect with bounded exponential backoff.
    ///
    /// Configuration errors fail immediately. Transient failures are retried
    /// up to `max_retries` attempts; exhausting them marks the database
    /// unreachable and returns [`DatastoreError::Unreachable`].
    pub async fn connect(&self, role: DatabaseRole) -> Result<DatabaseHandle> {
        let url = match self.get_url(role) {
            Ok(url) => url.to_string(),
            Err(e) => {
                error!(database = %role, error = %e, "Database misconfigured");
                self.set_state(role, ConnectionStatus::Misconfigured, 0, Some(e.to_string()));
                return Err(e);
            }
        };

        let timeout = self.config.connect_timeout;
        let outcome = self
            .config
            .retry
            .run(role.as_str(), |attempt| {
                let connector = Arc::clone(&self.connector);
                let url = url.clone();
                async move {
                    debug!(database = %role, attempt = attempt + 1, "Connection attempt");
                    attempt_connect(connector.as_ref(), role, &url, timeout).await
                }
            })
            .await;

        match outcome.result {
            Ok(store) => {
                let handle = DatabaseHandle::new(role, store);
                self.handles.insert(role, handle.clone());
                self.set_state(role, ConnectionStatus::Connected, outcome.attempts - 1, None);
                self.health.invalidate(role);
                info!(database = %role, attempts = outcome.attempts, "Database connected");
                Ok(handle)
            }
            Err(e) if e.is_fatal() => {
                self.set_state(role, ConnectionStatus::Misconfigured, 0, Some(e.to_string()));
                Err(e)
            }
            Err(e) => {
                error!(
                    database = %role,
                    attempts = outcome.attempts,
                    error = %e,
                    "Database unreachable, continuing in degraded mode"
                );
                self.set_state(
                    role,
                    ConnectionStatus::Unreachable,
                    outcome.attempts,
                    Some(e.to_string()),
                );
                Err(DatastoreError::Unreachable {
                    database: role.as_str().to_string(),
                    attempts: outcome.attempts,
                    last_error: e.to_string(),
                })
            }
        }
    }

    /// Single attempt without backoff, used by health probes so a degraded
    /// database can recover without stalling the probe
    async fn connect_once(&self, role: DatabaseRole) -> Result<DatabaseHandle> {
        let url = self.get_url(role)?.to_string();
        match attempt_connect(self.connector.as_ref(), role, &url, self.config.connect_timeout).await {
            Ok(store) => {
                let handle = DatabaseHandle::new(role, store);
                self.handles.insert(role, handle.clone());
                self.set_state(role, ConnectionStatus::Connected, 0, None);
                info!(database = %role, "Database reconnected");
                Ok(handle)
            }
            Err(e) => {
                let status = if e.is_fatal() {
                    ConnectionStatus::Misconfigured
                } else {
                    ConnectionStatus::Unreachable
                };
                self.set_state(role, status, 1, Some(e.to_string()));
                Err(e)
            }
        }
    }

    /// Existing handle for a role, connecting first if necessary
    pub async fn handle(&self, role: DatabaseRole) -> Result<DatabaseHandle> {
        if let Some(handle) = self.handles.get(&role) {
            return Ok(handle.value().clone());
        }
        self.connect(role).await
    }

    /// Drop a handle after a failed round-trip so the next use reconnects
    fn mark_lost(&self, role: DatabaseRole, error: &str) {
        warn!(database = %role, error = %error, "Lost database connection");
        self.handles.remove(&role);
        self.set_state(role, ConnectionStatus::Unreachable, 0, Some(error.to_string()));
    }

    /// Connect every configured role concurrently. Failures only degrade
    /// health; the returned list says which roles came up.
    pub async fn connect_all(&self) -> Vec<(DatabaseRole, Result<()>)> {
        let roles = self.configured_roles();
        let results = join_all(roles.iter().map(|role| self.connect(*role))).await;

        roles
            .into_iter()
            .zip(results)
            .map(|(role, result)| (role, result.map(|_| ())))
            .collect()
    }

    /// Ping one database, serving a cached result while it is fresh
    pub async fn health_check(&self, role: DatabaseRole) -> DatabaseHealth {
        if let Some(cached) = self.health.fresh(role) {
            return cached;
        }

        let health = self.probe(role).await;
        self.health.store(role, health.clone());
        health
    }

    async fn probe(&self, role: DatabaseRole) -> DatabaseHealth {
        let existing = self.handles.get(&role).map(|h| h.value().clone());
        let handle = match existing {
            Some(handle) => handle,
            None => match self.connect_once(role).await {
                Ok(handle) => handle,
                Err(e) => return DatabaseHealth::down(e.to_string()),
            },
        };

        let started = Instant::now();
        match tokio::time::timeout(self.config.health_timeout, handle.store().ping()).await {
            Ok(Ok(())) => DatabaseHealth::up(started.elapsed()),
            Ok(Err(e)) => {
                self.mark_lost(role, &e.to_string());
                DatabaseHealth::down(e.to_string())
            }
            Err(_) => {
                let message = format!("ping timed out after {:?}", self.config.health_timeout);
                self.mark_lost(role, &message);
                DatabaseHealth::down(message)
            }
        }
    }

    /// Health of every configured database plus the aggregate score
    pub async fn get_all_health(&self) -> HealthReport {
        let roles = self.configured_roles();
        let results = join_all(roles.iter().map(|role| self.health_check(*role))).await;
        HealthReport::from_results(roles.into_iter().zip(results))
    }
}

async fn attempt_connect(
    connector: &dyn Connector,
    role: DatabaseRole,
    url: &str,
    timeout: Duration,
) -> Result<Arc<dyn DocumentStore>> {
    match tokio::time::timeout(timeout, connector.connect(role, url)).await {
        Ok(result) => result,
        Err(_) => Err(DatastoreError::Connection {
            database: role.as_str().to_string(),
            message: format!("connection attempt timed out after {:?}", timeout),
        }),
    }
}
