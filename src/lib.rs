//! Raseen Vault - identity-scoped storage routing and staged-record migration
//!
//! Raseen keeps user data in several logical databases: a staging database
//! per identity scope, a permanent primary/backup pair for internal users,
//! and a primary/backup pair for HR-domain data.
//!
//! ## Components
//!
//! - **Connection**: one pooled handle per logical database, bounded
//!   exponential-backoff connects, cached health probes
//! - **Routing**: Internal/External identity detection, HR classification,
//!   database and collection resolution
//! - **Migration**: exactly-once promotion from staging into primary and
//!   backup, drift reconciliation, expiry of anonymous records
//! - **Scheduler**: ticker-driven jobs with per-invocation retry

pub mod config;
pub mod connection;
pub mod datastore;
pub mod db;
pub mod logging;
pub mod migration;
pub mod routing;
pub mod scheduler;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use config::Args;
pub use datastore::Datastore;
pub use types::{DatastoreError, Result};
