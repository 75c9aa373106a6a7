//! Connection management for the logical databases
//!
//! - `database` - the fixed set of roles and their identity scopes
//! - `retry` - bounded exponential backoff
//! - `connector` - driver seam (MongoDB, in-memory)
//! - `manager` - per-role handles, connection state, health probing
//! - `health` - probe results, aggregate report, TTL cache

pub mod connector;
pub mod database;
pub mod health;
pub mod manager;
pub mod retry;

pub use connector::{Connector, DefaultConnector};
pub use database::{DatabaseRole, Scope};
pub use health::{DatabaseHealth, HealthReport, OverallStatus};
pub use manager::{ConnectionManager, ConnectionStatus, DatabaseHandle, DatabaseState, ManagerConfig};
pub use retry::{RetryOutcome, RetryPolicy};
