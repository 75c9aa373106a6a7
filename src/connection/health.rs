//! Database health model
//!
//! Per-database probe results, the aggregate report handed to collaborators,
//! and the TTL cache that bounds probing cost. Cache refresh is a plain
//! recomputation; concurrent refreshes race harmlessly and the last writer
//! wins.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::Instant;

use super::database::DatabaseRole;

/// Result of probing one logical database
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DatabaseHealth {
    pub connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub last_checked: DateTime<Utc>,
}

impl DatabaseHealth {
    pub fn up(latency: Duration) -> Self {
        Self {
            connected: true,
            latency_ms: Some(latency.as_millis() as u64),
            error: None,
            last_checked: Utc::now(),
        }
    }

    pub fn down(error: impl Into<String>) -> Self {
        Self {
            connected: false,
            latency_ms: None,
            error: Some(error.into()),
            last_checked: Utc::now(),
        }
    }
}

/// Overall status derived from the healthy fraction
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OverallStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Aggregate health across all probed databases
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub overall_status: OverallStatus,
    /// Healthy databases / probed databases
    pub score: f64,
    pub databases: BTreeMap<String, DatabaseHealth>,
    pub timestamp: DateTime<Utc>,
    pub version: &'static str,
    pub commit: &'static str,
}

impl HealthReport {
    pub fn from_results(results: impl IntoIterator<Item = (DatabaseRole, DatabaseHealth)>) -> Self {
        let databases: BTreeMap<String, DatabaseHealth> = results
            .into_iter()
            .map(|(role, health)| (role.as_str().to_string(), health))
            .collect();

        let total = databases.len();
        let healthy = databases.values().filter(|h| h.connected).count();
        let score = if total == 0 {
            0.0
        } else {
            healthy as f64 / total as f64
        };

        let overall_status = match healthy {
            0 => OverallStatus::Unhealthy,
            n if n == total => OverallStatus::Healthy,
            _ => OverallStatus::Degraded,
        };

        Self {
            overall_status,
            score,
            databases,
            timestamp: Utc::now(),
            version: env!("CARGO_PKG_VERSION"),
            commit: env!("GIT_COMMIT_SHORT"),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.overall_status == OverallStatus::Healthy
    }
}

struct CachedHealth {
    checked_at: Instant,
    health: DatabaseHealth,
}

/// TTL cache of probe results
pub struct HealthCache {
    ttl: Duration,
    entries: DashMap<DatabaseRole, CachedHealth>,
}

impl HealthCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: DashMap::new(),
        }
    }

    /// Cached result if it is younger than the TTL
    pub fn fresh(&self, role: DatabaseRole) -> Option<DatabaseHealth> {
        self.entries
            .get(&role)
            .filter(|entry| entry.checked_at.elapsed() < self.ttl)
            .map(|entry| entry.health.clone())
    }

    pub fn store(&self, role: DatabaseRole, health: DatabaseHealth) {
        self.entries.insert(
            role,
            CachedHealth {
                checked_at: Instant::now(),
                health,
            },
        );
    }

    pub fn invalidate(&self, role: DatabaseRole) {
        self.entries.remove(&role);
    }
}
