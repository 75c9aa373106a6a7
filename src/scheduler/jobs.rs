//! Built-in jobs: full migration, HR migration, cleanup, health check

use async_trait::async_trait;
use std::sync::Arc;
use tracing::warn;

use super::job::{Job, JobOutput};
use crate::connection::{ConnectionManager, OverallStatus};
use crate::migration::MigrationService;
use crate::types::{CancelFlag, DatastoreError, Result};

/// Daily promotion of internal staging
pub struct MigrationJob {
    service: Arc<MigrationService>,
}

impl MigrationJob {
    pub fn new(service: Arc<MigrationService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl Job for MigrationJob {
    fn name(&self) -> &str {
        "full-migration"
    }

    async fn run(&self, cancel: CancelFlag) -> Result<JobOutput> {
        let stats = self.service.run_full_migration(&cancel).await?;
        Ok(JobOutput::Migration(stats))
    }
}

/// HR staging sweep and HR mirror reconciliation
pub struct HrMigrationJob {
    service: Arc<MigrationService>,
}

impl HrMigrationJob {
    pub fn new(service: Arc<MigrationService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl Job for HrMigrationJob {
    fn name(&self) -> &str {
        "hr-migration"
    }

    async fn run(&self, cancel: CancelFlag) -> Result<JobOutput> {
        let stats = self.service.run_hr_migration(&cancel).await?;
        Ok(JobOutput::Migration(stats))
    }
}

/// Reconciliation sweep. A sweep that could not reach a database fails so
/// the scheduler retries it.
pub struct CleanupJob {
    service: Arc<MigrationService>,
}

impl CleanupJob {
    pub fn new(service: Arc<MigrationService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl Job for CleanupJob {
    fn name(&self) -> &str {
        "cleanup"
    }

    async fn run(&self, cancel: CancelFlag) -> Result<JobOutput> {
        let report = self.service.cleanup_temp_data(&cancel).await;
        if !report.unavailable.is_empty() {
            return Err(DatastoreError::Database(format!(
                "cleanup incomplete, unreachable: {}",
                report.unavailable.join("; ")
            )));
        }
        Ok(JobOutput::Cleanup(report))
    }
}

/// Refreshes the health report; fails when no database answers
pub struct HealthCheckJob {
    manager: Arc<ConnectionManager>,
}

impl HealthCheckJob {
    pub fn new(manager: Arc<ConnectionManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl Job for HealthCheckJob {
    fn name(&self) -> &str {
        "health-check"
    }

    async fn run(&self, _cancel: CancelFlag) -> Result<JobOutput> {
        let report = self.manager.get_all_health().await;
        match report.overall_status {
            OverallStatus::Unhealthy => Err(DatastoreError::Database(
                "no configured database is reachable".to_string(),
            )),
            OverallStatus::Degraded => {
                let down: Vec<_> = report
                    .databases
                    .iter()
                    .filter(|(_, h)| !h.connected)
                    .map(|(name, _)| name.as_str())
                    .collect();
                warn!(down = ?down, score = report.score, "Running with degraded databases");
                Ok(JobOutput::Health(report))
            }
            OverallStatus::Healthy => Ok(JobOutput::Health(report)),
        }
    }
}
