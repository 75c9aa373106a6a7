//! Job abstraction and run records
//!
//! A [`Job`] knows what to do; a [`JobSchedule`] knows when. The scheduler
//! joins the two, so a job can be triggered by its ticker or on demand
//! without any change to its logic.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

use crate::connection::{HealthReport, RetryPolicy};
use crate::migration::{CleanupReport, MigrationStats};
use crate::types::{CancelFlag, Result};

/// Cadence and per-invocation retry budget of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobSchedule {
    pub every: Duration,
    /// Delay of the first tick relative to scheduler start
    pub offset: Duration,
    pub retry: RetryPolicy,
}

impl JobSchedule {
    /// First run one full period after start
    pub fn every(every: Duration) -> Self {
        Self {
            every,
            offset: every,
            retry: RetryPolicy::new(3, Duration::from_secs(30)),
        }
    }

    /// Fire the first run `every + offset` after start, keeping the job
    /// `offset` behind any job sharing its period
    pub fn with_offset(mut self, offset: Duration) -> Self {
        self.offset = self.every + offset;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// What a successful job run produced
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", content = "result", rename_all = "snake_case")]
pub enum JobOutput {
    Migration(MigrationStats),
    Cleanup(CleanupReport),
    Health(HealthReport),
}

impl JobOutput {
    /// One-line summary for logs
    pub fn summary(&self) -> String {
        match self {
            Self::Migration(stats) => format!(
                "{} migrated, {} failed, {} mirrored",
                stats.migrated_records, stats.failed_records, stats.mirrored_records
            ),
            Self::Cleanup(report) => format!(
                "{} removed, {} drift repaired, {} errors",
                report.documents_removed,
                report.drift_repaired,
                report.errors.len()
            ),
            Self::Health(report) => format!(
                "{:?} ({:.0}% reachable)",
                report.overall_status,
                report.score * 100.0
            ),
        }
    }
}

/// A unit of scheduled work.
///
/// `run` is one attempt; the scheduler owns retrying. Implementations check
/// `cancel` between units of work and never abandon a unit half done.
#[async_trait]
pub trait Job: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self, cancel: CancelFlag) -> Result<JobOutput>;
}

/// Registry key of a scheduled job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobTrigger {
    Scheduled,
    Manual,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "lowercase")]
pub enum JobOutcome {
    Succeeded(JobOutput),
    Failed(String),
    Cancelled,
}

/// Record of one invocation, including all of its retry attempts
#[derive(Debug, Clone, Serialize)]
pub struct JobRun {
    pub run_id: Uuid,
    pub job_id: JobId,
    pub job: String,
    pub trigger: JobTrigger,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub attempts: u32,
    pub outcome: JobOutcome,
}

impl JobRun {
    pub fn succeeded(&self) -> bool {
        matches!(self.outcome, JobOutcome::Succeeded(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offset_trails_the_period() {
        let hour = Duration::from_secs(3600);
        let day = Duration::from_secs(86400);

        let migration = JobSchedule::every(day);
        let cleanup = JobSchedule::every(day).with_offset(hour);

        assert_eq!(migration.offset, day);
        assert_eq!(cleanup.offset - migration.offset, hour);
    }

    #[test]
    fn test_outcome_serialization() {
        let run = JobOutcome::Succeeded(JobOutput::Migration(MigrationStats::default()));
        let json = serde_json::to_value(&run).unwrap();
        assert_eq!(json["status"], "succeeded");
        assert_eq!(json["detail"]["kind"], "migration");
        assert_eq!(json["detail"]["result"]["total_records"], 0);
    }
}
