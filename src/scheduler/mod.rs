//! Job scheduling
//!
//! - `job` - the [`Job`] trait, schedules and run records
//! - `runner` - the ticker-driven [`Scheduler`]
//! - `jobs` - migration, HR migration, cleanup and health-check jobs

pub mod job;
pub mod jobs;
pub mod runner;

pub use job::{Job, JobId, JobOutcome, JobOutput, JobRun, JobSchedule, JobTrigger};
pub use jobs::{CleanupJob, HealthCheckJob, HrMigrationJob, MigrationJob};
pub use runner::Scheduler;
